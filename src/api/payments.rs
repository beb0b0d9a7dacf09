use serde_json::json;
use tracing::info;

use super::client::ApiClient;
use super::types::{CheckoutSession, PaymentConfig, PaymentIntent, PricingInfo, PromoCodeValidation};
use crate::error::ClientError;

impl ApiClient {
    pub async fn payment_config(&self) -> Result<PaymentConfig, ClientError> {
        self.get_json("payments/config").await
    }

    pub async fn pricing_info(&self) -> Result<PricingInfo, ClientError> {
        self.get_json("payments/pricing-info").await
    }

    pub async fn validate_promo_code(&self, code: &str) -> Result<PromoCodeValidation, ClientError> {
        self.post_json(
            "payments/validate-promo-code",
            &json!({ "promo_code": code.trim() }),
        )
        .await
    }

    pub async fn create_premium_checkout(
        &self,
        promo_code: Option<&str>,
    ) -> Result<CheckoutSession, ClientError> {
        let promo_code = promo_code.map(str::trim).filter(|c| !c.is_empty());
        info!("Creating premium checkout (promo: {:?})", promo_code);
        self.post_json(
            "payments/create-premium-checkout",
            &json!({ "promo_code": promo_code }),
        )
        .await
    }

    /// Legacy credit purchase.
    pub async fn create_payment_intent(&self, credits: u32) -> Result<PaymentIntent, ClientError> {
        info!("Creating payment intent for {} credits", credits);
        self.post_json("payments/create-payment-intent", &json!({ "credits": credits }))
            .await
    }
}
