use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::api::types::{
    CheckoutSession, GenerationJob, PricingInfo, PromoCodeValidation, Tier, TierStatus,
};
use crate::api::{BillingApi, GenerationRequest, UserApi};
use crate::error::ClientError;
use crate::navigator::Navigator;
use crate::session::SessionStore;

/// The one generation affordance a tier allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PrimaryAction {
    /// Submit directly, no payment step.
    StartFreeTrial,
    /// Open the pricing modal instead of submitting.
    Upgrade,
    /// Submit directly with premium quality.
    Generate { remaining: u32 },
    /// Nothing to offer; informational only.
    Exhausted,
}

pub fn primary_action(status: &TierStatus) -> PrimaryAction {
    match status.tier {
        Tier::Free if !status.has_used_free_tier => PrimaryAction::StartFreeTrial,
        Tier::Free | Tier::NeedsPayment => PrimaryAction::Upgrade,
        Tier::Premium => PrimaryAction::Generate {
            remaining: status.premium_generations_remaining,
        },
        Tier::PremiumExhausted => PrimaryAction::Exhausted,
    }
}

/// Format a GBP amount the way prices are shown, e.g. `£39.99`.
pub fn format_gbp(amount: f64) -> String {
    format!("£{:.2}", amount)
}

/// Price as it should be presented: the active price, and the base price
/// struck through when a discount applies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceDisplay {
    pub active: f64,
    pub struck_through: Option<f64>,
    pub discount_source: Option<String>,
}

impl PriceDisplay {
    pub fn from_pricing(pricing: &PricingInfo) -> Self {
        match pricing.discounted_price {
            Some(discounted) if pricing.discount_available && discounted < pricing.base_price => {
                Self {
                    active: discounted,
                    struck_through: Some(pricing.base_price),
                    discount_source: pricing.discount_source.clone(),
                }
            }
            _ => Self {
                active: pricing.base_price,
                struck_through: None,
                discount_source: None,
            },
        }
    }

    /// Apply a validated promo code on top. Display only: entitlement does
    /// not change until a checkout completes.
    pub fn with_promo(&self, promo: &PromoCodeValidation) -> Self {
        if !promo.valid {
            return self.clone();
        }
        let Some(amount) = promo.discount_amount.filter(|a| *a > 0.0) else {
            return self.clone();
        };
        let base = self.struck_through.unwrap_or(self.active);
        let reduction = match promo.discount_type.as_deref() {
            Some("percentage") | Some("percent") => self.active * amount.min(100.0) / 100.0,
            _ => amount,
        };
        let active = (self.active - reduction).max(0.0);
        if active >= self.active {
            return self.clone();
        }
        Self {
            active: round_pence(active),
            struck_through: Some(base),
            discount_source: Some("promo_code".to_string()),
        }
    }

    pub fn has_discount(&self) -> bool {
        self.struck_through.is_some()
    }

    pub fn render(&self) -> String {
        match self.struck_through {
            Some(base) => format!("{} (was {})", format_gbp(self.active), format_gbp(base)),
            None => format_gbp(self.active),
        }
    }
}

fn round_pence(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Tier and pricing fetched together on entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TierSnapshot {
    pub tier: TierStatus,
    pub pricing: PricingInfo,
}

impl TierSnapshot {
    pub fn action(&self) -> PrimaryAction {
        primary_action(&self.tier)
    }

    pub fn price(&self) -> PriceDisplay {
        PriceDisplay::from_pricing(&self.pricing)
    }
}

/// Result of pressing the generate button.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Submitted(GenerationJob),
    /// Show pricing; nothing was sent.
    OpenPricing,
    /// No generation possible; carries the tier message.
    Unavailable(String),
}

/// Where the payment provider sent the user back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutReturn {
    Success { session_id: Option<String> },
    Cancelled,
}

impl CheckoutReturn {
    /// Recognise the `/generation/success` and `/generation/cancelled` routes.
    pub fn from_url(url: &Url) -> Option<Self> {
        let path = url.path().trim_end_matches('/');
        if path.ends_with("/generation/success") {
            let session_id = url
                .query_pairs()
                .find(|(k, _)| k == "session_id")
                .map(|(_, v)| v.into_owned());
            Some(CheckoutReturn::Success { session_id })
        } else if path.ends_with("/generation/cancelled") {
            Some(CheckoutReturn::Cancelled)
        } else {
            None
        }
    }
}

/// Drives the tier-gated generation and premium checkout flow.
pub struct TierReconciler<A: ?Sized, U: ?Sized> {
    api: Arc<A>,
    session: Arc<SessionStore<U>>,
    navigator: Arc<dyn Navigator>,
}

impl<A, U> TierReconciler<A, U>
where
    A: BillingApi + ?Sized,
    U: UserApi + ?Sized,
{
    pub fn new(api: Arc<A>, session: Arc<SessionStore<U>>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            api,
            session,
            navigator,
        }
    }

    /// Fetch tier status and pricing concurrently.
    pub async fn load(&self) -> Result<TierSnapshot, ClientError> {
        let (tier, pricing) = tokio::join!(self.api.tier_status(), self.api.pricing_info());
        Ok(TierSnapshot {
            tier: tier?,
            pricing: pricing?,
        })
    }

    pub async fn tier_status(&self) -> Result<TierStatus, ClientError> {
        self.api.tier_status().await
    }

    /// Route a generate press according to the tier. Only the free trial
    /// and premium paths call the generate endpoint.
    pub async fn submit_generation(
        &self,
        snapshot: &TierSnapshot,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, ClientError> {
        request.validate()?;
        match snapshot.action() {
            PrimaryAction::Upgrade => {
                info!("Tier {:?} requires payment, opening pricing", snapshot.tier.tier);
                Ok(GenerationOutcome::OpenPricing)
            }
            PrimaryAction::Exhausted => Ok(GenerationOutcome::Unavailable(
                snapshot.tier.message.clone(),
            )),
            PrimaryAction::StartFreeTrial | PrimaryAction::Generate { .. } => {
                let job = self.api.generate_tier(request).await?;
                info!("Generation job {} submitted", job.id);
                self.session.refresh_user().await;
                Ok(GenerationOutcome::Submitted(job))
            }
        }
    }

    pub async fn validate_promo(&self, code: &str) -> Result<PromoCodeValidation, ClientError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ClientError::InvalidInput(
                "Please enter a promo code".to_string(),
            ));
        }
        let result = self.api.validate_promo_code(code.to_string()).await?;
        info!("Promo code '{}' valid: {}", code, result.valid);
        Ok(result)
    }

    /// Create a checkout session and hand the browser to the provider.
    pub async fn start_checkout(
        &self,
        promo_code: Option<&str>,
    ) -> Result<CheckoutSession, ClientError> {
        let promo = promo_code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let session = self.api.create_premium_checkout(promo).await?;
        let url = Url::parse(&session.session_url).map_err(|e| {
            ClientError::Decode(format!(
                "Checkout URL '{}' is invalid: {}",
                session.session_url, e
            ))
        })?;
        info!(
            "Redirecting to checkout {} for {}",
            session.session_id,
            format_gbp(session.amount)
        );
        self.navigator.open_external(&url);
        Ok(session)
    }

    /// Entitlement changes out of band, so both outcomes re-fetch the tier
    /// and the session user.
    pub async fn handle_checkout_return(
        &self,
        outcome: &CheckoutReturn,
    ) -> Result<TierStatus, ClientError> {
        match outcome {
            CheckoutReturn::Success { session_id } => {
                info!("Checkout completed (session {:?})", session_id)
            }
            CheckoutReturn::Cancelled => warn!("Checkout cancelled"),
        }
        self.session.refresh_user().await;
        self.api.tier_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockBillingApi, MockUserApi, UploadFile};
    use crate::navigator::{Navigation, RecordingNavigator};
    use crate::session::tests::sample_user;
    use crate::token::MemoryTokenStore;

    fn tier(tier: Tier, used_free: bool, remaining: u32) -> TierStatus {
        TierStatus {
            tier,
            has_used_free_tier: used_free,
            has_purchased_premium: matches!(tier, Tier::Premium | Tier::PremiumExhausted),
            premium_generations_used: 2 - remaining.min(2),
            premium_generations_remaining: remaining,
            can_generate: matches!(tier, Tier::Free | Tier::Premium) && !(tier == Tier::Free && used_free),
            message: format!("{:?}", tier),
        }
    }

    fn pricing(base: f64, discounted: Option<f64>, available: bool) -> PricingInfo {
        PricingInfo {
            base_price: base,
            discounted_price: discounted,
            discount_available: available,
            discount_source: available.then(|| "referral".to_string()),
            referral_discount_eligible: available,
            referrals_completed: 3,
            referrals_needed: 3,
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            file: UploadFile::new("me.jpg", vec![0xFF, 0xD8]),
            university: "University of Leeds".into(),
            degree_level: "Bachelors".into(),
        }
    }

    fn submitted_job() -> GenerationJob {
        serde_json::from_value(serde_json::json!({
            "id": 77, "job_type": "tier", "status": "pending",
            "total_images": 5, "completed_images": 0, "is_watermarked": true
        }))
        .unwrap()
    }

    fn reconciler(
        billing: MockBillingApi,
        users: MockUserApi,
    ) -> (TierReconciler<MockBillingApi, MockUserApi>, Arc<RecordingNavigator>) {
        let navigator = Arc::new(RecordingNavigator::new());
        let session = Arc::new(SessionStore::new(
            Arc::new(users),
            Arc::new(MemoryTokenStore::with_token("tok")),
            navigator.clone(),
        ));
        (
            TierReconciler::new(Arc::new(billing), session, navigator.clone()),
            navigator,
        )
    }

    #[test]
    fn test_primary_action_per_tier() {
        assert_eq!(
            primary_action(&tier(Tier::Free, false, 0)),
            PrimaryAction::StartFreeTrial
        );
        assert_eq!(primary_action(&tier(Tier::Free, true, 0)), PrimaryAction::Upgrade);
        assert_eq!(
            primary_action(&tier(Tier::NeedsPayment, true, 0)),
            PrimaryAction::Upgrade
        );
        assert_eq!(
            primary_action(&tier(Tier::Premium, true, 1)),
            PrimaryAction::Generate { remaining: 1 }
        );
        assert_eq!(
            primary_action(&tier(Tier::PremiumExhausted, true, 0)),
            PrimaryAction::Exhausted
        );
    }

    #[test]
    fn test_discount_shows_struck_through_base() {
        let display = PriceDisplay::from_pricing(&pricing(39.99, Some(19.99), true));
        assert_eq!(display.active, 19.99);
        assert_eq!(display.struck_through, Some(39.99));
        assert_eq!(display.render(), "£19.99 (was £39.99)");
    }

    #[test]
    fn test_no_discount_shows_base_only() {
        let display = PriceDisplay::from_pricing(&pricing(39.99, None, false));
        assert_eq!(display.active, 39.99);
        assert!(!display.has_discount());
        assert_eq!(display.render(), "£39.99");

        // A discounted price without the availability flag is ignored
        let display = PriceDisplay::from_pricing(&pricing(39.99, Some(19.99), false));
        assert_eq!(display.active, 39.99);
    }

    #[test]
    fn test_valid_promo_lowers_display_price() {
        let base = PriceDisplay::from_pricing(&pricing(39.99, None, false));
        let promo = PromoCodeValidation {
            valid: true,
            discount_amount: Some(20.0),
            discount_type: Some("fixed".into()),
            message: "Promo code applied".into(),
        };
        let display = base.with_promo(&promo);
        assert_eq!(display.active, 19.99);
        assert_eq!(display.struck_through, Some(39.99));
        assert_eq!(display.discount_source.as_deref(), Some("promo_code"));

        let percent = PromoCodeValidation {
            discount_amount: Some(50.0),
            discount_type: Some("percentage".into()),
            ..promo.clone()
        };
        let round = PriceDisplay::from_pricing(&pricing(40.0, None, false));
        assert_eq!(round.with_promo(&percent).active, 20.0);
    }

    #[test]
    fn test_invalid_promo_keeps_price() {
        let base = PriceDisplay::from_pricing(&pricing(39.99, Some(19.99), true));
        let promo = PromoCodeValidation {
            valid: false,
            discount_amount: Some(20.0),
            discount_type: None,
            message: "Invalid promo code".into(),
        };
        assert_eq!(base.with_promo(&promo), base);
    }

    #[test]
    fn test_promo_never_goes_negative() {
        let base = PriceDisplay::from_pricing(&pricing(19.99, None, false));
        let promo = PromoCodeValidation {
            valid: true,
            discount_amount: Some(50.0),
            discount_type: None,
            message: String::new(),
        };
        assert_eq!(base.with_promo(&promo).active, 0.0);
    }

    #[test]
    fn test_checkout_return_routes() {
        let success =
            Url::parse("https://grad.example.com/generation/success?session_id=cs_123").unwrap();
        assert_eq!(
            CheckoutReturn::from_url(&success),
            Some(CheckoutReturn::Success { session_id: Some("cs_123".into()) })
        );
        let cancelled = Url::parse("https://grad.example.com/generation/cancelled").unwrap();
        assert_eq!(CheckoutReturn::from_url(&cancelled), Some(CheckoutReturn::Cancelled));
        let other = Url::parse("https://grad.example.com/dashboard").unwrap();
        assert_eq!(CheckoutReturn::from_url(&other), None);
    }

    #[tokio::test]
    async fn test_load_fetches_both() {
        let mut billing = MockBillingApi::new();
        billing
            .expect_tier_status()
            .times(1)
            .returning(|| Ok(tier(Tier::Free, false, 0)));
        billing
            .expect_pricing_info()
            .times(1)
            .returning(|| Ok(pricing(39.99, Some(19.99), true)));
        let (reconciler, _) = reconciler(billing, MockUserApi::new());

        let snapshot = reconciler.load().await.unwrap();
        assert_eq!(snapshot.action(), PrimaryAction::StartFreeTrial);
        assert_eq!(snapshot.price().active, 19.99);
    }

    #[tokio::test]
    async fn test_free_trial_submits_without_pricing() {
        let mut billing = MockBillingApi::new();
        billing
            .expect_generate_tier()
            .times(1)
            .returning(|_| Ok(submitted_job()));
        let mut users = MockUserApi::new();
        users.expect_get_me().times(1).returning(|| Ok(sample_user()));
        let (reconciler, navigator) = reconciler(billing, users);

        let snapshot = TierSnapshot {
            tier: tier(Tier::Free, false, 0),
            pricing: pricing(39.99, None, false),
        };
        let outcome = reconciler.submit_generation(&snapshot, request()).await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Submitted(ref job) if job.id == 77));
        assert!(navigator.history().is_empty());
    }

    #[tokio::test]
    async fn test_needs_payment_opens_pricing_without_generating() {
        let mut billing = MockBillingApi::new();
        billing.expect_generate_tier().times(0);
        let (reconciler, _) = reconciler(billing, MockUserApi::new());

        let snapshot = TierSnapshot {
            tier: tier(Tier::NeedsPayment, true, 0),
            pricing: pricing(39.99, None, false),
        };
        let outcome = reconciler.submit_generation(&snapshot, request()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::OpenPricing);
    }

    #[tokio::test]
    async fn test_exhausted_offers_nothing() {
        let mut billing = MockBillingApi::new();
        billing.expect_generate_tier().times(0);
        let (reconciler, _) = reconciler(billing, MockUserApi::new());

        let snapshot = TierSnapshot {
            tier: tier(Tier::PremiumExhausted, true, 0),
            pricing: pricing(39.99, None, false),
        };
        let outcome = reconciler.submit_generation(&snapshot, request()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Unavailable("PremiumExhausted".into()));
    }

    #[tokio::test]
    async fn test_missing_university_is_rejected_before_any_call() {
        let mut billing = MockBillingApi::new();
        billing.expect_generate_tier().times(0);
        let (reconciler, _) = reconciler(billing, MockUserApi::new());

        let snapshot = TierSnapshot {
            tier: tier(Tier::Premium, true, 2),
            pricing: pricing(39.99, None, false),
        };
        let mut req = request();
        req.university = String::new();
        let result = reconciler.submit_generation(&snapshot, req).await;
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_empty_promo_is_not_sent() {
        let mut billing = MockBillingApi::new();
        billing.expect_validate_promo_code().times(0);
        let (reconciler, _) = reconciler(billing, MockUserApi::new());
        assert!(reconciler.validate_promo("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_checkout_hands_off_to_provider() {
        let mut billing = MockBillingApi::new();
        billing
            .expect_create_premium_checkout()
            .withf(|promo| promo.as_deref() == Some("GRAD20"))
            .times(1)
            .returning(|_| {
                Ok(CheckoutSession {
                    session_id: "cs_test_1".into(),
                    session_url: "https://checkout.stripe.com/c/pay/cs_test_1".into(),
                    amount: 19.99,
                    original_price: 39.99,
                    discount_applied: 20.0,
                    discount_source: Some("promo_code".into()),
                })
            });
        let (reconciler, navigator) = reconciler(billing, MockUserApi::new());

        let session = reconciler.start_checkout(Some(" GRAD20 ")).await.unwrap();
        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(
            navigator.history(),
            vec![Navigation::External(
                "https://checkout.stripe.com/c/pay/cs_test_1".into()
            )]
        );
    }

    #[tokio::test]
    async fn test_checkout_return_refetches_tier_and_user() {
        let mut billing = MockBillingApi::new();
        billing
            .expect_tier_status()
            .times(1)
            .returning(|| Ok(tier(Tier::Premium, true, 2)));
        let mut users = MockUserApi::new();
        users.expect_get_me().times(1).returning(|| {
            let mut user = sample_user();
            user.has_purchased_premium = true;
            Ok(user)
        });
        let (reconciler, _) = reconciler(billing, users);

        let status = reconciler
            .handle_checkout_return(&CheckoutReturn::Success {
                session_id: Some("cs_test_1".into()),
            })
            .await
            .unwrap();
        assert_eq!(status.tier, Tier::Premium);
        assert!(reconciler.session.current_user().unwrap().has_purchased_premium);
    }
}
