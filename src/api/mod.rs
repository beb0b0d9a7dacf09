pub mod auth;
pub mod client;
pub mod generation;
pub mod payments;
pub mod referrals;
pub mod types;

use async_trait::async_trait;

pub use self::client::ApiClient;
pub use self::generation::{UploadFile, DEFAULT_PROMPT_ID};
use self::types::{
    CheckoutSession, GenerationJob, JobStatusUpdate, PaymentIntent, PricingInfo,
    PromoCodeValidation, TierStatus, User,
};
use crate::error::ClientError;

/// Everything needed to submit one tier generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub file: UploadFile,
    pub university: String,
    pub degree_level: String,
}

impl GenerationRequest {
    /// Form-level checks run before anything is sent.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.file.bytes.is_empty() {
            return Err(ClientError::InvalidInput(
                "Please select an image".to_string(),
            ));
        }
        if self.university.trim().is_empty() || self.degree_level.trim().is_empty() {
            return Err(ClientError::InvalidInput(
                "Please select university and degree level".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserApi: Send + Sync {
    async fn get_me(&self) -> Result<User, ClientError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn list_jobs(&self, limit: u32) -> Result<Vec<GenerationJob>, ClientError>;
    async fn job_status(&self, job_id: i64) -> Result<JobStatusUpdate, ClientError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn tier_status(&self) -> Result<TierStatus, ClientError>;
    async fn pricing_info(&self) -> Result<PricingInfo, ClientError>;
    async fn validate_promo_code(&self, code: String) -> Result<PromoCodeValidation, ClientError>;
    async fn create_premium_checkout(
        &self,
        promo_code: Option<String>,
    ) -> Result<CheckoutSession, ClientError>;
    async fn generate_tier(&self, request: GenerationRequest) -> Result<GenerationJob, ClientError>;
}

/// Legacy credit-balance endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditsApi: Send + Sync {
    async fn generate_single(
        &self,
        file: UploadFile,
        university: String,
        degree_level: String,
    ) -> Result<GenerationJob, ClientError>;
    async fn generate_batch(
        &self,
        files: Vec<UploadFile>,
        university: String,
        degree_level: String,
    ) -> Result<GenerationJob, ClientError>;
    async fn create_payment_intent(&self, credits: u32) -> Result<PaymentIntent, ClientError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetApi: Send + Sync {
    async fn fetch_result(&self, image_id: i64) -> Result<Vec<u8>, ClientError>;
    async fn fetch_input(&self, image_id: i64) -> Result<Vec<u8>, ClientError>;
}

#[async_trait]
impl UserApi for ApiClient {
    async fn get_me(&self) -> Result<User, ClientError> {
        ApiClient::get_me(self).await
    }
}

#[async_trait]
impl JobApi for ApiClient {
    async fn list_jobs(&self, limit: u32) -> Result<Vec<GenerationJob>, ClientError> {
        ApiClient::list_jobs(self, limit).await
    }

    async fn job_status(&self, job_id: i64) -> Result<JobStatusUpdate, ClientError> {
        ApiClient::job_status(self, job_id).await
    }
}

#[async_trait]
impl BillingApi for ApiClient {
    async fn tier_status(&self) -> Result<TierStatus, ClientError> {
        ApiClient::tier_status(self).await
    }

    async fn pricing_info(&self) -> Result<PricingInfo, ClientError> {
        ApiClient::pricing_info(self).await
    }

    async fn validate_promo_code(&self, code: String) -> Result<PromoCodeValidation, ClientError> {
        ApiClient::validate_promo_code(self, &code).await
    }

    async fn create_premium_checkout(
        &self,
        promo_code: Option<String>,
    ) -> Result<CheckoutSession, ClientError> {
        ApiClient::create_premium_checkout(self, promo_code.as_deref()).await
    }

    async fn generate_tier(&self, request: GenerationRequest) -> Result<GenerationJob, ClientError> {
        ApiClient::generate_tier(self, request.file, &request.university, &request.degree_level)
            .await
    }
}

#[async_trait]
impl CreditsApi for ApiClient {
    async fn generate_single(
        &self,
        file: UploadFile,
        university: String,
        degree_level: String,
    ) -> Result<GenerationJob, ClientError> {
        ApiClient::generate_single(self, file, &university, &degree_level, None).await
    }

    async fn generate_batch(
        &self,
        files: Vec<UploadFile>,
        university: String,
        degree_level: String,
    ) -> Result<GenerationJob, ClientError> {
        ApiClient::generate_batch(self, files, &university, &degree_level, None).await
    }

    async fn create_payment_intent(&self, credits: u32) -> Result<PaymentIntent, ClientError> {
        ApiClient::create_payment_intent(self, credits).await
    }
}

#[async_trait]
impl AssetApi for ApiClient {
    async fn fetch_result(&self, image_id: i64) -> Result<Vec<u8>, ClientError> {
        ApiClient::fetch_result(self, image_id).await
    }

    async fn fetch_input(&self, image_id: i64) -> Result<Vec<u8>, ClientError> {
        ApiClient::fetch_input(self, image_id).await
    }
}
