use std::sync::Arc;

use tracing::info;

use crate::api::types::{GenerationJob, PaymentIntent, User};
use crate::api::{CreditsApi, UploadFile, UserApi};
use crate::error::ClientError;
use crate::session::SessionStore;

/// One credit per submitted image.
pub fn check_credits(user: &User, files: usize) -> Result<(), ClientError> {
    let needed = files as i64;
    if user.credits < needed {
        return Err(ClientError::InvalidInput(format!(
            "Insufficient credits. You need {} credits but have {}.",
            needed, user.credits
        )));
    }
    Ok(())
}

/// Generation and top-ups for deployments on the per-image credit balance.
pub struct CreditsFlow<A: ?Sized, U: ?Sized> {
    api: Arc<A>,
    session: Arc<SessionStore<U>>,
}

impl<A, U> CreditsFlow<A, U>
where
    A: CreditsApi + ?Sized,
    U: UserApi + ?Sized,
{
    pub fn new(api: Arc<A>, session: Arc<SessionStore<U>>) -> Self {
        Self { api, session }
    }

    pub async fn submit(
        &self,
        mut files: Vec<UploadFile>,
        university: &str,
        degree_level: &str,
    ) -> Result<GenerationJob, ClientError> {
        if files.is_empty() {
            return Err(ClientError::InvalidInput(
                "Please select at least one image".to_string(),
            ));
        }
        if university.trim().is_empty() || degree_level.trim().is_empty() {
            return Err(ClientError::InvalidInput(
                "Please select university and degree level".to_string(),
            ));
        }
        let user = self.session.require_user()?;
        check_credits(&user, files.len())?;

        let job = if files.len() == 1 {
            let file = files.remove(0);
            self.api
                .generate_single(file, university.to_string(), degree_level.to_string())
                .await?
        } else {
            self.api
                .generate_batch(files, university.to_string(), degree_level.to_string())
                .await?
        };
        info!(
            "Credits job {} submitted with {} images",
            job.id, job.total_images
        );
        self.session.refresh_user().await;
        Ok(job)
    }

    pub async fn buy_credits(&self, credits: u32) -> Result<PaymentIntent, ClientError> {
        if credits == 0 {
            return Err(ClientError::InvalidInput(
                "Credits must be at least 1".to_string(),
            ));
        }
        self.session.require_user()?;
        let intent = self.api.create_payment_intent(credits).await?;
        info!("Payment intent created for {} credits", credits);
        Ok(intent)
    }
}
