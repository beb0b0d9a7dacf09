use serde_json::json;

use super::client::ApiClient;
use super::types::{MessageResponse, ReferralLink, ReferralList, ReferralStats};
use crate::error::ClientError;

impl ApiClient {
    pub async fn referral_stats(&self) -> Result<ReferralStats, ClientError> {
        self.get_json("referrals/stats").await
    }

    /// Creates the user's referral code on first call.
    pub async fn referral_link(&self) -> Result<ReferralLink, ClientError> {
        self.get_json("referrals/link").await
    }

    pub async fn referral_list(&self) -> Result<ReferralList, ClientError> {
        self.get_json("referrals/list").await
    }

    pub async fn track_referral(&self, referral_code: &str) -> Result<MessageResponse, ClientError> {
        let code = referral_code.trim();
        if code.is_empty() {
            return Err(ClientError::InvalidInput("Referral code is empty".to_string()));
        }
        self.post_json("referrals/track", &json!({ "referral_code": code }))
            .await
    }
}
