use serde_json::json;
use tracing::info;
use url::Url;

use super::client::ApiClient;
use super::types::{AccessToken, MessageResponse, OAuthProvider, RegisterRequest, User, UserUpdate};
use crate::error::ClientError;

impl ApiClient {
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<User, ClientError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::InvalidInput(
                "Email and password are required".to_string(),
            ));
        }
        info!("Registering account for {}", email);
        let body = RegisterRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            full_name: full_name.map(str::to_string),
        };
        self.post_json("auth/register", &body).await
    }

    /// Exchange credentials for a bearer token. The endpoint takes an OAuth2
    /// password form, so the email goes in `username`.
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AccessToken, ClientError> {
        info!("Logging in as {}", email);
        self.post_form(
            "auth/login",
            &[("username", email.trim()), ("password", password)],
        )
        .await
    }

    pub async fn verify_email(&self, token: &str) -> Result<MessageResponse, ClientError> {
        if token.trim().is_empty() {
            return Err(ClientError::InvalidInput(
                "Verification token is missing".to_string(),
            ));
        }
        self.post_json("auth/verify-email", &json!({ "token": token.trim() }))
            .await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<MessageResponse, ClientError> {
        self.post_json("auth/resend-verification", &json!({ "email": email.trim() }))
            .await
    }

    /// Provider consent page. This is a browser destination, never fetched.
    pub fn oauth_authorize_url(&self, provider: OAuthProvider) -> Result<Url, ClientError> {
        self.endpoint(&format!("auth/oauth/{}/authorize", provider.as_str()))
    }

    pub async fn get_me(&self) -> Result<User, ClientError> {
        self.get_json("users/me").await
    }

    pub async fn update_me(&self, update: &UserUpdate) -> Result<User, ClientError> {
        self.put_json("users/me", update).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ClientConfig;
    use crate::navigator::RecordingNavigator;
    use crate::token::MemoryTokenStore;

    #[test]
    fn test_oauth_urls() {
        let config = ClientConfig {
            api_base_url: "https://grad.example.com/api".into(),
            ..Default::default()
        };
        let client = ApiClient::new(
            &config,
            Arc::new(MemoryTokenStore::new()),
            Arc::new(RecordingNavigator::new()),
        )
        .unwrap();
        assert_eq!(
            client.oauth_authorize_url(OAuthProvider::Google).unwrap().as_str(),
            "https://grad.example.com/api/auth/oauth/google/authorize"
        );
        assert_eq!(
            client
                .oauth_authorize_url("Microsoft".parse().unwrap())
                .unwrap()
                .as_str(),
            "https://grad.example.com/api/auth/oauth/microsoft/authorize"
        );
    }

    #[test]
    fn test_update_skips_unset_fields() {
        let update = UserUpdate {
            full_name: Some("Ada".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"full_name":"Ada"}"#
        );
    }
}
