use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Accepts RFC 3339 (with offset) or the backend's naive ISO-8601 form,
/// which is UTC.
fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

// === Accounts ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Legacy per-image balance; only meaningful under the credits model.
    #[serde(default)]
    pub credits: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub email_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub oauth_provider: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_used_free_tier: bool,
    #[serde(default)]
    pub has_purchased_premium: bool,
    #[serde(default)]
    pub referral_discount_eligible: bool,
    #[serde(default)]
    pub referral_code: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

/// Fields a user may change on their own account. Unset fields are omitted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Acknowledgement bodies: `{"message": ...}`, `{"status": ...}` or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl MessageResponse {
    pub fn text(&self) -> &str {
        self.message
            .as_deref()
            .or(self.detail.as_deref())
            .or(self.status.as_deref())
            .unwrap_or("OK")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Microsoft,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Microsoft => "microsoft",
        }
    }
}

impl std::str::FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "microsoft" => Ok(OAuthProvider::Microsoft),
            other => Err(format!("Unknown OAuth provider: {}", other)),
        }
    }
}

// === Generation ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct University {
    pub name: String,
    #[serde(default)]
    pub degree_levels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UniversityList {
    pub universities: Vec<University>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position in the forward-only lifecycle. All terminal states share the
    /// last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output artifact of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: i64,
    pub original_filename: String,
    #[serde(default)]
    pub output_image_path: Option<String>,
    /// `None` while the image is still being produced.
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Absent on older responses; [`GenerationJob::watermark_images`] fills
    /// it from the job.
    #[serde(default)]
    pub is_watermarked: Option<bool>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl GeneratedImage {
    pub fn is_ready(&self) -> bool {
        self.success == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: i64,
    #[serde(default)]
    pub job_type: String,
    pub status: JobStatus,
    #[serde(default)]
    pub university: Option<String>,
    #[serde(default)]
    pub degree_level: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    pub total_images: u32,
    pub completed_images: u32,
    #[serde(default)]
    pub failed_images: u32,
    #[serde(default)]
    pub is_watermarked: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generated_images: Vec<GeneratedImage>,
}

impl GenerationJob {
    /// Fraction of images finished. A zero total reads as no progress.
    pub fn progress(&self) -> f64 {
        if self.total_images == 0 {
            return 0.0;
        }
        f64::from(self.completed_images) / f64::from(self.total_images)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Images inherit the job's watermark flag when the response omits it.
    pub fn watermark_images(mut self) -> Self {
        for image in &mut self.generated_images {
            if image.is_watermarked.is_none() {
                image.is_watermarked = Some(self.is_watermarked);
            }
        }
        self
    }
}

/// Lightweight polling response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub job_id: i64,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    pub completed_images: u32,
    pub total_images: u32,
    #[serde(default)]
    pub message: Option<String>,
}

// === Tier and payments ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Premium,
    PremiumExhausted,
    NeedsPayment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStatus {
    pub tier: Tier,
    #[serde(default)]
    pub has_used_free_tier: bool,
    #[serde(default)]
    pub has_purchased_premium: bool,
    #[serde(default)]
    pub premium_generations_used: u32,
    #[serde(default)]
    pub premium_generations_remaining: u32,
    #[serde(default)]
    pub can_generate: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingInfo {
    pub base_price: f64,
    #[serde(default)]
    pub discounted_price: Option<f64>,
    #[serde(default)]
    pub discount_available: bool,
    /// `"referral"` or `"promo_code"`.
    #[serde(default)]
    pub discount_source: Option<String>,
    #[serde(default)]
    pub referral_discount_eligible: bool,
    #[serde(default)]
    pub referrals_completed: u32,
    #[serde(default)]
    pub referrals_needed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoCodeValidation {
    pub valid: bool,
    #[serde(default)]
    pub discount_amount: Option<f64>,
    /// `"fixed"` or `"percentage"`.
    #[serde(default)]
    pub discount_type: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub session_url: String,
    pub amount: f64,
    pub original_price: f64,
    #[serde(default)]
    pub discount_applied: f64,
    #[serde(default)]
    pub discount_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub publishable_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub client_secret: String,
    #[serde(default)]
    pub payment_id: Option<i64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub credits: Option<u32>,
}

// === Referrals ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralStats {
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub total_referrals: u32,
    #[serde(default)]
    pub completed_referrals: u32,
    #[serde(default)]
    pub pending_referrals: u32,
    #[serde(default)]
    pub discount_eligible: bool,
    #[serde(default)]
    pub referrals_needed: u32,
    #[serde(default)]
    pub referrals_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralLink {
    pub referral_code: String,
    pub referral_link: String,
    pub stats: ReferralStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralInfo {
    #[serde(default)]
    pub email: Option<String>,
    pub status: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralList {
    pub referrals: Vec<ReferralInfo>,
    #[serde(default)]
    pub total_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_deserializes_backend_shape() {
        let json = r#"{
            "id": 12,
            "job_type": "tier",
            "status": "processing",
            "university": "University of Leeds",
            "degree_level": "Masters",
            "prompt_id": null,
            "total_images": 5,
            "completed_images": 2,
            "failed_images": 0,
            "is_watermarked": true,
            "error_message": null,
            "created_at": "2025-03-01T10:15:30.123456",
            "updated_at": null,
            "completed_at": null,
            "generated_images": [
                {"id": 1, "original_filename": "me.jpg", "output_image_path": "out/1.png",
                 "success": true, "error_message": null,
                 "created_at": "2025-03-01T10:15:31", "processed_at": null},
                {"id": 2, "original_filename": "me.jpg", "output_image_path": null,
                 "success": null, "error_message": null,
                 "created_at": "2025-03-01T10:15:31", "processed_at": null}
            ],
            "celery_task_id": "ignored"
        }"#;
        let job: GenerationJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(!job.is_terminal());
        assert!((job.progress() - 0.4).abs() < f64::EPSILON);
        assert!(job.created_at.is_some());

        let job = job.watermark_images();
        assert!(job.generated_images.iter().all(|i| i.is_watermarked == Some(true)));
        assert!(job.generated_images[0].is_ready());
        assert!(!job.generated_images[1].is_ready());
    }

    #[test]
    fn test_progress_guards_zero_total() {
        let job: GenerationJob = serde_json::from_str(
            r#"{"id": 1, "status": "pending", "total_images": 0, "completed_images": 0}"#,
        )
        .unwrap();
        assert_eq!(job.progress(), 0.0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Pending.rank() < JobStatus::Processing.rank());
        assert!(JobStatus::Processing.rank() < JobStatus::Cancelled.rank());
    }

    #[test]
    fn test_tier_wire_names() {
        let status: TierStatus = serde_json::from_str(
            r#"{"tier": "premium_exhausted", "has_used_free_tier": true,
                "has_purchased_premium": true, "premium_generations_used": 2,
                "premium_generations_remaining": 0, "can_generate": false,
                "message": "All premium generations used (2/2)"}"#,
        )
        .unwrap();
        assert_eq!(status.tier, Tier::PremiumExhausted);
        assert_eq!(
            serde_json::to_string(&Tier::NeedsPayment).unwrap(),
            "\"needs_payment\""
        );
    }

    #[test]
    fn test_rfc3339_timestamp_accepted() {
        let user: User = serde_json::from_str(
            r#"{"id": 3, "email": "a@b.com", "credits": 4,
                "created_at": "2025-01-02T03:04:05+00:00"}"#,
        )
        .unwrap();
        assert!(user.is_active);
        assert!(!user.has_used_free_tier);
        assert_eq!(
            user.created_at.unwrap().to_rfc3339(),
            "2025-01-02T03:04:05+00:00"
        );
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let result: Result<User, _> = serde_json::from_str(
            r#"{"id": 3, "email": "a@b.com", "created_at": "yesterday"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_message_response_text() {
        let msg: MessageResponse =
            serde_json::from_str(r#"{"status": "success", "message": "Image generation retry queued"}"#)
                .unwrap();
        assert_eq!(msg.text(), "Image generation retry queued");
        assert_eq!(MessageResponse::default().text(), "OK");
    }
}
