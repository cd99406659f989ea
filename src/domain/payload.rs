//! Alert payloads delivered to webhook endpoints.
//!
//! Payloads are built once per alert and never modified afterwards. Identifying
//! fields are masked while the payload is constructed, so a payload value can
//! be logged or serialized without leaking raw phone numbers or identifiers.

use crate::domain::masking::{mask_identifier, mask_phone};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of alert carried by a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// A profile scored as high risk
    #[serde(rename = "profile.high_risk")]
    HighRiskDetected,
    /// A profile was blocked outright
    #[serde(rename = "profile.blocked")]
    ProfileBlocked,
    /// A batch of profiles finished processing
    #[serde(rename = "batch.completed")]
    BatchCompleted,
    /// Synthetic no-op used to check endpoint reachability
    #[serde(rename = "webhook.verification")]
    Verification,
}

impl WebhookEvent {
    /// Wire name, also sent in the `X-Webhook-Event` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::HighRiskDetected => "profile.high_risk",
            WebhookEvent::ProfileBlocked => "profile.blocked",
            WebhookEvent::BatchCompleted => "batch.completed",
            WebhookEvent::Verification => "webhook.verification",
        }
    }
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk bucket derived from a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a score: `<40` low, `<70` medium, `<90` high, otherwise critical.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => RiskLevel::Low,
            40..=69 => RiskLevel::Medium,
            70..=89 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// Suggested action for the receiver of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Allow,
    Review,
    Block,
}

impl From<RiskLevel> for Recommendation {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Recommendation::Allow,
            RiskLevel::Medium | RiskLevel::High => Recommendation::Review,
            RiskLevel::Critical => Recommendation::Block,
        }
    }
}

/// Risk score with the factors that contributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Score from 0 (benign) to 100 (certain fraud)
    pub score: u8,
    /// Bucket derived from the score
    pub level: RiskLevel,
    /// Human-readable contributing factors
    pub factors: Vec<String>,
}

impl RiskAssessment {
    /// Build an assessment, clamping the score to 100 and deriving the level.
    pub fn new(score: u8, factors: Vec<String>) -> Self {
        let score = score.min(100);
        Self {
            score,
            level: RiskLevel::from_score(score),
            factors,
        }
    }

    /// The maximum-risk assessment used for blocked profiles.
    pub fn maximum(factors: Vec<String>) -> Self {
        Self::new(100, factors)
    }
}

/// Raw identifying fields of a profile, as supplied by the caller.
///
/// This type is deliberately not serializable; it only exists to be turned
/// into a [`MaskedProfile`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProfileIdentity {
    /// Phone number in any formatting
    pub phone: Option<String>,
    /// Opaque profile or customer identifier
    pub id: Option<String>,
}

impl ProfileIdentity {
    /// Identity with both a phone number and an identifier.
    pub fn new(phone: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            id: Some(id.into()),
        }
    }
}

impl fmt::Debug for ProfileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = MaskedProfile::from(self);
        f.debug_struct("ProfileIdentity")
            .field("phone", &masked.phone)
            .field("id", &masked.id)
            .finish()
    }
}

/// Profile fields safe to include in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedProfile {
    /// Masked phone number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Masked identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl From<&ProfileIdentity> for MaskedProfile {
    fn from(identity: &ProfileIdentity) -> Self {
        Self {
            phone: identity.phone.as_deref().map(mask_phone),
            id: identity.id.as_deref().map(mask_identifier),
        }
    }
}

/// Totals reported when a batch finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Profiles processed
    pub total: u64,
    /// Profiles flagged as high risk
    pub high_risk: u64,
    /// Profiles blocked
    pub blocked: u64,
    /// Wall time spent on the batch
    pub duration_ms: u64,
}

/// Origin information attached to every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    /// Emitting system
    pub source: String,
    /// Deployment environment
    pub environment: String,
    /// Id correlating this alert with logs on both sides
    pub correlation_id: String,
}

impl PayloadMetadata {
    /// Metadata with a fresh random correlation id.
    pub fn new(source: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            environment: environment.into(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Alert body posted to a webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<MaskedProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSummary>,
    pub metadata: PayloadMetadata,
}

impl WebhookPayload {
    /// Alert for a profile whose score crossed the high-risk line.
    ///
    /// The recommendation follows the risk level unless overridden by the caller.
    pub fn high_risk(
        identity: &ProfileIdentity,
        risk: RiskAssessment,
        metadata: PayloadMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let recommendation = Recommendation::from(risk.level);
        Self {
            event: WebhookEvent::HighRiskDetected,
            timestamp,
            profile: Some(MaskedProfile::from(identity)),
            risk: Some(risk),
            recommendation: Some(recommendation),
            batch: None,
            metadata,
        }
    }

    /// Alert for a blocked profile. Risk is forced to the maximum and the
    /// recommendation to block.
    pub fn profile_blocked(
        identity: &ProfileIdentity,
        factors: Vec<String>,
        metadata: PayloadMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event: WebhookEvent::ProfileBlocked,
            timestamp,
            profile: Some(MaskedProfile::from(identity)),
            risk: Some(RiskAssessment::maximum(factors)),
            recommendation: Some(Recommendation::Block),
            batch: None,
            metadata,
        }
    }

    /// Summary sent once a batch run completes.
    pub fn batch_completed(
        summary: BatchSummary,
        metadata: PayloadMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event: WebhookEvent::BatchCompleted,
            timestamp,
            profile: None,
            risk: None,
            recommendation: None,
            batch: Some(summary),
            metadata,
        }
    }

    /// Synthetic payload carrying no profile data.
    pub fn verification(metadata: PayloadMetadata, timestamp: DateTime<Utc>) -> Self {
        Self {
            event: WebhookEvent::Verification,
            timestamp,
            profile: None,
            risk: None,
            recommendation: None,
            batch: None,
            metadata,
        }
    }

    /// Timestamp as sent in the `X-Webhook-Timestamp` header.
    pub fn timestamp_header(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}
