//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use disparo_common::types::{
    ApiKeyId, CampaignContactId, CampaignId, CampaignLogId, ContactId, InstanceId, JobId,
    ScheduleSpec, TenantId, VariantId,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Gateway connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Open,
    Closed,
    Connecting,
    QrPending,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::QrPending => write!(f, "qr_pending"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ConnectionState::Open),
            "closed" => Ok(ConnectionState::Closed),
            "connecting" => Ok(ConnectionState::Connecting),
            "qr_pending" => Ok(ConnectionState::QrPending),
            "error" => Ok(ConnectionState::Error),
            _ => Err(format!("Invalid connection state: {}", s)),
        }
    }
}

/// Gateway instance model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Opaque identifier the gateway knows this connection by;
    /// appears in gateway URL paths
    pub gateway_name: String,
    pub base_url: String,
    pub api_key: String,
    pub connection_state: String,
    pub health_score: i32,
    pub msgs_sent_today: i32,
    pub last_reset_date: Option<NaiveDate>,
    /// Operating timezone for the daily counter reset
    pub timezone: String,
    pub default_department: Option<String>,
    pub last_check_error: Option<String>,
    pub consecutive_check_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Get connection state enum
    pub fn connection_state_enum(&self) -> Option<ConnectionState> {
        self.connection_state.parse().ok()
    }

    /// Whether the instance has a live gateway session
    pub fn is_connected(&self) -> bool {
        self.connection_state_enum() == Some(ConnectionState::Open)
    }
}

/// Create instance input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstance {
    pub tenant_id: TenantId,
    pub name: String,
    pub gateway_name: String,
    pub base_url: String,
    pub api_key: String,
    pub timezone: Option<String>,
    pub default_department: Option<String>,
}

/// Update instance input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInstance {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timezone: Option<String>,
    pub default_department: Option<String>,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Instance rotation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    RoundRobin,
    Balanced,
    Intelligent,
}

impl std::fmt::Display for RotationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationMode::RoundRobin => write!(f, "round_robin"),
            RotationMode::Balanced => write!(f, "balanced"),
            RotationMode::Intelligent => write!(f, "intelligent"),
        }
    }
}

impl std::str::FromStr for RotationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(RotationMode::RoundRobin),
            "balanced" => Ok(RotationMode::Balanced),
            "intelligent" => Ok(RotationMode::Intelligent),
            _ => Err(format!("Invalid rotation mode: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub rotation_mode: String,
    /// Durable round-robin position; meaningless for other modes
    pub rotation_cursor: i32,
    pub interval_min_s: i32,
    pub interval_max_s: i32,
    /// 0 means unlimited
    pub daily_limit_per_instance: i32,
    pub pause_on_health_below: i32,
    pub schedule: Json<ScheduleSpec>,
    pub total_contacts: i32,
    pub messages_sent: i32,
    pub messages_delivered: i32,
    pub messages_read: i32,
    pub messages_failed: i32,
    pub next_scheduled_send_at: Option<DateTime<Utc>>,
    pub last_send_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Set by the engine when it pauses the campaign on its own
    pub is_paused: bool,
    pub auto_pause_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Get rotation mode enum
    pub fn rotation_mode_enum(&self) -> Option<RotationMode> {
        self.rotation_mode.parse().ok()
    }

    /// The parsed schedule document
    pub fn schedule_spec(&self) -> &ScheduleSpec {
        &self.schedule.0
    }

    /// Whether the dispatch loop should keep running this campaign
    pub fn is_dispatchable(&self) -> bool {
        self.status_enum() == Some(CampaignStatus::Running) && !self.is_paused
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_contacts == 0 {
            0.0
        } else {
            ((self.messages_sent + self.messages_failed) as f64 / self.total_contacts as f64)
                * 100.0
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub rotation_mode: RotationMode,
    pub interval_min_s: i32,
    pub interval_max_s: i32,
    pub daily_limit_per_instance: Option<i32>,
    pub pause_on_health_below: Option<i32>,
    pub schedule: ScheduleSpec,
}

/// Update campaign input (draft campaigns only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rotation_mode: Option<RotationMode>,
    pub interval_min_s: Option<i32>,
    pub interval_max_s: Option<i32>,
    pub daily_limit_per_instance: Option<i32>,
    pub pause_on_health_below: Option<i32>,
    pub schedule: Option<ScheduleSpec>,
}

/// Message variant model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageVariant {
    pub id: VariantId,
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    /// Position 1..=5, unique within a campaign
    pub variant_order: i32,
    pub text: String,
    pub is_active: bool,
    pub times_sent: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create message variant input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVariant {
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub variant_order: i32,
    pub text: String,
    pub is_active: Option<bool>,
}

/// Update message variant input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateVariant {
    pub text: Option<String>,
    pub is_active: Option<bool>,
}

/// Contact model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    /// E.164, with leading `+`
    pub phone: String,
    pub name: Option<String>,
    pub custom_fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Look up a custom field as a string
    pub fn custom_field(&self, key: &str) -> Option<&str> {
        self.custom_fields.get(key).and_then(|v| v.as_str())
    }
}

/// Create contact input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContact {
    pub tenant_id: TenantId,
    pub phone: String,
    pub name: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
}

/// Per-contact delivery status within a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    /// Whether a transition to `next` is legal
    ///
    /// Status only moves forward; the one sanctioned reversal is
    /// `sending` back to `pending` when a send is abandoned.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (Sending, Pending)
                | (Sending, Sent)
                | (Sending, Failed)
                | (Sent, Delivered)
                | (Sent, Read)
                | (Sent, Failed)
                | (Delivered, Read)
                | (Delivered, Failed)
        )
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sending => write!(f, "sending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Read => write!(f, "read"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sending" => Ok(DeliveryStatus::Sending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            "failed" => Ok(DeliveryStatus::Failed),
            "skipped" => Ok(DeliveryStatus::Skipped),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// Campaign contact model - one row per (campaign, contact)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignContact {
    pub id: CampaignContactId,
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub variant_used: Option<VariantId>,
    /// Gateway name of the instance that carried the send
    pub instance_used: Option<String>,
    pub external_msg_id: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignContact {
    /// Get status enum
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        self.status.parse().ok()
    }
}

/// Campaign log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSeverity::Info => write!(f, "info"),
            LogSeverity::Warning => write!(f, "warning"),
            LogSeverity::Error => write!(f, "error"),
            LogSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for LogSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogSeverity::Info),
            "warning" => Ok(LogSeverity::Warning),
            "error" => Ok(LogSeverity::Error),
            "critical" => Ok(LogSeverity::Critical),
            _ => Err(format!("Invalid log severity: {}", s)),
        }
    }
}

/// Campaign log entry model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignLog {
    pub id: CampaignLogId,
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub severity: String,
    /// Machine-readable event name, e.g. `campaign_started`
    pub event_type: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Create campaign log input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignLog {
    pub tenant_id: TenantId,
    pub campaign_id: CampaignId,
    pub severity: LogSeverity,
    pub event_type: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

/// Job queue model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lease row - cluster-wide exclusive ownership with expiry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lease {
    pub key: String,
    pub holder: uuid::Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Phone lock row - serializes in-flight sends per destination number
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PhoneLock {
    pub key: String,
    pub holder: uuid::Uuid,
    pub expires_at: DateTime<Utc>,
}

/// API key model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at < Utc::now(),
            None => false,
        }
    }

    pub fn scopes_vec(&self) -> Vec<String> {
        serde_json::from_value(self.scopes.clone()).unwrap_or_default()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        let scopes = self.scopes_vec();
        scopes.iter().any(|s| s == scope || s == "*")
    }
}

/// Campaign statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub status: String,
    pub is_paused: bool,
    pub auto_pause_reason: Option<String>,
    pub total_contacts: i32,
    pub messages_sent: i32,
    pub messages_delivered: i32,
    pub messages_read: i32,
    pub messages_failed: i32,
    pub pending_contacts: i64,
    pub sending_contacts: i64,
    pub sent_contacts: i64,
    pub delivered_contacts: i64,
    pub read_contacts: i64,
    pub failed_contacts: i64,
    pub skipped_contacts: i64,
    pub progress_percentage: f64,
    pub next_scheduled_send_at: Option<DateTime<Utc>>,
    pub last_send_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_roundtrip() {
        for s in ["open", "closed", "connecting", "qr_pending", "error"] {
            let state: ConnectionState = s.parse().unwrap();
            assert_eq!(state.to_string(), s);
        }
        assert!("banana".parse::<ConnectionState>().is_err());
    }

    #[test]
    fn test_campaign_status_terminal() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
    }

    #[test]
    fn test_delivery_status_transitions() {
        use DeliveryStatus::*;

        assert!(Pending.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Pending));
        assert!(Sending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Read));
        assert!(Delivered.can_transition_to(Read));

        // Never backwards past the sending revert
        assert!(!Sent.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Failed.can_transition_to(Pending));
        // Read and failed are final for the row
        assert!(!Read.can_transition_to(Failed));
    }

    #[test]
    fn test_rotation_mode_parse() {
        assert_eq!(
            "intelligent".parse::<RotationMode>().unwrap(),
            RotationMode::Intelligent
        );
        assert_eq!(RotationMode::RoundRobin.to_string(), "round_robin");
    }
}
