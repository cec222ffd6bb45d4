//! Delivery channel abstraction.
//!
//! Delivery is best-effort: a channel never fails the run it serves. Each
//! recipient gets an independent attempt, and the outcome feeds the run's
//! `delivered_to` record, which reflects who was actually reached, not who
//! was configured.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

/// Notification sent to each recipient once a report run succeeds.
///
/// Carries artifact metadata and the single-use plaintext download token.
/// This is the only place the plaintext token ever appears; the store keeps
/// just its hash.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryNotice {
    pub run_id: Uuid,
    pub schedule_name: String,
    pub report_key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub download_token: String,
    pub download_expires_at: NaiveDateTime,
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub recipient: String,
    pub success: bool,
    /// HTTP status, transport error, or other channel-specific detail
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Trait for delivery channels (webhook, e-mail relay, etc.)
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Attempt delivery to every recipient; one receipt per recipient, in
    /// the same order. Must not error out as a whole: per-recipient
    /// failures are receipts with `success = false`.
    async fn deliver(&self, recipients: &[String], notice: &DeliveryNotice) -> Vec<DeliveryReceipt>;

    /// Channel name for logging
    fn name(&self) -> &'static str;
}
