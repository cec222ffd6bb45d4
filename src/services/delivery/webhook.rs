//! Webhook delivery channel.
//!
//! Each recipient address is an HTTPS endpoint; the notice is POSTed as
//! JSON. One shared client keeps connection pooling across runs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::provider::{DeliveryChannel, DeliveryNotice, DeliveryReceipt};

pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .use_rustls_tls()
            .build()
            .expect("Failed to build HTTP client");

        Self { client }
    }

    async fn deliver_one(&self, recipient: &str, notice: &DeliveryNotice) -> DeliveryReceipt {
        let start = Instant::now();

        if !recipient.starts_with("https://") && !recipient.starts_with("http://") {
            return DeliveryReceipt {
                recipient: recipient.to_string(),
                success: false,
                detail: Some("recipient is not an http(s) URL".to_string()),
                duration_ms: 0,
            };
        }

        let response = self.client.post(recipient).json(notice).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(resp) => {
                let success = resp.status().is_success();
                DeliveryReceipt {
                    recipient: recipient.to_string(),
                    success,
                    detail: Some(resp.status().to_string()),
                    duration_ms,
                }
            }
            Err(e) => DeliveryReceipt {
                recipient: recipient.to_string(),
                success: false,
                detail: Some(e.to_string()),
                duration_ms,
            },
        }
    }
}

#[async_trait]
impl DeliveryChannel for WebhookDelivery {
    async fn deliver(&self, recipients: &[String], notice: &DeliveryNotice) -> Vec<DeliveryReceipt> {
        let mut receipts = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let receipt = self.deliver_one(recipient, notice).await;
            if receipt.success {
                debug!(recipient = %recipient, run_id = %notice.run_id, "report delivered");
            } else {
                warn!(
                    recipient = %recipient,
                    run_id = %notice.run_id,
                    detail = receipt.detail.as_deref().unwrap_or(""),
                    "report delivery failed"
                );
            }
            receipts.push(receipt);
        }
        receipts
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
