//! Order-management collaborator boundary.
//!
//! A definitive "no such record" verification should not leave the
//! originating order stuck pending; the orchestrator signals this
//! collaborator to cancel it with a refund. Everything else about orders —
//! fees, balances, status CRUD — lives in the dashboard service behind
//! this boundary.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait OrderDirectory: Send + Sync {
    /// Cancel `order_id` and refund its fee. `reason` is recorded on the
    /// order for the operator.
    async fn cancel_with_refund(&self, order_id: &str, reason: &str) -> Result<()>;
}

/// Used when no order service is configured; the verification outcome is
/// still returned to the caller, which owns the order in that deployment.
pub struct NullOrderDirectory;

#[async_trait]
impl OrderDirectory for NullOrderDirectory {
    async fn cancel_with_refund(&self, order_id: &str, _reason: &str) -> Result<()> {
        info!(
            "orders: no order service configured — skipping auto-cancel of {}",
            order_id
        );
        Ok(())
    }
}

fn cancel_url(base_url: &str, order_id: &str) -> String {
    format!("{}/orders/{}/cancel", base_url.trim_end_matches('/'), order_id)
}

/// HTTP-backed collaborator. Transport failures and 5xx responses are
/// retried with exponential backoff; 4xx responses are permanent.
pub struct HttpOrderDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOrderDirectory {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl OrderDirectory for HttpOrderDirectory {
    async fn cancel_with_refund(&self, order_id: &str, reason: &str) -> Result<()> {
        let url = cancel_url(&self.base_url, order_id);
        let body = serde_json::json!({
            "order_id": order_id,
            "reason": reason,
            "refund": true,
        });

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(10)))
            .build();

        retry(policy, || {
            let url = url.clone();
            let body = body.clone();
            async move {
                let resp = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| {
                        warn!("orders: cancel request transport error: {}", e);
                        backoff::Error::transient(anyhow!("cancel request failed: {}", e))
                    })?;
                let status = resp.status();
                if status.is_success() {
                    Ok(())
                } else if status.is_server_error() {
                    Err(backoff::Error::transient(anyhow!(
                        "order service returned {}",
                        status
                    )))
                } else {
                    Err(backoff::Error::permanent(anyhow!(
                        "order service rejected cancel with {}",
                        status
                    )))
                }
            }
        })
        .await?;

        info!("orders: cancelled {} with refund ({})", order_id, reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_url_shape() {
        assert_eq!(
            cancel_url("http://localhost:9000/", "ord-42"),
            "http://localhost:9000/orders/ord-42/cancel"
        );
        assert_eq!(
            cancel_url("http://localhost:9000", "ord-42"),
            "http://localhost:9000/orders/ord-42/cancel"
        );
    }

    #[tokio::test]
    async fn null_directory_accepts_everything() {
        NullOrderDirectory
            .cancel_with_refund("ord-1", "No Record Found")
            .await
            .unwrap();
    }
}
