//! Posts lifecycle events as JSON to an external history endpoint.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::Client;
use tokio::time::sleep;

use crate::history::{HistoryError, HistoryEvent, HistoryWriter};

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct WebhookHistoryWriter {
    client: Client,
    config: WebhookConfig,
}

impl WebhookHistoryWriter {
    pub fn new(config: WebhookConfig) -> Result<Self, HistoryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HistoryError::Network(e.to_string()))?;
        info!("History events go to {}", config.url);
        Ok(Self { client, config })
    }

    async fn post_with_retry(&self, data: &str) -> Result<(), HistoryError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_request(data).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("History event posted on attempt {}", attempt);
                    }
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "History post attempt {} failed ({}), retrying in {:?}",
                        attempt, e, self.config.retry_delay
                    );
                    sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("All {} history post attempts failed", attempts);
                    return Err(e);
                }
            }
        }
    }

    async fn send_request(&self, data: &str) -> Result<(), HistoryError> {
        debug!("Sending history event to: {}", self.config.url);
        let response = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(data.to_string())
            .send()
            .await
            .map_err(|e| HistoryError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryWriter for WebhookHistoryWriter {
    async fn write(&self, event: &HistoryEvent) -> Result<(), HistoryError> {
        let data = serde_json::to_string(event)
            .map_err(|e| HistoryError::Serialization(e.to_string()))?;
        self.post_with_retry(&data).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use media_server::ActiveStream;
    use serde_json::Value;

    use super::*;
    use crate::reconciler::SessionEvent;

    #[derive(Clone, Default)]
    struct Receiver {
        failures_left: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn receive(State(r): State<Receiver>, body: String) -> StatusCode {
        r.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = r
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        if let Ok(value) = serde_json::from_str(&body) {
            r.bodies.lock().unwrap().push(value);
        }
        StatusCode::OK
    }

    async fn spawn_receiver(failures: usize) -> (String, Receiver) {
        let receiver = Receiver::default();
        receiver.failures_left.store(failures, Ordering::SeqCst);
        let app = Router::new()
            .route("/history", post(receive))
            .with_state(receiver.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/history", addr), receiver)
    }

    fn writer(url: String, retry_attempts: u32) -> WebhookHistoryWriter {
        WebhookHistoryWriter::new(WebhookConfig {
            url,
            timeout: Duration::from_secs(5),
            retry_attempts,
            retry_delay: Duration::from_millis(10),
        })
        .unwrap()
    }

    fn ended() -> HistoryEvent {
        HistoryEvent::from(&SessionEvent::Ended(ActiveStream {
            server_id: "plex".to_string(),
            session_id: "12".to_string(),
            progress_ms: 42_000,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn retries_until_accepted() {
        let _ = env_logger::try_init();
        let (url, receiver) = spawn_receiver(2).await;
        writer(url, 3).write(&ended()).await.unwrap();

        assert_eq!(receiver.attempts.load(Ordering::SeqCst), 3);
        let bodies = receiver.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["event"], "session.ended");
        assert_eq!(bodies[0]["stream"]["session_id"], "12");
        assert_eq!(bodies[0]["stream"]["progress_ms"], 42_000);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let (url, receiver) = spawn_receiver(10).await;
        let err = writer(url, 2).write(&ended()).await.unwrap_err();
        assert!(matches!(err, HistoryError::Http { status: 503, .. }));
        assert_eq!(receiver.attempts.load(Ordering::SeqCst), 2);
    }
}
