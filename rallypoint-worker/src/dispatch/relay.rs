/// HTTP mail relay dispatcher
///
/// Posts each batch as one JSON document to a relay endpoint that owns the
/// actual SMTP delivery:
///
/// ```json
/// { "messages": [ { "subject": "...", "body_text": "...", "from": "...", "to": ["..."] } ] }
/// ```
///
/// # Security
///
/// The request body is signed with HMAC-SHA256 using the shared relay secret.
/// The lowercase hex digest is sent in the `X-Rallypoint-Signature` header;
/// the relay must recompute it over the raw body before accepting the batch.

use crate::dispatch::{DispatchError, DispatchResult, Dispatcher, OutboundMessage};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

/// Signature header name
pub const SIGNATURE_HEADER: &str = "X-Rallypoint-Signature";

/// Upper bound on one batch POST
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RelayBatch<'a> {
    messages: &'a [OutboundMessage],
}

/// Relay dispatcher implementation
#[derive(Debug, Clone)]
pub struct RelayDispatcher {
    client: reqwest::Client,
    url: String,
    secret: Vec<u8>,
}

impl RelayDispatcher {
    /// Creates a relay dispatcher
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not http(s) or the secret is empty.
    pub fn new(url: String, secret: Vec<u8>) -> DispatchResult<Self> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DispatchError::Transport(format!(
                "relay URL must be http:// or https://, got '{}'",
                url
            )));
        }
        if secret.is_empty() {
            return Err(DispatchError::Transport("relay secret is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(RelayDispatcher { client, url, secret })
    }

    /// Hex HMAC-SHA256 of `payload` under the relay secret
    pub fn sign(&self, payload: &[u8]) -> DispatchResult<String> {
        sign_payload(&self.secret, payload)
    }
}

fn sign_payload(secret: &[u8], payload: &[u8]) -> DispatchResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| DispatchError::Transport(format!("invalid relay secret: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Dispatcher for RelayDispatcher {
    fn name(&self) -> &str {
        "relay"
    }

    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> DispatchResult<usize> {
        if messages.is_empty() {
            return Ok(0);
        }
        for message in &messages {
            message.validate()?;
        }

        let body = serde_json::to_vec(&RelayBatch {
            messages: &messages,
        })
        .map_err(|e| DispatchError::InvalidMessage(e.to_string()))?;
        let signature = self.sign(&body)?;

        tracing::debug!(url = %self.url, count = messages.len(), "Posting batch to relay");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Relay rejected batch");
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(messages.len())
    }
}
