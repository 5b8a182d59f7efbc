//! Webhook callback delivery
//!
//! One POST per finished job. Any 2xx counts as delivered; anything else is
//! logged and the job stays closed, so a broken callback endpoint can never
//! reopen work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use vocalbridge_core::{Error, Result, types::JobType};

/// The JSON envelope POSTed to the callback URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackEnvelope {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

pub struct CallbackClient {
    client: reqwest::Client,
}

impl CallbackClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build callback client: {}", e)))?;
        Ok(Self { client })
    }

    /// Deliver one callback. Returns whether a 2xx came back.
    pub async fn deliver(&self, url: &str, envelope: &CallbackEnvelope) -> bool {
        let response = self
            .client
            .post(url)
            .header("X-Job-ID", envelope.job_id.to_string())
            .json(envelope)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                info!(job_id = %envelope.job_id, url, "Callback delivered");
                true
            }
            Ok(response) => {
                warn!(
                    job_id = %envelope.job_id,
                    url,
                    status = response.status().as_u16(),
                    "Callback endpoint returned non-2xx"
                );
                false
            }
            Err(err) => {
                warn!(job_id = %envelope.job_id, url, error = %err, "Callback delivery failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope() -> CallbackEnvelope {
        CallbackEnvelope {
            job_id: Uuid::new_v4(),
            job_type: JobType::SendMessage,
            status: "COMPLETED".into(),
            result: Some(serde_json::json!({"content": "hi"})),
            error: None,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_delivery_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("X-Job-ID"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = CallbackClient::new().unwrap();
        let delivered = client
            .deliver(&format!("{}/hook", server.uri()), &envelope())
            .await;
        assert!(delivered);
    }

    #[tokio::test]
    async fn test_non_2xx_is_not_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = CallbackClient::new().unwrap();
        let delivered = client.deliver(&server.uri(), &envelope()).await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_not_delivered() {
        let client = CallbackClient::new().unwrap();
        let delivered = client
            .deliver("http://127.0.0.1:1/hook", &envelope())
            .await;
        assert!(!delivered);
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env = envelope();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "SEND_MESSAGE");
        assert_eq!(json["status"], "COMPLETED");
        assert!(json.get("jobId").is_some());
        assert!(json.get("completedAt").is_some());
        assert!(json.get("error").is_none());
    }
}
