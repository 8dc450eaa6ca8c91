//! Gateway HTTP client
//!
//! Talks to the WhatsApp gateway over its HTTP API. Credentials are per
//! instance, so one shared client carries every request and the base
//! URL and api key ride in from the instance row.

use anyhow::{anyhow, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use disparo_common::config::GatewayConfig;
use disparo_storage::models::Instance;

/// How a send attempt finished, as far as the gateway is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The gateway accepted the message
    Success { external_msg_id: String },
    /// The gateway rejected the message; retrying will not help
    Terminal { error: String, auth_failure: bool },
    /// The attempt failed in a way that may heal (429, 5xx, network)
    Transient { error: String },
}

/// Connection state of one instance as the gateway reports it
#[derive(Debug, Clone)]
pub struct GatewayInstanceState {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: &'a str,
}

/// Raw send response; only the message key matters
#[derive(Debug, Default, Deserialize)]
struct SendTextResponse {
    #[serde(default)]
    key: MessageKey,
}

#[derive(Debug, Default, Deserialize)]
struct MessageKey {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct FetchInstancesEntry {
    #[serde(default)]
    instance: InstanceDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceDetail {
    #[serde(default)]
    instance_name: String,
    #[serde(default)]
    status: String,
}

/// Gateway HTTP client
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
}

impl GatewayClient {
    /// Create a new gateway client
    pub fn new(config: &GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Send a text message through an instance
    ///
    /// Every failure mode maps into a [`SendOutcome`]; the caller
    /// decides what each class means for the contact and the campaign.
    pub async fn send_text(&self, instance: &Instance, phone: &str, text: &str) -> SendOutcome {
        let url = format!(
            "{}/message/sendText/{}",
            instance.base_url.trim_end_matches('/'),
            instance.gateway_name
        );

        debug!("Sending message via {}", url);

        let response = self
            .client
            .post(&url)
            .header("apikey", &instance.api_key)
            .json(&SendTextRequest {
                number: phone,
                text,
            })
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Gateway request to {} failed: {}", instance.gateway_name, e);
                return SendOutcome::Transient {
                    error: format!("gateway request failed: {}", e),
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            // An accepted send without a message key still counts
            let body: SendTextResponse = response.json().await.unwrap_or_default();
            return SendOutcome::Success {
                external_msg_id: body.key.id,
            };
        }

        let body = response.text().await.unwrap_or_default();
        let error = format!("gateway returned {}: {}", status, truncate(&body, 300));

        if status == StatusCode::TOO_MANY_REQUESTS {
            SendOutcome::Transient { error }
        } else if status.is_client_error() {
            SendOutcome::Terminal {
                auth_failure: matches!(
                    status,
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ),
                error,
            }
        } else {
            SendOutcome::Transient { error }
        }
    }

    /// Fetch connection states for every instance hosted at a gateway
    /// base URL
    pub async fn fetch_instances(
        &self,
        base_url: &str,
        api_key: &str,
    ) -> Result<Vec<GatewayInstanceState>> {
        let url = format!("{}/instance/fetchInstances", base_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .header("apikey", api_key)
            .send()
            .await
            .map_err(|e| anyhow!("gateway fetchInstances failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "gateway fetchInstances returned {}",
                response.status()
            ));
        }

        let entries: Vec<FetchInstancesEntry> = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse fetchInstances response: {}", e))?;

        Ok(entries
            .into_iter()
            .map(|entry| GatewayInstanceState {
                name: entry.instance.instance_name,
                status: entry.instance.status,
            })
            .collect())
    }

    /// Look up the reported state of one instance by its gateway name
    pub async fn fetch_instance_state(&self, instance: &Instance) -> Result<Option<String>> {
        let states = self
            .fetch_instances(&instance.base_url, &instance.api_key)
            .await?;

        Ok(states
            .into_iter()
            .find(|state| state.name == instance.gateway_name)
            .map(|state| state.status))
    }
}

/// Cut an error body down to something that fits in a log line and an
/// error column, respecting UTF-8 boundaries.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_instance(base_url: &str) -> Instance {
        Instance {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "primary".to_string(),
            gateway_name: "acme-01".to_string(),
            base_url: base_url.to_string(),
            api_key: "secret-key".to_string(),
            connection_state: "open".to_string(),
            health_score: 100,
            msgs_sent_today: 0,
            last_reset_date: None,
            timezone: "UTC".to_string(),
            default_department: None,
            last_check_error: None,
            consecutive_check_failures: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn client() -> GatewayClient {
        GatewayClient::new(&GatewayConfig::default())
    }

    #[tokio::test]
    async fn test_send_text_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme-01"))
            .and(header("apikey", "secret-key"))
            .and(body_json(serde_json::json!({
                "number": "+5511999999999",
                "text": "Oi Ana"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "key": { "id": "BAE5583C0A1B" },
                "status": "PENDING"
            })))
            .mount(&server)
            .await;

        let outcome = client()
            .send_text(&test_instance(&server.uri()), "+5511999999999", "Oi Ana")
            .await;

        assert_eq!(
            outcome,
            SendOutcome::Success {
                external_msg_id: "BAE5583C0A1B".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_send_text_success_without_message_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme-01"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "ok" })),
            )
            .mount(&server)
            .await;

        let outcome = client()
            .send_text(&test_instance(&server.uri()), "+5511999999999", "Oi")
            .await;

        assert_eq!(
            outcome,
            SendOutcome::Success {
                external_msg_id: String::new()
            }
        );
    }

    #[tokio::test]
    async fn test_send_text_auth_failure_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme-01"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "error": "invalid api key" })),
            )
            .mount(&server)
            .await;

        let outcome = client()
            .send_text(&test_instance(&server.uri()), "+5511999999999", "Oi")
            .await;

        match outcome {
            SendOutcome::Terminal {
                auth_failure,
                error,
            } => {
                assert!(auth_failure);
                assert!(error.contains("401"));
            }
            other => panic!("expected terminal outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_text_bad_request_is_terminal_not_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme-01"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "error": "number not on whatsapp" })),
            )
            .mount(&server)
            .await;

        let outcome = client()
            .send_text(&test_instance(&server.uri()), "+5511999999999", "Oi")
            .await;

        match outcome {
            SendOutcome::Terminal { auth_failure, .. } => assert!(!auth_failure),
            other => panic!("expected terminal outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_text_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme-01"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let outcome = client()
            .send_text(&test_instance(&server.uri()), "+5511999999999", "Oi")
            .await;

        assert!(matches!(outcome, SendOutcome::Transient { .. }));
    }

    #[tokio::test]
    async fn test_send_text_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/acme-01"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = client()
            .send_text(&test_instance(&server.uri()), "+5511999999999", "Oi")
            .await;

        assert!(matches!(outcome, SendOutcome::Transient { .. }));
    }

    #[tokio::test]
    async fn test_send_text_connection_refused_is_transient() {
        let outcome = client()
            .send_text(&test_instance("http://127.0.0.1:1"), "+5511999999999", "Oi")
            .await;

        assert!(matches!(outcome, SendOutcome::Transient { .. }));
    }

    #[tokio::test]
    async fn test_fetch_instance_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/fetchInstances"))
            .and(header("apikey", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "instance": { "instanceName": "acme-01", "instanceId": "i-1", "status": "open" } },
                { "instance": { "instanceName": "acme-02", "instanceId": "i-2", "status": "close" } }
            ])))
            .mount(&server)
            .await;

        let state = client()
            .fetch_instance_state(&test_instance(&server.uri()))
            .await
            .unwrap();

        assert_eq!(state, Some("open".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_instances_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/fetchInstances"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client().fetch_instances(&server.uri(), "secret-key").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 300), "short");
        let long = "é".repeat(200);
        let cut = truncate(&long, 301);
        assert!(cut.len() <= 301);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
