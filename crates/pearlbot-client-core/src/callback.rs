use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub const STORE_ACCESS_TOKEN_PATH: &str = "/callback/storeShopifyAccessToken";
pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 10_000;

/// Body posted to the PearlBot callback to link a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreAccessTokenPayload {
    pub bot_id: String,
    pub shop: String,
    pub is_online: bool,
    pub access_token: String,
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("pearlbot_callback_base_url_missing")]
    BaseUrlMissing,
    #[error("pearlbot_callback_request_failed:{message}")]
    Request { message: String },
    #[error("pearlbot_callback_read_failed:{message}")]
    Read { message: String },
    #[error("pearlbot_callback_http_{status}:{body}")]
    Rejected { status: u16, body: String },
    #[error("pearlbot_callback_decode_failed:{message}")]
    Decode { message: String },
}

#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn store_access_token(
        &self,
        api_key: &str,
        payload: &StoreAccessTokenPayload,
    ) -> Result<serde_json::Value, CallbackError>;
}

/// HTTP client for the PearlBot callback API. One attempt per call.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl CallbackClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        timeout_ms: u64,
    ) -> Result<Self, CallbackError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(CallbackError::BaseUrlMissing);
        }
        Ok(Self {
            base_url: base_url.to_string(),
            timeout: Duration::from_millis(timeout_ms.max(250)),
            http,
        })
    }

    pub fn store_access_token_url(&self) -> String {
        format!("{}{STORE_ACCESS_TOKEN_PATH}", self.base_url)
    }
}

#[async_trait]
impl CallbackTransport for CallbackClient {
    async fn store_access_token(
        &self,
        api_key: &str,
        payload: &StoreAccessTokenPayload,
    ) -> Result<serde_json::Value, CallbackError> {
        let response = self
            .http
            .post(self.store_access_token_url())
            .header(API_KEY_HEADER, api_key)
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|error| CallbackError::Request {
                message: error.to_string(),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| CallbackError::Read {
                message: error.to_string(),
            })?;

        if !status.is_success() {
            return Err(CallbackError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).trim().to_string(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|error| CallbackError::Decode {
            message: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    use super::*;

    #[test]
    fn blank_base_url_is_rejected() {
        let result = CallbackClient::new(reqwest::Client::new(), "  ", 1_000);
        assert!(matches!(result, Err(CallbackError::BaseUrlMissing)));
    }

    #[test]
    fn timeout_is_floored_at_250ms() -> anyhow::Result<()> {
        let client = CallbackClient::new(reqwest::Client::new(), "http://localhost", 0)?;
        assert_eq!(client.timeout, Duration::from_millis(250));
        let client = CallbackClient::new(reqwest::Client::new(), "http://localhost", 4_000)?;
        assert_eq!(client.timeout, Duration::from_secs(4));
        Ok(())
    }

    #[test]
    fn payload_uses_callback_field_names() {
        let payload = StoreAccessTokenPayload {
            bot_id: "bot-1".to_string(),
            shop: "demo.myshopify.com".to_string(),
            is_online: false,
            access_token: "shpat_1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&payload).expect("serialize payload"),
            json!({
                "botId": "bot-1",
                "shop": "demo.myshopify.com",
                "isOnline": false,
                "accessToken": "shpat_1",
            })
        );
    }

    #[tokio::test]
    async fn store_access_token_sends_api_key_and_maps_rejections() -> anyhow::Result<()> {
        let captured = Arc::new(Mutex::new(Vec::<(String, Value)>::new()));
        let app = Router::new()
            .route(
                STORE_ACCESS_TOKEN_PATH,
                post(
                    |axum::extract::State(captured): axum::extract::State<
                        Arc<Mutex<Vec<(String, Value)>>>,
                    >,
                     headers: HeaderMap,
                     Json(payload): Json<Value>| async move {
                        let api_key = headers
                            .get("x-api-key")
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        let accepted = api_key == "good-key";
                        captured.lock().await.push((api_key, payload));
                        if accepted {
                            (StatusCode::OK, Json(json!({"stored": true})))
                        } else {
                            (StatusCode::FORBIDDEN, Json(json!({"error": "bad key"})))
                        }
                    },
                ),
            )
            .with_state(captured.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .expect("callback stub failed");
        });

        let client =
            CallbackClient::new(reqwest::Client::new(), &format!("http://{addr}/"), 2_000)?;
        let payload = StoreAccessTokenPayload {
            bot_id: "bot-1".to_string(),
            shop: "demo.myshopify.com".to_string(),
            is_online: false,
            access_token: "shpat_1".to_string(),
        };

        let body = client.store_access_token("good-key", &payload).await?;
        assert_eq!(body["stored"], true);

        let error = client
            .store_access_token("bad-key", &payload)
            .await
            .expect_err("bad key must be rejected");
        assert!(matches!(error, CallbackError::Rejected { status: 403, .. }));

        let requests = captured.lock().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "good-key");
        assert_eq!(requests[0].1["botId"], "bot-1");
        assert_eq!(requests[0].1["accessToken"], "shpat_1");
        Ok(())
    }

    #[tokio::test]
    async fn success_status_with_non_json_body_is_a_decode_error() -> anyhow::Result<()> {
        let app = Router::new().route(
            STORE_ACCESS_TOKEN_PATH,
            post(|| async { (StatusCode::OK, "<html>not json</html>") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .await
                .expect("callback stub failed");
        });

        let client =
            CallbackClient::new(reqwest::Client::new(), &format!("http://{addr}"), 2_000)?;
        let payload = StoreAccessTokenPayload {
            bot_id: "bot-1".to_string(),
            shop: "demo.myshopify.com".to_string(),
            is_online: false,
            access_token: "shpat_1".to_string(),
        };

        let error = client
            .store_access_token("good-key", &payload)
            .await
            .expect_err("html body must not count as linked");
        assert!(matches!(error, CallbackError::Decode { .. }));
        Ok(())
    }
}
