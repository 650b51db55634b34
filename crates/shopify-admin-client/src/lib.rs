use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod metafields;
pub mod token_exchange;

pub use metafields::{
    MetafieldNode, MetafieldsSetInput, MetafieldsSetPayload, MetafieldsSetUserError, SetMetafield,
};
pub use token_exchange::{
    AccessTokenResponse, AssociatedUser, RequestedTokenType, TokenExchangeClient,
    TokenExchangeRequest,
};

pub const DEFAULT_API_VERSION: &str = "2024-10";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";
const MYSHOPIFY_SUFFIX: &str = ".myshopify.com";

#[derive(Debug, Clone)]
pub struct AdminClientConfig {
    pub shop: String,
    pub access_token: String,
    pub api_version: String,
    pub base_url_override: Option<String>,
    pub timeout_ms: u64,
}

impl AdminClientConfig {
    #[must_use]
    pub fn new(shop: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            shop: shop.into(),
            access_token: access_token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            base_url_override: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// GraphQL Admin API client bound to one shop and one access token.
#[derive(Debug, Clone)]
pub struct AdminClient {
    endpoint: String,
    access_token: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum AdminClientError {
    #[error("shopify_admin_invalid_shop:{shop}")]
    InvalidShop { shop: String },
    #[error("shopify_admin_access_token_missing")]
    AccessTokenMissing,
    #[error("shopify_admin_request_failed:{message}")]
    Request { message: String },
    #[error("shopify_admin_read_failed:{message}")]
    Read { message: String },
    #[error("shopify_admin_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("shopify_admin_json_decode_failed:{message}")]
    Decode { message: String },
    #[error("shopify_admin_graphql_errors:{}", messages.join("; "))]
    GraphQl { messages: Vec<String> },
    #[error("shopify_admin_missing_data:{field}")]
    MissingData { field: &'static str },
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a, V: Serialize> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a V>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
}

impl AdminClient {
    pub fn new(config: AdminClientConfig) -> Result<Self, AdminClientError> {
        Self::with_http(reqwest::Client::new(), config)
    }

    /// Builds a client that shares an existing connection pool.
    pub fn with_http(
        http: reqwest::Client,
        config: AdminClientConfig,
    ) -> Result<Self, AdminClientError> {
        let shop = normalize_shop_domain(&config.shop).ok_or_else(|| {
            AdminClientError::InvalidShop {
                shop: config.shop.clone(),
            }
        })?;
        let access_token = config.access_token.trim().to_string();
        if access_token.is_empty() {
            return Err(AdminClientError::AccessTokenMissing);
        }

        let base_url = shop_base_url(&shop, config.base_url_override.as_deref());
        Ok(Self {
            endpoint: format!(
                "{base_url}{}",
                Self::graphql_path(config.api_version.trim())
            ),
            access_token,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            http,
        })
    }

    #[must_use]
    pub fn graphql_path(api_version: &str) -> String {
        let version = if api_version.is_empty() {
            DEFAULT_API_VERSION
        } else {
            api_version
        };
        format!("/admin/api/{version}/graphql.json")
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Runs one GraphQL operation. Top-level `errors` fail the call even when
    /// partial `data` is present.
    pub async fn graphql<V, T>(
        &self,
        query: &str,
        variables: Option<&V>,
    ) -> Result<T, AdminClientError>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.endpoint.as_str())
            .header(ACCESS_TOKEN_HEADER, self.access_token.as_str())
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await
            .map_err(|error| AdminClientError::Request {
                message: error.to_string(),
            })?;

        let envelope: GraphQlResponse<T> = decode_json_response(response).await?;
        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            let messages = errors
                .into_iter()
                .map(|error| error.message)
                .collect::<Vec<_>>();
            tracing::warn!(
                target: "shopify.admin",
                errors = %messages.join("; "),
                "graphql operation returned errors",
            );
            return Err(AdminClientError::GraphQl { messages });
        }

        envelope
            .data
            .ok_or(AdminClientError::MissingData { field: "data" })
    }
}

/// Lowercases and validates a `*.myshopify.com` domain, tolerating a scheme
/// prefix and trailing slash.
#[must_use]
pub fn normalize_shop_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_lowercase();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(&trimmed);
    let host = without_scheme.trim_end_matches('/');

    let store = host.strip_suffix(MYSHOPIFY_SUFFIX)?;
    if store.is_empty()
        || store.starts_with('-')
        || !store
            .chars()
            .all(|char| char.is_ascii_alphanumeric() || char == '-')
    {
        return None;
    }

    Some(host.to_string())
}

#[must_use]
pub fn shop_base_url(shop: &str, base_url_override: Option<&str>) -> String {
    match base_url_override.map(str::trim).filter(|value| !value.is_empty()) {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => format!("https://{shop}"),
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> AdminClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    AdminClientError::Http { status, body }
}

pub(crate) async fn decode_json_response<T>(
    response: reqwest::Response,
) -> Result<T, AdminClientError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| AdminClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| AdminClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
