use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    AdminClientError, DEFAULT_TIMEOUT_MS, decode_json_response, normalize_shop_domain,
    shop_base_url,
};

const TOKEN_EXCHANGE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";
const OFFLINE_ACCESS_TOKEN_TYPE: &str = "urn:shopify:params:oauth:token-type:offline-access-token";
const ONLINE_ACCESS_TOKEN_TYPE: &str = "urn:shopify:params:oauth:token-type:online-access-token";
const ACCESS_TOKEN_PATH: &str = "/admin/oauth/access_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedTokenType {
    Offline,
    Online,
}

impl RequestedTokenType {
    pub const fn as_urn(self) -> &'static str {
        match self {
            Self::Offline => OFFLINE_ACCESS_TOKEN_TYPE,
            Self::Online => ONLINE_ACCESS_TOKEN_TYPE,
        }
    }

    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

#[derive(Debug, Clone)]
pub struct TokenExchangeRequest<'a> {
    pub shop: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub session_token: &'a str,
    pub requested_token_type: RequestedTokenType,
}

#[derive(Debug, Serialize)]
struct TokenExchangeBody<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
    subject_token: &'a str,
    subject_token_type: &'static str,
    requested_token_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssociatedUser {
    pub id: u64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub account_owner: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub associated_user_scope: Option<String>,
    #[serde(default)]
    pub associated_user: Option<AssociatedUser>,
}

/// Exchanges embedded-admin session tokens for Admin API access tokens.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    base_url_override: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl Default for TokenExchangeClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), None, DEFAULT_TIMEOUT_MS)
    }
}

impl TokenExchangeClient {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url_override: Option<String>, timeout_ms: u64) -> Self {
        Self {
            base_url_override,
            timeout: Duration::from_millis(timeout_ms.max(250)),
            http,
        }
    }

    #[must_use]
    pub fn endpoint(&self, shop: &str) -> String {
        format!(
            "{}{ACCESS_TOKEN_PATH}",
            shop_base_url(shop, self.base_url_override.as_deref())
        )
    }

    pub async fn exchange(
        &self,
        request: &TokenExchangeRequest<'_>,
    ) -> Result<AccessTokenResponse, AdminClientError> {
        let shop = normalize_shop_domain(request.shop).ok_or_else(|| {
            AdminClientError::InvalidShop {
                shop: request.shop.to_string(),
            }
        })?;

        let body = TokenExchangeBody {
            client_id: request.client_id,
            client_secret: request.client_secret,
            grant_type: TOKEN_EXCHANGE_GRANT_TYPE,
            subject_token: request.session_token,
            subject_token_type: ID_TOKEN_TYPE,
            requested_token_type: request.requested_token_type.as_urn(),
        };

        let response = self
            .http
            .post(self.endpoint(&shop))
            .header("accept", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|error| AdminClientError::Request {
                message: error.to_string(),
            })?;

        let token: AccessTokenResponse = decode_json_response(response).await?;
        if token.access_token.trim().is_empty() {
            return Err(AdminClientError::AccessTokenMissing);
        }

        tracing::debug!(
            target: "shopify.admin",
            shop = %shop,
            online = request.requested_token_type.is_online(),
            scope = %token.scope,
            "session token exchanged",
        );
        Ok(token)
    }
}
