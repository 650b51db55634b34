use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Uri};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use pearlbot_client_core::ConnectSession;
use serde::{Deserialize, Serialize};
use shopify_admin_client::{
    AccessTokenResponse, AdminClientError, RequestedTokenType, TokenExchangeClient,
    TokenExchangeRequest, normalize_shop_domain,
};
use thiserror::Error;
use url::Url;

use crate::config::Config;

pub const SESSION_TOKEN_BOUNCE_PATH: &str = "/auth/session-token";
pub const ID_TOKEN_QUERY_PARAM: &str = "id_token";
pub const RELOAD_QUERY_PARAM: &str = "shopify-reload";
pub const RETRY_INVALID_SESSION_HEADER: &str = "X-Shopify-Retry-Invalid-Session-Request";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token missing")]
    TokenMissing,
    #[error("session token is not a well-formed JWT")]
    Malformed,
    #[error("session token algorithm is not HS256")]
    UnsupportedAlgorithm,
    #[error("session token signature mismatch")]
    InvalidSignature,
    #[error("session token audience does not match this app")]
    AudienceMismatch,
    #[error("session token expired")]
    Expired,
    #[error("session token not yet valid")]
    NotYetValid,
    #[error("session token destination '{dest}' is not a shop admin")]
    InvalidDestination { dest: String },
    #[error("session token issuer does not match its destination")]
    IssuerMismatch,
    #[error("token exchange failed: {0}")]
    Exchange(#[from] AdminClientError),
}

impl SessionError {
    /// True when the token itself was rejected, so the admin should be
    /// asked for a fresh one.
    pub fn is_token_rejection(&self) -> bool {
        !matches!(self, Self::Exchange(_))
    }
}

/// Claims carried by an embedded-admin session token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionTokenClaims {
    pub iss: String,
    pub dest: String,
    pub aud: String,
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: i64,
    pub nbf: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSessionToken {
    pub shop: String,
    pub claims: SessionTokenClaims,
}

#[derive(Clone)]
pub struct SessionTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionTokenVerifier {
    pub fn new(client_id: &str, client_secret: &str, leeway_seconds: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[client_id]);
        validation.set_required_spec_claims(&["exp", "nbf", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = leeway_seconds;
        Self {
            decoding_key: DecodingKey::from_secret(client_secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.shopify_api_key,
            &config.shopify_api_secret,
            config.session_token_leeway_seconds,
        )
    }

    /// Verifies signature, audience and validity window, then ties the
    /// token to a shop through `dest` and `iss`.
    pub fn verify(&self, token: &str) -> Result<VerifiedSessionToken, SessionError> {
        let claims =
            decode::<SessionTokenClaims>(token.trim(), &self.decoding_key, &self.validation)
                .map_err(map_decode_error)?
                .claims;

        let shop = shop_from_destination(&claims.dest)?;
        let expected_issuer = format!("{}/admin", claims.dest.trim_end_matches('/'));
        if claims.iss.trim_end_matches('/') != expected_issuer {
            return Err(SessionError::IssuerMismatch);
        }

        Ok(VerifiedSessionToken { shop, claims })
    }
}

fn map_decode_error(error: jsonwebtoken::errors::Error) -> SessionError {
    match error.kind() {
        ErrorKind::ExpiredSignature => SessionError::Expired,
        ErrorKind::ImmatureSignature => SessionError::NotYetValid,
        ErrorKind::InvalidSignature => SessionError::InvalidSignature,
        ErrorKind::InvalidAudience => SessionError::AudienceMismatch,
        ErrorKind::InvalidAlgorithm => SessionError::UnsupportedAlgorithm,
        _ => SessionError::Malformed,
    }
}

fn shop_from_destination(dest: &str) -> Result<String, SessionError> {
    let invalid = || SessionError::InvalidDestination {
        dest: dest.to_string(),
    };
    let url = Url::parse(dest).map_err(|_| invalid())?;
    if url.scheme() != "https" || !matches!(url.path(), "" | "/") || url.query().is_some() {
        return Err(invalid());
    }
    url.host_str()
        .and_then(normalize_shop_domain)
        .ok_or_else(invalid)
}

/// An authenticated admin session for one shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopSession {
    pub id: String,
    pub shop: String,
    pub is_online: bool,
    pub scope: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<u64>,
}

impl ShopSession {
    pub fn from_exchange(shop: &str, token: AccessTokenResponse, now: DateTime<Utc>) -> Self {
        let user_id = token.associated_user.as_ref().map(|user| user.id);
        let is_online = user_id.is_some();
        let id = match user_id {
            Some(user_id) => format!("{shop}_{user_id}"),
            None => format!("offline_{shop}"),
        };
        let expires_at = token
            .expires_in
            .and_then(|seconds| i64::try_from(seconds).ok())
            .map(|seconds| now + Duration::seconds(seconds));

        Self {
            id,
            shop: shop.to_string(),
            is_online,
            scope: token.scope,
            access_token: token.access_token,
            expires_at,
            user_id,
        }
    }

    /// The fields forwarded to the PearlBot callback.
    pub fn connect_session(&self) -> ConnectSession {
        ConnectSession {
            shop: self.shop.clone(),
            is_online: self.is_online,
            access_token: self.access_token.clone(),
        }
    }
}

#[async_trait]
pub trait AccessTokenExchange: Send + Sync {
    async fn exchange(
        &self,
        shop: &str,
        session_token: &str,
        token_type: RequestedTokenType,
    ) -> Result<AccessTokenResponse, AdminClientError>;
}

/// Token exchange against the shop's OAuth endpoint.
#[derive(Debug, Clone)]
pub struct ShopifyTokenExchange {
    client: TokenExchangeClient,
    client_id: String,
    client_secret: String,
}

impl ShopifyTokenExchange {
    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        Self {
            client: TokenExchangeClient::new(
                http,
                config.shopify_admin_base_url.clone(),
                shopify_admin_client::DEFAULT_TIMEOUT_MS,
            ),
            client_id: config.shopify_api_key.clone(),
            client_secret: config.shopify_api_secret.clone(),
        }
    }
}

#[async_trait]
impl AccessTokenExchange for ShopifyTokenExchange {
    async fn exchange(
        &self,
        shop: &str,
        session_token: &str,
        token_type: RequestedTokenType,
    ) -> Result<AccessTokenResponse, AdminClientError> {
        self.client
            .exchange(&TokenExchangeRequest {
                shop,
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                session_token,
                requested_token_type: token_type,
            })
            .await
    }
}

/// Turns a session token into a [`ShopSession`]: verify, then exchange.
#[derive(Clone)]
pub struct SessionService {
    verifier: SessionTokenVerifier,
    exchange: Arc<dyn AccessTokenExchange>,
    token_type: RequestedTokenType,
}

impl SessionService {
    pub fn new(
        verifier: SessionTokenVerifier,
        exchange: Arc<dyn AccessTokenExchange>,
        token_type: RequestedTokenType,
    ) -> Self {
        Self {
            verifier,
            exchange,
            token_type,
        }
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        let token_type = if config.shopify_use_online_tokens {
            RequestedTokenType::Online
        } else {
            RequestedTokenType::Offline
        };
        Self::new(
            SessionTokenVerifier::from_config(config),
            Arc::new(ShopifyTokenExchange::from_config(config, http)),
            token_type,
        )
    }

    pub async fn authenticate(&self, session_token: &str) -> Result<ShopSession, SessionError> {
        let now = Utc::now();
        let verified = self.verifier.verify(session_token)?;
        let token = self
            .exchange
            .exchange(&verified.shop, session_token.trim(), self.token_type)
            .await
            .map_err(|error| {
                tracing::warn!(
                    target: "pearlbot.session",
                    shop = %verified.shop,
                    error = %error,
                    "session token exchange failed",
                );
                SessionError::Exchange(error)
            })?;

        let session = ShopSession::from_exchange(&verified.shop, token, now);
        tracing::debug!(
            target: "pearlbot.session",
            shop = %session.shop,
            session_id = %session.id,
            is_online = session.is_online,
            "admin session authenticated",
        );
        Ok(session)
    }
}

/// Session token from `Authorization: Bearer` or the `id_token` query
/// parameter, in that order.
pub fn session_token_from_request(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    bearer_token(headers).or_else(|| {
        uri.query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == ID_TOKEN_QUERY_PARAM)
                .map(|(_, value)| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Location of the bounce page that fetches a fresh session token and then
/// reloads `uri`. Any stale `id_token` is dropped from both URLs.
pub fn bounce_location(uri: &Uri, app_url: Option<&str>) -> String {
    let params: Vec<(String, String)> = uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .filter(|(key, _)| key != ID_TOKEN_QUERY_PARAM && key != RELOAD_QUERY_PARAM)
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    let mut reload_query = url::form_urlencoded::Serializer::new(String::new());
    reload_query.extend_pairs(params.iter());
    let reload_query = reload_query.finish();
    let mut reload = format!(
        "{}{}",
        app_url.map(|url| url.trim_end_matches('/')).unwrap_or_default(),
        uri.path()
    );
    if !reload_query.is_empty() {
        reload.push('?');
        reload.push_str(&reload_query);
    }

    let mut bounce_query = url::form_urlencoded::Serializer::new(String::new());
    bounce_query.extend_pairs(params.iter());
    bounce_query.append_pair(RELOAD_QUERY_PARAM, &reload);
    format!("{SESSION_TOKEN_BOUNCE_PATH}?{}", bounce_query.finish())
}

#[cfg(test)]
pub(crate) fn mint_session_token(secret: &str, claims: &serde_json::Value) -> String {
    mint_session_token_with(jsonwebtoken::Algorithm::HS256, secret, claims)
}

#[cfg(test)]
pub(crate) fn mint_session_token_with(
    algorithm: jsonwebtoken::Algorithm,
    secret: &str,
    claims: &serde_json::Value,
) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(algorithm),
        claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode session token")
}

#[cfg(test)]
pub(crate) fn shop_claims(client_id: &str, shop: &str, now: i64) -> serde_json::Value {
    serde_json::json!({
        "iss": format!("https://{shop}/admin"),
        "dest": format!("https://{shop}"),
        "aud": client_id,
        "sub": "42",
        "exp": now + 60,
        "nbf": now - 5,
        "iat": now - 5,
        "jti": "6c6e8b1a-34b2-4f77-9d4c-1b2f3c4d5e6f",
        "sid": "session-1",
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::http::HeaderValue;
    use shopify_admin_client::AssociatedUser;

    use super::*;

    const CLIENT_ID: &str = "client-id";
    const SECRET: &str = "client-secret";

    fn verifier() -> SessionTokenVerifier {
        SessionTokenVerifier::new(CLIENT_ID, SECRET, 5)
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn claims() -> serde_json::Value {
        shop_claims(CLIENT_ID, "demo.myshopify.com", now())
    }

    #[test]
    fn valid_token_yields_shop_domain() {
        let token = mint_session_token(SECRET, &claims());
        let verified = verifier().verify(&token).expect("valid token");
        assert_eq!(verified.shop, "demo.myshopify.com");
        assert_eq!(verified.claims.sid.as_deref(), Some("session-1"));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let token = mint_session_token("other-secret", &claims());
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::InvalidSignature)
        ));

        let mut foreign = claims();
        foreign["aud"] = serde_json::json!("another-app");
        let token = mint_session_token(SECRET, &foreign);
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::AudienceMismatch)
        ));

        assert!(matches!(
            verifier().verify("not.a-token"),
            Err(SessionError::Malformed)
        ));

        let mut missing_nbf = claims();
        if let Some(object) = missing_nbf.as_object_mut() {
            object.remove("nbf");
        }
        let token = mint_session_token(SECRET, &missing_nbf);
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::Malformed)
        ));
    }

    #[test]
    fn expiry_and_not_before_honor_leeway() {
        let mut claims = claims();
        claims["exp"] = serde_json::json!(now() - 2);
        let token = mint_session_token(SECRET, &claims);
        assert!(verifier().verify(&token).is_ok());

        claims["exp"] = serde_json::json!(now() - 30);
        let token = mint_session_token(SECRET, &claims);
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::Expired)
        ));

        let mut claims = self::claims();
        claims["nbf"] = serde_json::json!(now() + 2);
        let token = mint_session_token(SECRET, &claims);
        assert!(verifier().verify(&token).is_ok());

        claims["nbf"] = serde_json::json!(now() + 30);
        let token = mint_session_token(SECRET, &claims);
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::NotYetValid)
        ));
    }

    #[test]
    fn destination_must_be_a_shop_admin_with_matching_issuer() {
        let mut claims = claims();
        claims["dest"] = serde_json::json!("https://evil.example.com");
        claims["iss"] = serde_json::json!("https://evil.example.com/admin");
        let token = mint_session_token(SECRET, &claims);
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::InvalidDestination { .. })
        ));

        let mut claims = self::claims();
        claims["iss"] = serde_json::json!("https://other.myshopify.com/admin");
        let token = mint_session_token(SECRET, &claims);
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::IssuerMismatch)
        ));
    }

    #[test]
    fn other_algorithms_are_refused() {
        let token = mint_session_token_with(jsonwebtoken::Algorithm::HS512, SECRET, &claims());
        assert!(matches!(
            verifier().verify(&token),
            Err(SessionError::UnsupportedAlgorithm)
        ));
    }

    #[test]
    fn token_is_read_from_bearer_header_then_query() {
        let uri: Uri = "/app?shop=demo.myshopify.com&id_token=query-token"
            .parse()
            .expect("uri");
        let mut headers = HeaderMap::new();
        assert_eq!(
            session_token_from_request(&headers, &uri).as_deref(),
            Some("query-token")
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(
            session_token_from_request(&headers, &uri).as_deref(),
            Some("header-token")
        );

        let bare: Uri = "/app".parse().expect("uri");
        assert_eq!(session_token_from_request(&HeaderMap::new(), &bare), None);
    }

    #[test]
    fn bounce_location_reloads_the_page_without_stale_token() {
        let uri: Uri = "/app?shop=demo.myshopify.com&host=YWRtaW4&id_token=stale"
            .parse()
            .expect("uri");
        let location = bounce_location(&uri, Some("https://settings.pearlbot.test/"));
        assert_eq!(
            location,
            "/auth/session-token?shop=demo.myshopify.com&host=YWRtaW4&shopify-reload=https%3A%2F%2Fsettings.pearlbot.test%2Fapp%3Fshop%3Ddemo.myshopify.com%26host%3DYWRtaW4"
        );

        let bare: Uri = "/app".parse().expect("uri");
        assert_eq!(
            bounce_location(&bare, None),
            "/auth/session-token?shopify-reload=%2Fapp"
        );
    }

    struct RecordingExchange {
        calls: Mutex<Vec<(String, RequestedTokenType)>>,
        online_user: Option<u64>,
    }

    #[async_trait]
    impl AccessTokenExchange for RecordingExchange {
        async fn exchange(
            &self,
            shop: &str,
            _session_token: &str,
            token_type: RequestedTokenType,
        ) -> Result<AccessTokenResponse, AdminClientError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((shop.to_string(), token_type));
            Ok(AccessTokenResponse {
                access_token: "shpat_exchanged".to_string(),
                scope: "read_metafields,write_metafields".to_string(),
                expires_in: self.online_user.map(|_| 86_399),
                associated_user_scope: None,
                associated_user: self.online_user.map(|id| AssociatedUser {
                    id,
                    email: None,
                    account_owner: Some(true),
                }),
            })
        }
    }

    #[tokio::test]
    async fn authenticate_exchanges_a_verified_token() -> anyhow::Result<()> {
        let exchange = Arc::new(RecordingExchange {
            calls: Mutex::new(Vec::new()),
            online_user: None,
        });
        let service = SessionService::new(
            SessionTokenVerifier::new(CLIENT_ID, SECRET, 5),
            exchange.clone(),
            RequestedTokenType::Offline,
        );
        let now = Utc::now().timestamp();
        let token = mint_session_token(SECRET, &shop_claims(CLIENT_ID, "demo.myshopify.com", now));

        let session = service.authenticate(&token).await?;
        assert_eq!(session.id, "offline_demo.myshopify.com");
        assert_eq!(session.shop, "demo.myshopify.com");
        assert!(!session.is_online);
        assert_eq!(session.access_token, "shpat_exchanged");
        assert_eq!(
            exchange.calls.lock().expect("calls lock").as_slice(),
            &[("demo.myshopify.com".to_string(), RequestedTokenType::Offline)]
        );

        let serialized = serde_json::to_value(&session)?;
        assert!(serialized.get("accessToken").is_none());
        assert_eq!(serialized["isOnline"], false);
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_rejects_before_exchanging() -> anyhow::Result<()> {
        let exchange = Arc::new(RecordingExchange {
            calls: Mutex::new(Vec::new()),
            online_user: Some(7),
        });
        let service = SessionService::new(
            SessionTokenVerifier::new(CLIENT_ID, SECRET, 5),
            exchange.clone(),
            RequestedTokenType::Online,
        );

        let error = service
            .authenticate("garbage")
            .await
            .expect_err("garbage token");
        assert!(error.is_token_rejection());
        assert!(exchange.calls.lock().expect("calls lock").is_empty());

        let now = Utc::now().timestamp();
        let token = mint_session_token(SECRET, &shop_claims(CLIENT_ID, "demo.myshopify.com", now));
        let session = service.authenticate(&token).await?;
        assert_eq!(session.id, "demo.myshopify.com_7");
        assert!(session.is_online);
        assert!(session.expires_at.is_some());
        assert_eq!(
            session.connect_session(),
            ConnectSession {
                shop: "demo.myshopify.com".to_string(),
                is_online: true,
                access_token: "shpat_exchanged".to_string(),
            }
        );
        Ok(())
    }
}
