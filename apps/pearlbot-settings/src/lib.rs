use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use axum::extract::{Form, Request, State};
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_SECURITY_POLICY, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use pearlbot_client_core::callback::DEFAULT_CALLBACK_TIMEOUT_MS;
use pearlbot_client_core::connect::CONNECT_IN_PROGRESS_MESSAGE;
use pearlbot_client_core::credentials::{API_KEY_FIELD, API_KEY_REQUIRED};
use pearlbot_client_core::page::SETTINGS_SAVE_FAILED_MESSAGE;
use pearlbot_client_core::{
    API_KEY_KEY, CHATBOT_ID_KEY, CREDENTIAL_METAFIELD_COUNT, CallbackClient, CallbackError,
    CallbackTransport, CollectingPlatform, ConnectGuard, ConnectOutcome, CredentialPair,
    METAFIELD_NAMESPACE, PlatformClient, SaveOutcome, SettingsPage, StoreAccessTokenPayload,
    SubmitError, Toast, account_settings_url, dashboard_url,
};
use serde::{Deserialize, Serialize};
use shopify_admin_client::{
    AdminClient, AdminClientConfig, AdminClientError, MetafieldsSetInput, MetafieldsSetPayload,
    normalize_shop_domain,
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod api_envelope;
pub mod config;
pub mod session;
pub mod web_htmx;
pub mod web_maud;

use crate::api_envelope::{
    ApiErrorCode, ApiErrorTuple, error_response, not_found_error, ok_data, unauthorized_error,
    upstream_error, validation_error, validation_errors,
};
use crate::config::Config;
use crate::session::{
    RETRY_INVALID_SESSION_HEADER, SESSION_TOKEN_BOUNCE_PATH, SessionService, ShopSession,
    bounce_location, session_token_from_request,
};
use crate::web_htmx::{fragment_response, is_hx_request, notice_response, set_toast_trigger};
use crate::web_maud::{
    CONNECT_STATUS_ID, Notice, PageLinks, SettingsView, render_api_key_field, render_bounce_page,
    render_error_page, render_settings_form, render_settings_page,
};

const SERVICE_NAME: &str = "pearlbot-settings";
const SHOPIFY_ADMIN_ORIGIN: &str = "https://admin.shopify.com";
const CACHE_NO_STORE: &str = "no-store";
const GID_FIELD: &str = "gid";
const GID_REQUIRED: &str = "Installation id is required.";
const LOAD_FAILED_MESSAGE: &str = "Could not load PearlBot settings from Shopify.";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    sessions: SessionService,
    callback: Arc<dyn CallbackTransport>,
    connect_guard: ConnectGuard,
    http: reqwest::Client,
    started_at: SystemTime,
}

/// Stands in for the callback client when no PearlBot API URL is configured.
struct UnconfiguredCallback;

#[async_trait]
impl CallbackTransport for UnconfiguredCallback {
    async fn store_access_token(
        &self,
        _api_key: &str,
        _payload: &StoreAccessTokenPayload,
    ) -> Result<serde_json::Value, CallbackError> {
        Err(CallbackError::BaseUrlMissing)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StaticConfig {
    client_id: String,
    pearlbot_base_url: String,
    pearlbot_api_url: String,
    theme_extension_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoaderData {
    installation_id: String,
    session: ShopSession,
    credentials: CredentialPair,
    config: StaticConfig,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFormBody {
    #[serde(rename = "chatbotId", default)]
    chatbot_id: String,
    #[serde(rename = "apiKey", default)]
    api_key: String,
    #[serde(default)]
    gid: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConnectFormBody {
    #[serde(rename = "chatbotId", default)]
    chatbot_id: String,
    #[serde(rename = "apiKey", default)]
    api_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiKeyFieldBody {
    #[serde(rename = "apiKey", default)]
    api_key: String,
    #[serde(default)]
    visible: String,
}

pub fn build_router(config: Config) -> Router {
    let http = reqwest::Client::new();
    let sessions = SessionService::from_config(&config, http.clone());
    let callback = callback_transport(&config, http.clone());
    let state = AppState {
        config: Arc::new(config),
        sessions,
        callback,
        connect_guard: ConnectGuard::default(),
        http,
        started_at: SystemTime::now(),
    };

    let app_router = Router::new()
        .route("/app", get(settings_page).post(save_settings))
        .route("/app/settings", get(settings_json))
        .route("/app/connect", post(connect_store))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_gate));

    Router::new()
        .route("/", get(app_entry))
        .route("/healthz", get(health))
        .route(SESSION_TOKEN_BOUNCE_PATH, get(session_token_bounce))
        .route("/app/api-key-field", post(api_key_field))
        .merge(app_router)
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

fn callback_transport(config: &Config, http: reqwest::Client) -> Arc<dyn CallbackTransport> {
    let timeout_ms = if config.pearlbot_callback_timeout_ms == 0 {
        DEFAULT_CALLBACK_TIMEOUT_MS
    } else {
        config.pearlbot_callback_timeout_ms
    };
    match CallbackClient::new(http, &config.pearlbot_api_url, timeout_ms) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            tracing::warn!(
                target: "pearlbot.connect",
                error = %error,
                "PEARLBOT_API_URL is not set; connect requests will fail",
            );
            Arc::new(UnconfiguredCallback)
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

async fn not_found(uri: Uri) -> ApiErrorTuple {
    not_found_error(format!("No route for {}.", uri.path()))
}

async fn app_entry(uri: Uri) -> Redirect {
    match uri.query() {
        Some(query) if !query.is_empty() => Redirect::to(&format!("/app?{query}")),
        _ => Redirect::to("/app"),
    }
}

async fn session_token_bounce(State(state): State<AppState>, uri: Uri) -> Response {
    let shop = uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "shop")
            .and_then(|(_, value)| normalize_shop_domain(&value))
    });
    document_response(
        StatusCode::OK,
        shop.as_deref(),
        render_bounce_page(&state.config.shopify_api_key),
    )
}

async fn session_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let document_request = is_document_request(request.method(), request.headers());
    let Some(token) = session_token_from_request(request.headers(), request.uri()) else {
        if document_request {
            return bounce_redirect(&state, request.uri());
        }
        return invalid_session_response("Session token missing.");
    };

    match state.sessions.authenticate(&token).await {
        Ok(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(error) if error.is_token_rejection() => {
            tracing::warn!(
                target: "pearlbot.session",
                path = %request.uri().path(),
                error = %error,
                "session token rejected",
            );
            if document_request {
                bounce_redirect(&state, request.uri())
            } else {
                invalid_session_response("Invalid session token.")
            }
        }
        Err(error) => {
            if document_request {
                document_response(
                    StatusCode::BAD_GATEWAY,
                    None,
                    render_error_page(
                        &state.config.shopify_api_key,
                        "Could not authenticate with Shopify.",
                    ),
                )
            } else {
                upstream_error(error.to_string()).into_response()
            }
        }
    }
}

fn is_document_request(method: &Method, headers: &HeaderMap) -> bool {
    *method == Method::GET
        && !is_hx_request(headers)
        && headers
            .get(ACCEPT)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"))
}

fn bounce_redirect(state: &AppState, uri: &Uri) -> Response {
    Redirect::to(&bounce_location(uri, state.config.shopify_app_url.as_deref())).into_response()
}

fn invalid_session_response(message: &str) -> Response {
    let mut response = unauthorized_error(message).into_response();
    response.headers_mut().insert(
        RETRY_INVALID_SESSION_HEADER,
        HeaderValue::from_static("1"),
    );
    response
}

/// HTML document that may only be framed by the shop admin.
fn document_response(status: StatusCode, shop: Option<&str>, html: String) -> Response {
    let mut response = (
        status,
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, CACHE_NO_STORE),
        ],
        html,
    )
        .into_response();
    let frame_ancestors = match shop {
        Some(shop) => format!("frame-ancestors https://{shop} {SHOPIFY_ADMIN_ORIGIN};"),
        None => format!("frame-ancestors {SHOPIFY_ADMIN_ORIGIN};"),
    };
    if let Ok(value) = HeaderValue::from_str(&frame_ancestors) {
        response.headers_mut().insert(CONTENT_SECURITY_POLICY, value);
    }
    response
}

fn admin_client(state: &AppState, session: &ShopSession) -> Result<AdminClient, AdminClientError> {
    let mut config = AdminClientConfig::new(&session.shop, &session.access_token);
    config.api_version = state.config.shopify_admin_api_version.clone();
    config.base_url_override = state.config.shopify_admin_base_url.clone();
    AdminClient::with_http(state.http.clone(), config)
}

struct LoadedSettings {
    installation_id: String,
    credentials: CredentialPair,
}

async fn load_settings(
    state: &AppState,
    session: &ShopSession,
) -> Result<LoadedSettings, AdminClientError> {
    let client = admin_client(state, session)?;
    let installation_id = client.current_app_installation_id().await?;
    let metafields = client
        .app_installation_metafields(METAFIELD_NAMESPACE, CREDENTIAL_METAFIELD_COUNT)
        .await?;
    let credentials = CredentialPair::from_entries(
        metafields
            .iter()
            .map(|node| (node.key.as_str(), node.value.as_str())),
    );

    Ok(LoadedSettings {
        installation_id,
        credentials,
    })
}

fn settings_view(
    state: &AppState,
    session: &ShopSession,
    installation_id: String,
    page: SettingsPage,
    notice: Option<Notice>,
) -> SettingsView {
    let platform = CollectingPlatform::new(Some(session.shop.clone()));
    let theme_editor_url = state
        .config
        .shopify_pearlbot_id
        .as_deref()
        .and_then(|extension_id| page.theme_editor_url(&platform, extension_id));

    SettingsView {
        client_id: state.config.shopify_api_key.clone(),
        installation_id,
        page,
        links: PageLinks {
            dashboard_url: dashboard_url(&state.config.pearlbot_base_url),
            account_settings_url: account_settings_url(&state.config.pearlbot_base_url),
            theme_editor_url,
        },
        notice,
    }
}

async fn settings_page(
    State(state): State<AppState>,
    Extension(session): Extension<ShopSession>,
) -> Response {
    match load_settings(&state, &session).await {
        Ok(loaded) => {
            let page = SettingsPage::new(&loaded.credentials);
            let view = settings_view(&state, &session, loaded.installation_id, page, None);
            document_response(
                StatusCode::OK,
                Some(&session.shop),
                render_settings_page(&view),
            )
        }
        Err(error) => {
            log_load_failure(&session, &error);
            document_response(
                StatusCode::BAD_GATEWAY,
                Some(&session.shop),
                render_error_page(&state.config.shopify_api_key, LOAD_FAILED_MESSAGE),
            )
        }
    }
}

async fn settings_json(
    State(state): State<AppState>,
    Extension(session): Extension<ShopSession>,
) -> Result<Response, ApiErrorTuple> {
    let loaded = load_settings(&state, &session).await.map_err(|error| {
        log_load_failure(&session, &error);
        upstream_error(error.to_string())
    })?;

    Ok(ok_data(LoaderData {
        installation_id: loaded.installation_id,
        session,
        credentials: loaded.credentials,
        config: StaticConfig {
            client_id: state.config.shopify_api_key.clone(),
            pearlbot_base_url: state.config.pearlbot_base_url.clone(),
            pearlbot_api_url: state.config.pearlbot_api_url.clone(),
            theme_extension_id: state.config.shopify_pearlbot_id.clone(),
        },
    })
    .into_response())
}

fn log_load_failure(session: &ShopSession, error: &AdminClientError) {
    tracing::error!(
        target: "pearlbot.settings",
        shop = %session.shop,
        error = %error,
        "failed to load pearlbot settings",
    );
}

async fn save_settings(
    State(state): State<AppState>,
    Extension(session): Extension<ShopSession>,
    headers: HeaderMap,
    Form(body): Form<SettingsFormBody>,
) -> Result<Response, ApiErrorTuple> {
    let hx = is_hx_request(&headers);
    let installation_id = body.gid.trim().to_string();
    let mut page = SettingsPage::new(&CredentialPair {
        chatbot_id: body.chatbot_id,
        api_key: body.api_key,
    });

    let pair = match page.submit() {
        Ok(pair) => pair,
        Err(SubmitError::Invalid(errors)) => {
            let headline = errors
                .iter()
                .next()
                .map(|error| error.message)
                .unwrap_or(SETTINGS_SAVE_FAILED_MESSAGE);
            if hx {
                let view = settings_view(&state, &session, installation_id, page, None);
                return Ok(fragment_response(
                    render_settings_form(&view),
                    StatusCode::UNPROCESSABLE_ENTITY,
                ));
            }
            let mut fields = errors.to_field_map();
            if installation_id.is_empty() {
                fields.insert(GID_FIELD.to_string(), vec![GID_REQUIRED.to_string()]);
            }
            return Err(validation_errors(headline, fields));
        }
        Err(SubmitError::Transition(error)) => {
            return Err(error_response(ApiErrorCode::InternalError, error.to_string()));
        }
    };

    if installation_id.is_empty() {
        if hx {
            let notice = Notice {
                message: GID_REQUIRED.to_string(),
                is_error: true,
            };
            let view = settings_view(&state, &session, installation_id, page, Some(notice));
            return Ok(fragment_response(
                render_settings_form(&view),
                StatusCode::UNPROCESSABLE_ENTITY,
            ));
        }
        return Err(validation_error(GID_FIELD, GID_REQUIRED));
    }

    let inputs = [
        MetafieldsSetInput::single_line_text(
            METAFIELD_NAMESPACE,
            CHATBOT_ID_KEY,
            installation_id.as_str(),
            pair.chatbot_id.as_str(),
        ),
        MetafieldsSetInput::single_line_text(
            METAFIELD_NAMESPACE,
            API_KEY_KEY,
            installation_id.as_str(),
            pair.api_key.as_str(),
        ),
    ];

    let result = match admin_client(&state, &session) {
        Ok(client) => client.metafields_set(&inputs).await,
        Err(error) => Err(error),
    };

    let payload = match result {
        Ok(payload) => payload,
        Err(error) => {
            tracing::error!(
                target: "pearlbot.settings",
                shop = %session.shop,
                error = %error,
                "metafieldsSet request failed",
            );
            if hx {
                let toast = Toast::error(SETTINGS_SAVE_FAILED_MESSAGE);
                let notice = Notice {
                    message: toast.message.clone(),
                    is_error: true,
                };
                let view = settings_view(&state, &session, installation_id, page, Some(notice));
                let mut response =
                    fragment_response(render_settings_form(&view), StatusCode::BAD_GATEWAY);
                set_toast_trigger(&mut response, &[toast]);
                return Ok(response);
            }
            return Err(upstream_error(error.to_string()));
        }
    };

    let outcome = save_outcome(&payload);
    let platform = CollectingPlatform::new(Some(session.shop.clone()));
    page.complete_save(&platform, &outcome)
        .map_err(|error| error_response(ApiErrorCode::InternalError, error.to_string()))?;
    let toasts = platform.take_toasts();

    match &outcome {
        SaveOutcome::Saved => tracing::info!(
            target: "pearlbot.settings",
            shop = %session.shop,
            "pearlbot settings saved",
        ),
        SaveOutcome::Rejected { messages } => tracing::warn!(
            target: "pearlbot.settings",
            shop = %session.shop,
            errors = %messages.join("; "),
            "metafieldsSet returned user errors",
        ),
    }

    let status = match outcome {
        SaveOutcome::Saved => StatusCode::OK,
        SaveOutcome::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };

    if hx {
        let notice = toasts.last().map(|toast| Notice {
            message: toast.message.clone(),
            is_error: toast.is_error,
        });
        let view = settings_view(&state, &session, installation_id, page, notice);
        let mut response = fragment_response(render_settings_form(&view), status);
        set_toast_trigger(&mut response, &toasts);
        return Ok(response);
    }

    if status == StatusCode::OK {
        return Ok(ok_data(payload).into_response());
    }
    let headline = toasts
        .last()
        .map_or(SETTINGS_SAVE_FAILED_MESSAGE, |toast| toast.message.as_str());
    Err(validation_errors(headline, user_error_fields(&payload)))
}

fn save_outcome(payload: &MetafieldsSetPayload) -> SaveOutcome {
    if payload.has_user_errors() {
        SaveOutcome::Rejected {
            messages: payload
                .user_errors
                .iter()
                .map(|error| error.message.clone())
                .collect(),
        }
    } else {
        SaveOutcome::Saved
    }
}

fn user_error_fields(payload: &MetafieldsSetPayload) -> HashMap<String, Vec<String>> {
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    for error in &payload.user_errors {
        let path = error.field_path();
        let key = if path.is_empty() {
            "metafields".to_string()
        } else {
            path
        };
        fields.entry(key).or_default().push(error.message.clone());
    }
    fields
}

async fn connect_store(
    State(state): State<AppState>,
    Extension(session): Extension<ShopSession>,
    headers: HeaderMap,
    Form(body): Form<ConnectFormBody>,
) -> Result<Response, ApiErrorTuple> {
    let hx = is_hx_request(&headers);
    let platform = CollectingPlatform::new(Some(session.shop.clone()));

    let outcome = match state.connect_guard.try_acquire(&session.shop) {
        Some(_permit) => {
            let mut page = SettingsPage::new(&CredentialPair {
                chatbot_id: body.chatbot_id,
                api_key: body.api_key,
            });
            page.connect(&platform, state.callback.as_ref(), Some(&session.connect_session()))
                .await
                .map_err(|error| error_response(ApiErrorCode::InternalError, error.to_string()))?
        }
        None => {
            tracing::warn!(
                target: "pearlbot.connect",
                shop = %session.shop,
                "connect already in flight for shop",
            );
            let outcome = ConnectOutcome::AlreadyInProgress;
            platform.notify(outcome.toast());
            outcome
        }
    };
    let toasts = platform.take_toasts();

    if hx {
        let toast = toasts.last().cloned().unwrap_or_else(|| outcome.toast());
        let mut response = notice_response(
            CONNECT_STATUS_ID,
            &toast.message,
            toast.is_error,
            StatusCode::OK,
        );
        set_toast_trigger(&mut response, &toasts);
        return Ok(response);
    }

    match outcome {
        ConnectOutcome::Connected => Ok(ok_data(serde_json::json!({
            "connected": true,
            "shop": session.shop,
        }))
        .into_response()),
        ConnectOutcome::Rejected { .. } | ConnectOutcome::TransportFailed => {
            Err(upstream_error(outcome.toast().message))
        }
        ConnectOutcome::MissingApiKey => Err(validation_error(API_KEY_FIELD, API_KEY_REQUIRED)),
        ConnectOutcome::MissingSession => Err(unauthorized_error(&outcome.toast().message)),
        ConnectOutcome::AlreadyInProgress => Err(error_response(
            ApiErrorCode::Conflict,
            CONNECT_IN_PROGRESS_MESSAGE,
        )),
    }
}

async fn api_key_field(Form(body): Form<ApiKeyFieldBody>) -> Response {
    let mut page = SettingsPage::new(&CredentialPair {
        chatbot_id: String::new(),
        api_key: body.api_key,
    });
    page.set_api_key_visible(body.visible.trim().eq_ignore_ascii_case("true"));
    page.toggle_api_key_visibility();
    fragment_response(render_api_key_field(&page), StatusCode::OK)
}
