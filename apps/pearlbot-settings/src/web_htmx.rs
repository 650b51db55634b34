use std::collections::BTreeMap;

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use pearlbot_client_core::Toast;
use serde::Serialize;

use crate::web_maud::render_notice_fragment as render_maud_notice_fragment;

const CACHE_NO_STORE: &str = "no-store";
const HX_TRIGGER_HEADER: &str = "HX-Trigger";
const TOAST_EVENT: &str = "pearlbot:toast";

/// True when htmx issued the request, i.e. the caller wants a fragment.
pub fn is_hx_request(headers: &HeaderMap) -> bool {
    headers
        .get("hx-request")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn notice_response(
    target_id: &str,
    status: &str,
    is_error: bool,
    http_status: StatusCode,
) -> Response {
    fragment_response(
        render_maud_notice_fragment(target_id, status, is_error),
        http_status,
    )
}

pub fn fragment_response(fragment_html: String, http_status: StatusCode) -> Response {
    (
        http_status,
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, CACHE_NO_STORE),
        ],
        fragment_html,
    )
        .into_response()
}

fn set_trigger_header(response: &mut Response, event: &str) {
    if let Ok(value) = HeaderValue::from_str(event) {
        response.headers_mut().insert(HX_TRIGGER_HEADER, value);
    }
}

#[derive(Serialize)]
struct ToastDetail<'a> {
    toasts: &'a [Toast],
}

/// Attaches toasts as a `pearlbot:toast` event; the page script forwards
/// each one to the admin toast API.
pub fn set_toast_trigger(response: &mut Response, toasts: &[Toast]) {
    if toasts.is_empty() {
        return;
    }
    let events = BTreeMap::from([(TOAST_EVENT, ToastDetail { toasts })]);
    if let Ok(payload) = serde_json::to_string(&events) {
        set_trigger_header(response, &payload);
    }
}

#[cfg(test)]
mod tests {
    use super::{fragment_response, is_hx_request, set_toast_trigger};
    use axum::body::to_bytes;
    use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
    use axum::http::{HeaderMap, StatusCode};
    use pearlbot_client_core::Toast;

    #[test]
    fn hx_request_header_marks_fragment_requests() {
        let mut headers = HeaderMap::new();
        assert!(!is_hx_request(&headers));

        headers.insert("hx-request", "false".parse().expect("valid value"));
        assert!(!is_hx_request(&headers));

        headers.insert("hx-request", "TRUE".parse().expect("valid value"));
        assert!(is_hx_request(&headers));
    }

    #[tokio::test]
    async fn fragment_response_sets_html_content_type_and_no_store_cache() {
        let response = fragment_response("<div id=\"status\">ok</div>".to_string(), StatusCode::OK);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(
            response
                .headers()
                .get(CACHE_CONTROL)
                .and_then(|value| value.to_str().ok()),
            Some("no-store")
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        assert_eq!(body.as_ref(), b"<div id=\"status\">ok</div>");
    }

    #[test]
    fn toast_trigger_carries_every_toast() {
        let mut response = fragment_response("<div>ok</div>".to_string(), StatusCode::OK);
        set_toast_trigger(
            &mut response,
            &[Toast::info("App settings saved."), Toast::error("Connection error.")],
        );
        let raw = response
            .headers()
            .get("HX-Trigger")
            .and_then(|value| value.to_str().ok())
            .expect("trigger header");
        let trigger: serde_json::Value = serde_json::from_str(raw).expect("trigger json");
        assert_eq!(trigger["pearlbot:toast"]["toasts"][0]["message"], "App settings saved.");
        assert_eq!(trigger["pearlbot:toast"]["toasts"][1]["isError"], true);
    }

    #[test]
    fn no_toasts_means_no_trigger_header() {
        let mut response = fragment_response("<div>ok</div>".to_string(), StatusCode::OK);
        set_toast_trigger(&mut response, &[]);
        assert!(response.headers().get("HX-Trigger").is_none());
    }
}
