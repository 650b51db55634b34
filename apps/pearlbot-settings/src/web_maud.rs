use maud::{DOCTYPE, Markup, PreEscaped, html};
use pearlbot_client_core::SettingsPage;
use pearlbot_client_core::credentials::{API_KEY_FIELD, CHATBOT_ID_FIELD};

const APP_BRIDGE_SCRIPT_URL: &str = "https://cdn.shopify.com/shopifycloud/app-bridge.js";
const HTMX_SCRIPT_URL: &str = "https://unpkg.com/htmx.org@2.0.8/dist/htmx.min.js";

pub const SETTINGS_FORM_ID: &str = "settings-form";
pub const SETTINGS_STATUS_ID: &str = "settings-status";
pub const API_KEY_FIELD_ID: &str = "api-key-field";
pub const CONNECT_STATUS_ID: &str = "connect-status";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLinks {
    pub dashboard_url: String,
    pub account_settings_url: String,
    pub theme_editor_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SettingsView {
    pub client_id: String,
    pub installation_id: String,
    pub page: SettingsPage,
    pub links: PageLinks,
    pub notice: Option<Notice>,
}

pub fn render_settings_page(view: &SettingsView) -> String {
    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            (document_head(&view.client_id, "PearlBot"))
            body {
                main class="pb-page" {
                    (settings_card(view))
                    (connect_card())
                }
                script { (PreEscaped(page_script())) }
            }
        }
    };

    markup.into_string()
}

pub fn render_settings_form(view: &SettingsView) -> String {
    settings_form(view).into_string()
}

pub fn render_api_key_field(page: &SettingsPage) -> String {
    api_key_field(page).into_string()
}

pub fn render_notice_fragment(target_id: &str, message: &str, is_error: bool) -> String {
    let markup = html! {
        div id=(target_id) class={(if is_error { "pb-notice error" } else { "pb-notice" })} role="status" {
            (message)
        }
    };
    markup.into_string()
}

/// Loads App Bridge, which fetches a fresh session token and reloads the
/// `shopify-reload` target with it.
pub fn render_bounce_page(client_id: &str) -> String {
    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="shopify-api-key" content=(client_id);
                script src=(APP_BRIDGE_SCRIPT_URL) {}
            }
            body {}
        }
    };
    markup.into_string()
}

pub fn render_error_page(client_id: &str, message: &str) -> String {
    let markup = html! {
        (DOCTYPE)
        html lang="en" {
            (document_head(client_id, "PearlBot"))
            body {
                main class="pb-page" {
                    section class="pb-card" {
                        h2 { "Something went wrong" }
                        (render_notice_markup("page-error", message, true))
                        p class="pb-muted" { "Reload the page to try again." }
                    }
                }
            }
        }
    };
    markup.into_string()
}

fn document_head(client_id: &str, title: &str) -> Markup {
    html! {
        head {
            meta charset="utf-8";
            meta name="viewport" content="width=device-width, initial-scale=1";
            meta name="shopify-api-key" content=(client_id);
            script src=(APP_BRIDGE_SCRIPT_URL) {}
            title { (title) }
            style { (PreEscaped(styles())) }
            script src=(HTMX_SCRIPT_URL) defer {}
        }
    }
}

fn render_notice_markup(target_id: &str, message: &str, is_error: bool) -> Markup {
    PreEscaped(render_notice_fragment(target_id, message, is_error))
}

fn settings_card(view: &SettingsView) -> Markup {
    html! {
        section class="pb-card" {
            div class="pb-card-header" {
                h2 { "Configuration Settings" }
                hr;
                p class="pb-muted" { "Configure your chatbot by entering the required credentials below." }
            }
            (settings_form(view))
        }
    }
}

fn settings_form(view: &SettingsView) -> Markup {
    let form = view.page.form();
    let chatbot_id_error = form.errors().message_for(CHATBOT_ID_FIELD);

    html! {
        form id=(SETTINGS_FORM_ID) method="post" action="/app" class="pb-form"
            hx-post="/app"
            hx-target={"#" (SETTINGS_FORM_ID)}
            hx-swap="outerHTML" {
            @if let Some(notice) = &view.notice {
                (render_notice_markup(SETTINGS_STATUS_ID, &notice.message, notice.is_error))
            } @else {
                div id=(SETTINGS_STATUS_ID) class="hidden" {}
            }
            div class="pb-field" {
                label for="chatbotId" { "ChatBot ID" span class="pb-required" { "*" } }
                input id="chatbotId" type="text" name=(CHATBOT_ID_FIELD) value=(form.chatbot_id) required
                    aria-invalid=(chatbot_id_error.is_some());
                @if let Some(message) = chatbot_id_error {
                    p class="pb-field-error" { (message) }
                }
                p class="pb-help" {
                    "Go to "
                    a href=(view.links.dashboard_url) target="_blank" rel="noopener" { "Dashboard" }
                    span class="pb-external" aria-hidden="true" { "↗" }
                    "Choose a chatbot > General tab"
                }
            }
            (api_key_field_with_help(&view.page, &view.links.account_settings_url))
            input type="hidden" name="gid" value=(view.installation_id);
            div class="pb-actions" {
                button type="submit" class="pb-btn primary" { "Save" }
                @if let Some(url) = &view.links.theme_editor_url {
                    a class="pb-btn" href=(url) target="_blank" rel="noopener" { "Enable chatbot in Theme" }
                }
                span class="htmx-indicator pb-indicator" { "Saving..." }
            }
        }
    }
}

fn api_key_field_with_help(page: &SettingsPage, account_settings_url: &str) -> Markup {
    html! {
        div class="pb-field" {
            label for="apiKey" { "API Key" span class="pb-required" { "*" } }
            (api_key_field(page))
            p class="pb-help" {
                "Go to "
                a href=(account_settings_url) target="_blank" rel="noopener" { "Account settings" }
                span class="pb-external" aria-hidden="true" { "↗" }
                "> General tab"
            }
        }
    }
}

fn api_key_field(page: &SettingsPage) -> Markup {
    let form = page.form();
    let error = form.errors().message_for(API_KEY_FIELD);
    let visible = page.api_key_visible();

    html! {
        div id=(API_KEY_FIELD_ID) class="pb-connected" {
            div class="pb-connected-row" {
                input id="apiKey" type=(page.api_key_input_type()) name=(API_KEY_FIELD) value=(form.api_key)
                    required autocomplete="off" aria-invalid=(error.is_some());
                button type="button" class="pb-btn"
                    hx-post="/app/api-key-field"
                    hx-include="#apiKey"
                    hx-vals={"{\"visible\": \"" (visible) "\"}"}
                    hx-target={"#" (API_KEY_FIELD_ID)}
                    hx-swap="outerHTML" {
                    (if visible { "Hide" } else { "Show" })
                }
            }
            @if let Some(message) = error {
                p class="pb-field-error" { (message) }
            }
        }
    }
}

fn connect_card() -> Markup {
    html! {
        section class="pb-card" {
            h2 { "Shopify Integration" }
            p class="pb-muted" { "Connect your Shopify store to enable advanced e-commerce features." }
            form method="post" action="/app/connect" class="pb-actions"
                hx-post="/app/connect"
                hx-include="#chatbotId, #apiKey"
                hx-target={"#" (CONNECT_STATUS_ID)}
                hx-swap="outerHTML"
                hx-disabled-elt="find button" {
                button type="submit" class="pb-btn" { "Connect with Shopify" }
                span class="htmx-indicator pb-indicator" { "Connecting..." }
            }
            div id=(CONNECT_STATUS_ID) class="hidden" {}
        }
    }
}

// Every htmx request waits for a fresh session token. 422 and 502 responses
// carry the re-rendered form, so they are swapped too.
fn page_script() -> &'static str {
    r#"
(function () {
  var sessionToken = null;
  document.addEventListener("htmx:confirm", function (event) {
    if (!window.shopify || typeof window.shopify.idToken !== "function") { return; }
    event.preventDefault();
    window.shopify.idToken().then(function (token) {
      sessionToken = token;
      event.detail.issueRequest(true);
    });
  });
  document.addEventListener("htmx:configRequest", function (event) {
    if (sessionToken) { event.detail.headers["Authorization"] = "Bearer " + sessionToken; }
  });
  document.addEventListener("htmx:beforeSwap", function (event) {
    if (event.detail.xhr.status === 422 || event.detail.xhr.status === 502) {
      event.detail.shouldSwap = true;
      event.detail.isError = false;
    }
  });
  document.body.addEventListener("pearlbot:toast", function (event) {
    var toasts = (event.detail && event.detail.toasts) || [];
    toasts.forEach(function (toast) {
      if (window.shopify && window.shopify.toast) {
        window.shopify.toast.show(toast.message, { isError: toast.isError });
      }
    });
  });
})();
"#
}

fn styles() -> &'static str {
    r#"
:root {
  --bg: #f1f1f1;
  --panel: #ffffff;
  --border: #e3e3e3;
  --text: #303030;
  --muted: #616161;
  --accent: #303030;
  --danger: #8e1f0b;
  --danger-bg: #fee9e8;
  --success-bg: #cdfee1;
}
* { box-sizing: border-box; }
html, body { margin: 0; background: var(--bg); color: var(--text); }
body {
  font-family: -apple-system, BlinkMacSystemFont, "San Francisco", "Segoe UI", Roboto, "Helvetica Neue", sans-serif;
  font-size: 14px;
}
.pb-page { display: grid; gap: 1rem; padding: 1.25rem; max-width: 64rem; }
.pb-card {
  background: var(--panel);
  border-radius: 12px;
  box-shadow: 0 1px 0 rgba(26, 26, 26, 0.07), inset 0 0 0 1px var(--border);
  padding: 1rem 1.25rem;
}
.pb-card h2 { margin: 0 0 0.4rem; font-size: 1.25rem; }
.pb-card hr { border: 0; border-top: 1px solid var(--border); margin: 0.4rem 0; }
.pb-card-header { margin-bottom: 1.5rem; }
.pb-form { display: grid; gap: 1rem; }
.pb-field { display: grid; gap: 0.3rem; }
.pb-field label { font-weight: 500; }
.pb-required { color: var(--danger); margin-left: 0.15rem; }
.pb-field input {
  width: 100%;
  padding: 0.45rem 0.6rem;
  border: 1px solid #8a8a8a;
  border-radius: 8px;
  font: inherit;
}
.pb-field input[aria-invalid="true"] { border-color: var(--danger); background: var(--danger-bg); }
.pb-connected-row { display: flex; gap: 0.5rem; }
.pb-field-error { margin: 0; color: var(--danger); }
.pb-help { margin: 0; color: var(--muted); }
.pb-help a { color: #005bd3; }
.pb-external { display: inline-flex; margin: 0 5px; }
.pb-actions { display: flex; gap: 0.5rem; align-items: center; }
.pb-btn {
  display: inline-flex;
  align-items: center;
  padding: 0.4rem 0.8rem;
  border-radius: 8px;
  border: 1px solid var(--border);
  background: var(--panel);
  color: var(--text);
  font: inherit;
  font-weight: 550;
  text-decoration: none;
  cursor: pointer;
}
.pb-btn.primary { background: var(--accent); border-color: var(--accent); color: #ffffff; }
.pb-btn[disabled] { opacity: 0.6; cursor: default; }
.pb-muted { color: var(--muted); margin: 0; line-height: 1.5; }
.pb-notice { padding: 0.55rem 0.75rem; border-radius: 8px; background: var(--success-bg); }
.pb-notice.error { background: var(--danger-bg); color: var(--danger); }
.pb-indicator { color: var(--muted); font-size: 0.85rem; }
.hidden { display: none; }
"#
}
