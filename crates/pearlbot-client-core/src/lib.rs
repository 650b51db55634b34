//! Settings page logic for the PearlBot Shopify app.
//!
//! Everything here is independent of the HTTP layer: the credential form and
//! its validation, the page state machine, the connect action against the
//! PearlBot callback endpoint, and the Shopify theme-editor deep link. Host
//! capabilities (shop lookup, toasts) are injected through
//! [`platform::PlatformClient`].

pub mod callback;
pub mod connect;
pub mod credentials;
pub mod links;
pub mod page;
pub mod platform;

pub use callback::{CallbackClient, CallbackError, CallbackTransport, StoreAccessTokenPayload};
pub use connect::{ConnectGuard, ConnectOutcome, ConnectPermit, ConnectSession};
pub use credentials::{CredentialForm, CredentialPair, FieldError, FormErrors};
pub use links::{account_settings_url, dashboard_url, theme_editor_url};
pub use page::{
    ConnectState, PageState, SaveOutcome, SaveState, SettingsPage, SubmitError, TransitionError,
};
pub use platform::{CollectingPlatform, PlatformClient, Toast};

/// Metafield namespace holding the PearlBot credentials.
pub const METAFIELD_NAMESPACE: &str = "pearlbot";
pub const CHATBOT_ID_KEY: &str = "chatbot_id";
pub const API_KEY_KEY: &str = "api_key";
/// Number of metafields read back on page load.
pub const CREDENTIAL_METAFIELD_COUNT: u32 = 2;
