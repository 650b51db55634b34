use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::callback::{CallbackError, CallbackTransport, StoreAccessTokenPayload};
use crate::credentials::API_KEY_REQUIRED;
use crate::platform::{PlatformClient, Toast};

pub const CONNECTED_MESSAGE: &str = "Connected with PearlBot!";
pub const CONNECT_FAILED_MESSAGE: &str = "Failed to connect.";
pub const CONNECT_ERROR_MESSAGE: &str = "Connection error.";
pub const SESSION_MISSING_MESSAGE: &str = "Session data is missing!";
pub const CONNECT_IN_PROGRESS_MESSAGE: &str = "Connection already in progress.";

/// The slice of the admin session forwarded to PearlBot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSession {
    pub shop: String,
    pub is_online: bool,
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Rejected { status: u16 },
    TransportFailed,
    MissingSession,
    MissingApiKey,
    AlreadyInProgress,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn toast(&self) -> Toast {
        match self {
            Self::Connected => Toast::info(CONNECTED_MESSAGE),
            Self::Rejected { .. } => Toast::error(CONNECT_FAILED_MESSAGE),
            Self::TransportFailed => Toast::error(CONNECT_ERROR_MESSAGE),
            Self::MissingSession => Toast::error(SESSION_MISSING_MESSAGE),
            Self::MissingApiKey => Toast::error(API_KEY_REQUIRED),
            Self::AlreadyInProgress => Toast::error(CONNECT_IN_PROGRESS_MESSAGE),
        }
    }
}

/// Posts the store credentials to PearlBot and reports the outcome through
/// the platform toast. The chatbot id is forwarded as-is; only the api key
/// gates the call.
pub async fn connect_store<P, T>(
    platform: &P,
    transport: &T,
    session: Option<&ConnectSession>,
    chatbot_id: &str,
    api_key: &str,
) -> ConnectOutcome
where
    P: PlatformClient + ?Sized,
    T: CallbackTransport + ?Sized,
{
    let outcome = match (session, api_key.trim().is_empty()) {
        (None, _) => {
            tracing::error!(target: "pearlbot.connect", "session data is missing");
            ConnectOutcome::MissingSession
        }
        (Some(_), true) => {
            tracing::error!(target: "pearlbot.connect", "api key is missing");
            ConnectOutcome::MissingApiKey
        }
        (Some(session), false) => {
            let payload = StoreAccessTokenPayload {
                bot_id: chatbot_id.to_string(),
                shop: session.shop.clone(),
                is_online: session.is_online,
                access_token: session.access_token.clone(),
            };
            match transport.store_access_token(api_key, &payload).await {
                Ok(_) => {
                    tracing::info!(
                        target: "pearlbot.connect",
                        shop = %session.shop,
                        "shopify access token stored with pearlbot",
                    );
                    ConnectOutcome::Connected
                }
                Err(CallbackError::Rejected { status, body }) => {
                    tracing::warn!(
                        target: "pearlbot.connect",
                        shop = %session.shop,
                        status,
                        body = %body,
                        "pearlbot rejected shopify access token",
                    );
                    ConnectOutcome::Rejected { status }
                }
                Err(error) => {
                    tracing::warn!(
                        target: "pearlbot.connect",
                        shop = %session.shop,
                        error = %error,
                        "pearlbot callback request failed",
                    );
                    ConnectOutcome::TransportFailed
                }
            }
        }
    };

    platform.notify(outcome.toast());
    outcome
}

/// Tracks shops with a connect call in flight so a double click does not
/// send a second hand-off while the first is pending.
#[derive(Debug, Clone, Default)]
pub struct ConnectGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ConnectGuard {
    pub fn try_acquire(&self, shop: &str) -> Option<ConnectPermit> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(shop.to_string()) {
            return None;
        }
        Some(ConnectPermit {
            shop: shop.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct ConnectPermit {
    shop: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ConnectPermit {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.shop);
    }
}
