use std::sync::{Mutex, PoisonError};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Toast {
    pub message: String,
    pub is_error: bool,
}

impl Toast {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }
}

/// Host-admin capabilities the settings page depends on.
pub trait PlatformClient: Send + Sync {
    /// The merchant's `*.myshopify.com` domain, when known.
    fn shop_domain(&self) -> Option<String>;

    fn notify(&self, toast: Toast);
}

/// Platform client that records toasts so a request handler can forward them
/// to the browser after the action completes.
#[derive(Debug, Default)]
pub struct CollectingPlatform {
    shop_domain: Option<String>,
    toasts: Mutex<Vec<Toast>>,
}

impl CollectingPlatform {
    pub fn new(shop_domain: Option<String>) -> Self {
        Self {
            shop_domain,
            toasts: Mutex::new(Vec::new()),
        }
    }

    pub fn take_toasts(&self) -> Vec<Toast> {
        let mut toasts = self.toasts.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *toasts)
    }
}

impl PlatformClient for CollectingPlatform {
    fn shop_domain(&self) -> Option<String> {
        self.shop_domain.clone()
    }

    fn notify(&self, toast: Toast) {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(toast);
    }
}
