use serde::Serialize;
use thiserror::Error;

use crate::callback::CallbackTransport;
use crate::connect::{ConnectOutcome, ConnectSession, connect_store};
use crate::credentials::{CredentialForm, CredentialPair, FormErrors};
use crate::links::theme_editor_url;
use crate::platform::{PlatformClient, Toast};

pub const SETTINGS_SAVED_MESSAGE: &str = "App settings saved.";
pub const SETTINGS_SAVE_FAILED_MESSAGE: &str = "Failed to save settings.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    #[default]
    Idle,
    Editing,
    Submitting,
    Saved,
    SaveFailed,
}

impl SaveState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Editing => "editing",
            Self::Submitting => "submitting",
            Self::Saved => "saved",
            Self::SaveFailed => "save_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectState {
    #[default]
    Idle,
    Connecting,
    Connected,
    ConnectFailed,
}

impl ConnectState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectFailed => "connect_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action} while save state is {state}")]
    Save {
        action: &'static str,
        state: &'static str,
    },
    #[error("cannot {action} while connect state is {state}")]
    Connect {
        action: &'static str,
        state: &'static str,
    },
}

/// The two independent UI state machines of the settings page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageState {
    pub save: SaveState,
    pub connect: ConnectState,
}

impl PageState {
    pub fn edit(&mut self) -> Result<(), TransitionError> {
        if self.save == SaveState::Submitting {
            return Err(self.save_error("edit"));
        }
        self.save = SaveState::Editing;
        Ok(())
    }

    pub fn begin_submit(&mut self) -> Result<(), TransitionError> {
        if self.save != SaveState::Editing {
            return Err(self.save_error("submit"));
        }
        self.save = SaveState::Submitting;
        Ok(())
    }

    pub fn finish_submit(&mut self, saved: bool) -> Result<(), TransitionError> {
        if self.save != SaveState::Submitting {
            return Err(self.save_error("finish submit"));
        }
        self.save = if saved {
            SaveState::Saved
        } else {
            SaveState::SaveFailed
        };
        Ok(())
    }

    pub fn begin_connect(&mut self) -> Result<(), TransitionError> {
        if self.connect == ConnectState::Connecting {
            return Err(self.connect_error("connect"));
        }
        self.connect = ConnectState::Connecting;
        Ok(())
    }

    pub fn finish_connect(&mut self, connected: bool) -> Result<(), TransitionError> {
        if self.connect != ConnectState::Connecting {
            return Err(self.connect_error("finish connect"));
        }
        self.connect = if connected {
            ConnectState::Connected
        } else {
            ConnectState::ConnectFailed
        };
        Ok(())
    }

    fn save_error(&self, action: &'static str) -> TransitionError {
        TransitionError::Save {
            action,
            state: self.save.as_str(),
        }
    }

    fn connect_error(&self, action: &'static str) -> TransitionError {
        TransitionError::Connect {
            action,
            state: self.connect.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The platform accepted the request but reported per-field errors.
    Rejected { messages: Vec<String> },
}

/// Page controller: form values, API key visibility and page state.
#[derive(Debug, Clone, Default)]
pub struct SettingsPage {
    form: CredentialForm,
    api_key_visible: bool,
    state: PageState,
}

impl SettingsPage {
    pub fn new(initial: &CredentialPair) -> Self {
        Self {
            form: CredentialForm::from_pair(initial),
            api_key_visible: false,
            state: PageState::default(),
        }
    }

    pub fn form(&self) -> &CredentialForm {
        &self.form
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn api_key_visible(&self) -> bool {
        self.api_key_visible
    }

    /// `type` attribute for the API key input.
    pub fn api_key_input_type(&self) -> &'static str {
        if self.api_key_visible { "text" } else { "password" }
    }

    pub fn toggle_api_key_visibility(&mut self) {
        self.api_key_visible = !self.api_key_visible;
    }

    pub fn set_api_key_visible(&mut self, visible: bool) {
        self.api_key_visible = visible;
    }

    pub fn set_chatbot_id(&mut self, value: impl Into<String>) -> Result<(), TransitionError> {
        self.state.edit()?;
        self.form.chatbot_id = value.into();
        Ok(())
    }

    pub fn set_api_key(&mut self, value: impl Into<String>) -> Result<(), TransitionError> {
        self.state.edit()?;
        self.form.api_key = value.into();
        Ok(())
    }

    /// Validates the form. On success the page enters `Submitting` and the
    /// caller performs the save; on failure the page stays in `Editing`.
    pub fn submit(&mut self) -> Result<CredentialPair, SubmitError> {
        if self.state.save != SaveState::Editing {
            self.state.edit()?;
        }
        let pair = self.form.validate()?;
        self.state.begin_submit()?;
        Ok(pair)
    }

    pub fn complete_save<P>(
        &mut self,
        platform: &P,
        outcome: &SaveOutcome,
    ) -> Result<(), TransitionError>
    where
        P: PlatformClient + ?Sized,
    {
        match outcome {
            SaveOutcome::Saved => {
                self.state.finish_submit(true)?;
                platform.notify(Toast::info(SETTINGS_SAVED_MESSAGE));
            }
            SaveOutcome::Rejected { messages } => {
                self.state.finish_submit(false)?;
                let detail = messages.join(" ");
                let message = if detail.is_empty() {
                    SETTINGS_SAVE_FAILED_MESSAGE.to_string()
                } else {
                    format!("{SETTINGS_SAVE_FAILED_MESSAGE} {detail}")
                };
                platform.notify(Toast::error(message));
            }
        }
        Ok(())
    }

    /// Runs the connect action with the current form values.
    pub async fn connect<P, T>(
        &mut self,
        platform: &P,
        transport: &T,
        session: Option<&ConnectSession>,
    ) -> Result<ConnectOutcome, TransitionError>
    where
        P: PlatformClient + ?Sized,
        T: CallbackTransport + ?Sized,
    {
        self.state.begin_connect()?;
        let outcome = connect_store(
            platform,
            transport,
            session,
            &self.form.chatbot_id,
            &self.form.api_key,
        )
        .await;
        self.state.finish_connect(outcome.is_connected())?;
        Ok(outcome)
    }

    /// Theme-editor link for the platform's current shop, if known.
    pub fn theme_editor_url<P>(&self, platform: &P, extension_id: &str) -> Option<String>
    where
        P: PlatformClient + ?Sized,
    {
        platform
            .shop_domain()
            .and_then(|shop| theme_editor_url(&shop, extension_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] FormErrors),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackError;
    use crate::connect::tests::{FakeTransport, session};
    use crate::platform::CollectingPlatform;

    fn loaded_page() -> SettingsPage {
        SettingsPage::new(&CredentialPair {
            chatbot_id: "X".to_string(),
            api_key: "Y".to_string(),
        })
    }

    #[test]
    fn page_initializes_from_loader_values() {
        let page = loaded_page();
        assert_eq!(page.form().chatbot_id, "X");
        assert_eq!(page.form().api_key, "Y");
        assert_eq!(page.state(), PageState::default());
        assert_eq!(page.api_key_input_type(), "password");
    }

    #[test]
    fn toggling_visibility_keeps_the_value() {
        let mut page = loaded_page();
        page.toggle_api_key_visibility();
        assert_eq!(page.api_key_input_type(), "text");
        assert_eq!(page.form().api_key, "Y");

        page.toggle_api_key_visibility();
        assert_eq!(page.api_key_input_type(), "password");
        assert_eq!(page.form().api_key, "Y");
    }

    #[test]
    fn blank_submit_is_blocked_and_stays_editing() {
        let mut page = loaded_page();
        page.set_chatbot_id("").expect("edit");

        let error = page.submit().expect_err("blank chatbot id");
        assert!(matches!(error, SubmitError::Invalid(_)));
        assert_eq!(page.state().save, SaveState::Editing);
        assert!(page.form().errors().message_for("chatbotId").is_some());
    }

    #[test]
    fn save_round_trip_reaches_saved_with_toast() {
        let platform = CollectingPlatform::new(None);
        let mut page = loaded_page();

        let pair = page.submit().expect("valid submit");
        assert_eq!(pair.chatbot_id, "X");
        assert_eq!(page.state().save, SaveState::Submitting);
        assert!(page.submit().is_err(), "second submit while submitting");

        page.complete_save(&platform, &SaveOutcome::Saved).expect("complete");
        assert_eq!(page.state().save, SaveState::Saved);
        assert_eq!(platform.take_toasts(), vec![Toast::info("App settings saved.")]);

        page.set_api_key("Z").expect("edit after save");
        assert_eq!(page.state().save, SaveState::Editing);
    }

    #[test]
    fn rejected_save_surfaces_user_errors() {
        let platform = CollectingPlatform::new(None);
        let mut page = loaded_page();
        page.submit().expect("valid submit");

        page.complete_save(
            &platform,
            &SaveOutcome::Rejected {
                messages: vec!["Value is too long.".to_string()],
            },
        )
        .expect("complete");

        assert_eq!(page.state().save, SaveState::SaveFailed);
        assert_eq!(
            platform.take_toasts(),
            vec![Toast::error("Failed to save settings. Value is too long.")]
        );
    }

    #[test]
    fn finishing_without_submitting_is_rejected() {
        let mut state = PageState::default();
        assert_eq!(
            state.finish_submit(true),
            Err(TransitionError::Save {
                action: "finish submit",
                state: "idle",
            })
        );
        assert!(state.finish_connect(true).is_err());
    }

    #[tokio::test]
    async fn connect_moves_through_connecting_to_terminal_state() {
        let platform = CollectingPlatform::new(Some("demo.myshopify.com".to_string()));
        let mut page = loaded_page();

        let ok = FakeTransport::new(|| Ok(serde_json::Value::Null));
        let outcome = page.connect(&platform, &ok, Some(&session())).await.expect("connect");
        assert!(outcome.is_connected());
        assert_eq!(page.state().connect, ConnectState::Connected);

        let failing = FakeTransport::new(|| {
            Err(CallbackError::Rejected {
                status: 500,
                body: String::new(),
            })
        });
        page.connect(&platform, &failing, Some(&session()))
            .await
            .expect("connect again");
        assert_eq!(page.state().connect, ConnectState::ConnectFailed);
        assert_eq!(page.state().save, SaveState::Idle);
    }

    #[test]
    fn theme_link_needs_a_known_shop() {
        let page = loaded_page();
        let known = CollectingPlatform::new(Some("demo.myshopify.com".to_string()));
        let unknown = CollectingPlatform::new(None);

        let url = page.theme_editor_url(&known, "ext-1").expect("known shop");
        assert!(url.ends_with("activateAppId=ext-1/chatbot-embed"));
        assert_eq!(page.theme_editor_url(&unknown, "ext-1"), None);
    }
}
