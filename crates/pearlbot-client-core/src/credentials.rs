use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{API_KEY_KEY, CHATBOT_ID_KEY};

pub const CHATBOT_ID_FIELD: &str = "chatbotId";
pub const API_KEY_FIELD: &str = "apiKey";
pub const CHATBOT_ID_REQUIRED: &str = "ChatBot ID is required!";
pub const API_KEY_REQUIRED: &str = "API Key is required!";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub chatbot_id: String,
    pub api_key: String,
}

impl CredentialPair {
    /// Builds the pair from stored metafield `(key, value)` entries. Unknown
    /// keys are ignored, missing keys stay empty, the last duplicate wins.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut pair = Self::default();
        for (key, value) in entries {
            match key {
                CHATBOT_ID_KEY => pair.chatbot_id = value.to_string(),
                API_KEY_KEY => pair.api_key = value.to_string(),
                _ => {}
            }
        }
        pair
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("credential form is invalid")]
pub struct FormErrors {
    errors: Vec<FieldError>,
}

impl FormErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    pub fn message_for(&self, field: &str) -> Option<&'static str> {
        self.errors
            .iter()
            .find(|error| error.field == field)
            .map(|error| error.message)
    }

    /// Field name to messages, the shape used by the JSON error envelope.
    pub fn to_field_map(&self) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for error in &self.errors {
            map.entry(error.field.to_string())
                .or_default()
                .push(error.message.to_string());
        }
        map
    }

    fn push(&mut self, field: &'static str, message: &'static str) {
        self.errors.push(FieldError { field, message });
    }
}

/// Editable credential values plus the inline errors from the last
/// validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialForm {
    pub chatbot_id: String,
    pub api_key: String,
    errors: FormErrors,
}

impl CredentialForm {
    pub fn new(chatbot_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            chatbot_id: chatbot_id.into(),
            api_key: api_key.into(),
            errors: FormErrors::default(),
        }
    }

    pub fn from_pair(pair: &CredentialPair) -> Self {
        Self::new(pair.chatbot_id.clone(), pair.api_key.clone())
    }

    pub fn errors(&self) -> &FormErrors {
        &self.errors
    }

    /// Both fields must be non-blank. Errors are kept on the form for inline
    /// rendering and also returned.
    pub fn validate(&mut self) -> Result<CredentialPair, FormErrors> {
        let mut errors = FormErrors::default();
        if self.chatbot_id.trim().is_empty() {
            errors.push(CHATBOT_ID_FIELD, CHATBOT_ID_REQUIRED);
        }
        if self.api_key.trim().is_empty() {
            errors.push(API_KEY_FIELD, API_KEY_REQUIRED);
        }

        self.errors = errors.clone();
        if errors.is_empty() {
            Ok(CredentialPair {
                chatbot_id: self.chatbot_id.clone(),
                api_key: self.api_key.clone(),
            })
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_built_from_metafield_entries() {
        let pair = CredentialPair::from_entries([
            ("api_key", "key-123"),
            ("unrelated", "ignored"),
            ("chatbot_id", "bot-9"),
        ]);
        assert_eq!(pair.chatbot_id, "bot-9");
        assert_eq!(pair.api_key, "key-123");

        let empty = CredentialPair::from_entries(std::iter::empty());
        assert_eq!(empty, CredentialPair::default());
    }

    #[test]
    fn blank_fields_fail_validation_with_inline_messages() {
        let mut form = CredentialForm::new("   ", "");
        let errors = form.validate().expect_err("blank form must be rejected");

        assert_eq!(errors.message_for(CHATBOT_ID_FIELD), Some(CHATBOT_ID_REQUIRED));
        assert_eq!(errors.message_for(API_KEY_FIELD), Some(API_KEY_REQUIRED));
        assert_eq!(form.errors(), &errors);
        assert_eq!(
            errors.to_field_map().get("apiKey"),
            Some(&vec!["API Key is required!".to_string()])
        );
    }

    #[test]
    fn valid_form_clears_previous_errors() {
        let mut form = CredentialForm::new("", "key");
        assert!(form.validate().is_err());
        assert_eq!(form.errors().message_for(API_KEY_FIELD), None);

        form.chatbot_id = "bot".to_string();
        let pair = form.validate().expect("valid form");
        assert_eq!(pair.chatbot_id, "bot");
        assert_eq!(pair.api_key, "key");
        assert!(form.errors().is_empty());
    }
}
