//! Toast messages and view-level errors

use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastVariant {
    #[default]
    Default,
    Destructive,
}

/// A toast a renderer would show after a user action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
}

impl Toast {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: ToastVariant::Default,
        }
    }

    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: ToastVariant::Destructive,
        }
    }

    pub fn is_destructive(&self) -> bool {
        self.variant == ToastVariant::Destructive
    }
}

/// Errors from dashboard actions
#[derive(Debug, Error)]
pub enum ViewError {
    /// Form input missing or malformed
    #[error("{title}: {message}")]
    Validation { title: String, message: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0} not found")]
    NotFound(String),

    /// A backend write failed; `action` reads like "update bed status"
    #[error("Failed to {action}: {source}")]
    Store {
        action: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ViewError {
    pub fn validation(title: impl Into<String>, message: impl Into<String>) -> Self {
        ViewError::Validation {
            title: title.into(),
            message: message.into(),
        }
    }

    /// `map_err` adapter naming the failed action
    pub fn store(action: &'static str) -> impl FnOnce(StoreError) -> ViewError {
        move |source| ViewError::Store { action, source }
    }

    /// The destructive toast shown for this error
    pub fn toast(&self) -> Toast {
        match self {
            ViewError::Validation { title, message } => Toast::destructive(title, message),
            ViewError::Auth(AuthError::Forbidden { action, required }) => Toast::destructive(
                "Permission denied",
                format!("{} requires the {} role.", action, required.label()),
            ),
            ViewError::Auth(e) => Toast::destructive("Not allowed", e.to_string()),
            ViewError::NotFound(what) => Toast::destructive("Error", format!("{} not found", what)),
            ViewError::Store { action, .. } => {
                Toast::destructive("Error", format!("Failed to {}. Please try again.", action))
            }
        }
    }
}

pub type ViewResult<T> = Result<T, ViewError>;
