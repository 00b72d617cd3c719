//! Single-slot alert display queue.
//!
//! [`machine::AlertMachine`] holds the state transitions and knows nothing
//! about time; [`service::AlertQueue`] owns a machine on a tokio task and
//! turns its timer requests into deadlines.

pub mod machine;
pub mod service;

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

pub use machine::{AlertMachine, Phase, QueueSettings, QueueSnapshot, TimerKind, TimerRequest};
pub use service::{AlertHandle, AlertQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ButtonStyle {
    #[default]
    Default,
    Cancel,
    Destructive,
}

/// Runs on the queue's task when its button is pressed. The handle lets the
/// handler queue follow-up alerts before the current one is torn down.
pub type PressHandler = Arc<dyn Fn(&AlertHandle) + Send + Sync>;

#[derive(Clone)]
pub struct AlertButton {
    pub text: String,
    pub style: ButtonStyle,
    pub on_press: Option<PressHandler>,
}

impl AlertButton {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: ButtonStyle::Default,
            on_press: None,
        }
    }

    pub fn cancel(text: impl Into<String>) -> Self {
        Self {
            style: ButtonStyle::Cancel,
            ..Self::new(text)
        }
    }

    pub fn destructive(text: impl Into<String>) -> Self {
        Self {
            style: ButtonStyle::Destructive,
            ..Self::new(text)
        }
    }

    pub fn on_press<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AlertHandle) + Send + Sync + 'static,
    {
        self.on_press = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for AlertButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertButton")
            .field("text", &self.text)
            .field("style", &self.style)
            .field("on_press", &self.on_press.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub title: String,
    pub message: Option<String>,
    pub buttons: Vec<AlertButton>,
}

impl AlertConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: None,
            buttons: Vec::new(),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn button(mut self, button: AlertButton) -> Self {
        self.buttons.push(button);
        self
    }

    /// Buttons in display order: a lone `OK` when none were given, and
    /// cancel-style buttons moved to the end.
    pub fn display_buttons(&self) -> Vec<AlertButton> {
        if self.buttons.is_empty() {
            return vec![AlertButton::new("OK")];
        }
        let mut buttons = self.buttons.clone();
        buttons.sort_by_key(|button| button.style == ButtonStyle::Cancel);
        buttons
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonView {
    pub text: String,
    pub style: ButtonStyle,
}

/// What a renderer needs to draw the current alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertView {
    pub id: AlertId,
    pub title: String,
    pub message: Option<String>,
    pub buttons: Vec<ButtonView>,
    pub visible: bool,
}
