//! Push/Notification Handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::NotificationConfig;

/// Action id for the "open" button.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id for the "dismiss" button.
pub const ACTION_CLOSE: &str = "close";

/// Push message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse a push message. Anything that is not a JSON object is dropped.
    pub fn parse(data: &[u8]) -> Option<Self> {
        // Struct deserialization also accepts arrays (fields by position).
        let parsed = serde_json::from_slice::<Value>(data).and_then(|value| match value {
            Value::Object(_) => serde_json::from_value(value),
            _ => Err(serde::de::Error::custom("expected a JSON object")),
        });
        match parsed {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(error = %e, len = data.len(), "Dropping malformed push payload");
                None
            }
        }
    }
}

/// Notification button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Data carried by a notification until it is clicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Deep link opened by the explore action.
    pub url: String,
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Render a payload, filling gaps from `config`.
    pub fn from_payload(payload: PushPayload, config: &NotificationConfig) -> Self {
        Self {
            title: payload.title.unwrap_or_else(|| config.title.clone()),
            body: payload.body.unwrap_or_else(|| config.default_body.clone()),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            data: NotificationData {
                url: payload.url.unwrap_or_else(|| config.default_url.clone()),
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_EXPLORE.to_string(),
                    title: "Open".to_string(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: "Close".to_string(),
                },
            ],
        }
    }
}

/// What the user clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    /// Notification body (no action button).
    Body,
    Explore,
    Close,
    Other(String),
}

impl ClickAction {
    /// Map an action id; empty means the body was clicked.
    pub fn from_action(action: &str) -> Self {
        match action {
            "" => ClickAction::Body,
            ACTION_EXPLORE => ClickAction::Explore,
            ACTION_CLOSE => ClickAction::Close,
            other => ClickAction::Other(other.to_string()),
        }
    }
}

/// A notification click.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
    pub notification: Notification,
    pub action: ClickAction,
}

impl NotificationClick {
    /// Route to open, if any.
    pub fn target<'a>(&'a self, config: &'a NotificationConfig) -> Option<&'a str> {
        match &self.action {
            ClickAction::Explore => Some(self.notification.data.url.as_str()),
            ClickAction::Body => Some(config.default_url.as_str()),
            ClickAction::Close | ClickAction::Other(_) => None,
        }
    }
}
