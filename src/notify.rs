//! Push notifications and notification clicks.

use serde::Deserialize;
use url::Url;

use crate::config::NotificationsConfig;

/// Payload of a push message. Both fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
}

impl PushPayload {
  /// Parse push data; missing or non-JSON data yields an empty payload.
  pub fn parse(data: Option<&[u8]>) -> Self {
    data
      .and_then(|bytes| serde_json::from_slice(bytes).ok())
      .unwrap_or_default()
  }
}

/// A notification to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Url,
}

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: Url,
  pub focusable: bool,
}

/// What a notification click should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
  Focus(String),
  Open(Url),
}

/// Build the notification for a push, filling in defaults.
pub fn notification_for(
  payload: PushPayload,
  config: &NotificationsConfig,
  icon: Url,
) -> Notification {
  Notification {
    title: payload.title.unwrap_or_else(|| config.default_title.clone()),
    body: payload.body.unwrap_or_else(|| config.default_body.clone()),
    icon,
  }
}

/// Focus the first focusable window, else open one at `fallback`.
pub fn click_action(clients: &[WindowClient], fallback: Url) -> ClickAction {
  clients
    .iter()
    .find(|client| client.focusable)
    .map(|client| ClickAction::Focus(client.id.clone()))
    .unwrap_or(ClickAction::Open(fallback))
}
