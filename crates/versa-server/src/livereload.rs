//! WebSocket-based live reload.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Messages sent to preview clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Full page reload
    Reload,

    /// Connection established
    Connected,
}

/// Hub for broadcasting reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
}

impl ReloadHub {
    /// Create a new reload hub.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // No receivers just means no browser is connected yet
        let _ = self.sender.send(msg);
    }

    /// Subscribe to reload messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    /// Get the number of connected clients.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the client-side live reload script.
///
/// Pages include it from the live reload port when the `watch` variable is set.
/// After the socket drops the script keeps polling and reloads once the dev
/// server is reachable again.
pub fn live_reload_script(ws_url: &str) -> String {
    format!(
        r#"
(function() {{
  'use strict';

  var url = '{}';
  var attempts = 0;
  var maxAttempts = 10;

  function connect(reloadOnOpen) {{
    var ws = new WebSocket(url);

    ws.onopen = function() {{
      attempts = 0;
      if (reloadOnOpen) {{
        location.reload();
      }}
    }};

    ws.onmessage = function(event) {{
      var msg = JSON.parse(event.data);
      if (msg.type === 'reload') {{
        location.reload();
      }}
    }};

    ws.onclose = function() {{
      if (attempts < maxAttempts) {{
        attempts++;
        setTimeout(function() {{ connect(true); }}, 1000 * attempts);
      }}
    }};
  }}

  connect(false);
}})();
"#,
        ws_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_broadcasts_messages() {
        let hub = ReloadHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.send(ReloadMessage::Reload);

        assert_eq!(first.try_recv().unwrap(), ReloadMessage::Reload);
        assert_eq!(second.try_recv().unwrap(), ReloadMessage::Reload);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn sending_without_clients_is_harmless() {
        let hub = ReloadHub::new();

        hub.send(ReloadMessage::Reload);

        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn serializes_messages() {
        assert_eq!(
            serde_json::to_string(&ReloadMessage::Reload).unwrap(),
            r#"{"type":"reload"}"#
        );
        assert_eq!(
            serde_json::to_string(&ReloadMessage::Connected).unwrap(),
            r#"{"type":"connected"}"#
        );
    }

    #[test]
    fn script_targets_socket_url() {
        let script = live_reload_script("ws://127.0.0.1:35729/livereload");

        assert!(script.contains("'ws://127.0.0.1:35729/livereload'"));
    }
}
