//! Outbound notifications to the host application.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::menu::RouteIntent;

const EVENT_BUFFER: usize = 64;

/// Events sent from the bubble to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BridgeEvent {
    #[serde(rename = "overlay_started")]
    OverlayStarted,
    #[serde(rename = "overlay_stopped")]
    OverlayStopped,
    #[serde(rename = "overlay_permission_requested")]
    PermissionRequested,
    #[serde(rename = "overlay_permission_result")]
    PermissionResult { granted: bool },
    #[serde(rename = "overlay_permission_timeout")]
    PermissionTimeout,
    #[serde(rename = "overlay_permission_error")]
    PermissionError,
    #[serde(rename = "overlayRouteIntent")]
    RouteIntent(RouteIntent),
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::OverlayStarted => "overlay_started",
            BridgeEvent::OverlayStopped => "overlay_stopped",
            BridgeEvent::PermissionRequested => "overlay_permission_requested",
            BridgeEvent::PermissionResult { .. } => "overlay_permission_result",
            BridgeEvent::PermissionTimeout => "overlay_permission_timeout",
            BridgeEvent::PermissionError => "overlay_permission_error",
            BridgeEvent::RouteIntent(_) => "overlayRouteIntent",
        }
    }
}

/// Fan-out of bridge events to every subscribed connection.
///
/// Emitting with nobody listening is not an error; the event is dropped.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<BridgeEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn is_listening(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    /// Returns whether anyone received the event.
    pub fn emit(&self, event: BridgeEvent) -> bool {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!("Emitted {} to {} listener(s)", name, receivers);
                true
            }
            Err(_) => {
                debug!("Dropped {}: no listener", name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_match_the_host_protocol() {
        let cases = [
            (BridgeEvent::OverlayStarted, json!({"type": "overlay_started"})),
            (
                BridgeEvent::PermissionResult { granted: false },
                json!({"type": "overlay_permission_result", "data": {"granted": false}}),
            ),
            (
                BridgeEvent::RouteIntent(RouteIntent::new("Anchor", false).unwrap()),
                json!({"type": "overlayRouteIntent", "data": {"route": "Anchor", "autoRecord": false}}),
            ),
        ];
        for (event, expected) in cases {
            assert_eq!(serde_json::to_value(&event).unwrap(), expected);
            assert_eq!(expected["type"], event.name());
        }
    }

    #[test]
    fn emitting_without_listeners_is_silent() {
        let emitter = EventEmitter::new();
        assert!(!emitter.is_listening());
        assert!(!emitter.emit(BridgeEvent::OverlayStopped));
    }

    #[test]
    fn subscribers_receive_events() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();
        assert!(emitter.is_listening());
        assert!(emitter.emit(BridgeEvent::PermissionTimeout));
        assert_eq!(rx.try_recv().unwrap(), BridgeEvent::PermissionTimeout);
        drop(rx);
        assert!(!emitter.is_listening());
    }
}
