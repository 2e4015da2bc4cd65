//! Translation between host commands and the overlay.
//!
//! Inbound commands become [`UiRequest`]s or permission requests; service
//! notices become outbound [`BridgeEvent`]s.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::events::{BridgeEvent, EventEmitter};
use crate::menu::RouteIntent;
use crate::permission::PermissionGate;
use crate::service::{ServiceNotice, UiRequest};

/// Commands sent from the host to the bubble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum BridgeCommand {
    StartOverlay,
    StopOverlay,
    /// Negative values are shown as zero
    #[serde(alias = "updateCounter")]
    UpdateCount(i64),
    CollapseOverlay,
    IsExpanded,
    CanDrawOverlays,
    RequestOverlayPermission,
    /// The host was launched with route parameters
    RouteIntent {
        route: String,
        #[serde(default, rename = "autoRecord")]
        auto_record: bool,
    },
    /// Turn this connection into an event stream
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Exactly one per command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum BridgeResponse {
    Ack,
    Bool(bool),
    Error(ErrorBody),
}

pub const E_INVALID_ROUTE: &str = "E_INVALID_ROUTE";
pub const E_BAD_REQUEST: &str = "E_BAD_REQUEST";

impl BridgeResponse {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        BridgeResponse::Error(ErrorBody {
            code: code.to_string(),
            message: message.into(),
        })
    }
}

/// Clamp a host-supplied counter into what the bubble can show.
pub fn normalize_count(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone)]
pub struct OverlayBridge {
    ui: mpsc::UnboundedSender<UiRequest>,
    gate: PermissionGate,
    events: EventEmitter,
    pending_route: Arc<Mutex<Option<RouteIntent>>>,
    host_command: Option<Arc<Vec<String>>>,
}

impl OverlayBridge {
    pub fn new(
        ui: mpsc::UnboundedSender<UiRequest>,
        gate: PermissionGate,
        events: EventEmitter,
        host_command: Option<Vec<String>>,
    ) -> Self {
        Self {
            ui,
            gate,
            events,
            pending_route: Arc::new(Mutex::new(None)),
            host_command: host_command.filter(|cmd| !cmd.is_empty()).map(Arc::new),
        }
    }

    pub async fn handle(&self, command: BridgeCommand) -> BridgeResponse {
        debug!("Bridge command: {:?}", command);
        match command {
            BridgeCommand::StartOverlay => {
                let (tx, rx) = oneshot::channel();
                self.send(UiRequest::Start(tx));
                let live = rx.await.unwrap_or(false);
                if !live {
                    warn!("startOverlay finished without a visible bubble");
                }
                BridgeResponse::Ack
            }
            BridgeCommand::StopOverlay => {
                self.send(UiRequest::Stop);
                BridgeResponse::Ack
            }
            BridgeCommand::UpdateCount(count) => {
                self.send(UiRequest::UpdateCount(normalize_count(count)));
                BridgeResponse::Ack
            }
            BridgeCommand::CollapseOverlay => {
                self.send(UiRequest::Collapse);
                BridgeResponse::Ack
            }
            BridgeCommand::IsExpanded => {
                let (tx, rx) = oneshot::channel();
                self.send(UiRequest::IsExpanded(tx));
                BridgeResponse::Bool(rx.await.unwrap_or(false))
            }
            BridgeCommand::CanDrawOverlays => BridgeResponse::Bool(self.gate.can_draw_overlays()),
            BridgeCommand::RequestOverlayPermission => match self.gate.request_permission().await {
                Ok(granted) => BridgeResponse::Bool(granted),
                Err(e) => BridgeResponse::error(e.code(), e.to_string()),
            },
            BridgeCommand::RouteIntent { route, auto_record } => {
                match RouteIntent::new(route, auto_record) {
                    Some(intent) => {
                        self.deliver_route(intent);
                        BridgeResponse::Ack
                    }
                    None => BridgeResponse::error(E_INVALID_ROUTE, "Route must not be empty"),
                }
            }
            BridgeCommand::Subscribe => BridgeResponse::Ack,
        }
    }

    /// Attach a listener. A route held while nobody listened is handed to it.
    pub fn subscribe(&self) -> (broadcast::Receiver<BridgeEvent>, Option<RouteIntent>) {
        let receiver = self.events.subscribe();
        let pending = self
            .pending_route
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        (receiver, pending)
    }

    /// Emit the route to a listening host, or hold it and launch the host.
    pub fn deliver_route(&self, intent: RouteIntent) {
        if self.events.is_listening() {
            self.events.emit(BridgeEvent::RouteIntent(intent));
            return;
        }
        info!("No host listening; holding route {:?}", intent.route);
        *self
            .pending_route
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(intent.clone());
        self.launch_host(&intent);
    }

    fn launch_host(&self, intent: &RouteIntent) {
        let Some(command) = self.host_command.as_deref() else {
            return;
        };
        let Some((program, args)) = command.split_first() else {
            return;
        };
        match Command::new(program)
            .args(args)
            .args(intent.launch_args())
            .spawn()
        {
            Ok(mut child) => {
                info!("Launched host {:?} for route {:?}", program, intent.route);
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        warn!("Failed to wait for host process: {}", e);
                    }
                });
            }
            Err(e) => warn!("Failed to launch host {:?}: {}", program, e),
        }
    }

    /// Turn service notices into events until the service side goes away.
    pub async fn run_notices(self, mut notices: mpsc::UnboundedReceiver<ServiceNotice>) {
        while let Some(notice) = notices.recv().await {
            match notice {
                ServiceNotice::Started => {
                    self.events.emit(BridgeEvent::OverlayStarted);
                }
                ServiceNotice::Stopped(reason) => {
                    debug!("Overlay stopped: {:?}", reason);
                    self.events.emit(BridgeEvent::OverlayStopped);
                }
                ServiceNotice::RouteSelected(intent) => self.deliver_route(intent),
            }
        }
    }

    /// Cancel any permission request before the overlay goes away.
    pub fn shutdown(&self) {
        self.gate.cancel();
        self.send(UiRequest::Shutdown);
    }

    fn send(&self, request: UiRequest) {
        if self.ui.send(request).is_err() {
            debug!("UI loop has exited; request dropped");
        }
    }
}
