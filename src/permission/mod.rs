//! Overlay permission negotiation.
//!
//! A request launches the platform consent flow and then waits for one of
//! two racing signals: the flow handing control back, or the timeout. The
//! outstanding request owns a oneshot reply; whichever signal takes it out
//! first resolves the caller, and the loser finds nothing to resolve.

pub mod desktop;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{BridgeEvent, EventEmitter};

pub const OVERLAY_PERMISSION_REQUEST_CODE: u32 = 4242;
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(20);

/// Links a consent flow to the request that launched it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken {
    pub request_code: u32,
    pub serial: u64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Overlay permission request already in progress")]
    RequestInProgress,
    #[error("No foreground session is available to request overlay permission")]
    NoHostAvailable,
    #[error("Failed to launch overlay permission prompt: {0}")]
    RequestFailed(String),
    #[error("Overlay permission request timed out")]
    Timeout,
    #[error("Overlay permission request cancelled")]
    Cancelled,
}

impl PermissionError {
    /// Stable code reported to the host
    pub fn code(&self) -> &'static str {
        match self {
            PermissionError::RequestInProgress => "E_OVERLAY_REQUEST_IN_PROGRESS",
            PermissionError::NoHostAvailable => "E_ACTIVITY_UNAVAILABLE",
            PermissionError::RequestFailed(_) => "E_OVERLAY_PERMISSION_REQUEST_FAILED",
            PermissionError::Timeout => "E_OVERLAY_PERMISSION_TIMEOUT",
            PermissionError::Cancelled => "E_OVERLAY_REQUEST_CANCELLED",
        }
    }
}

/// Platform permission surface
pub trait OverlayPermissions: Send + Sync {
    /// Current grant state. Must not block or have side effects.
    fn can_draw_overlays(&self) -> bool;

    /// Whether something is on screen that can host the consent prompt.
    fn has_foreground_host(&self) -> bool;

    /// Show the consent flow. Once the user is done with it, the
    /// implementation calls [`SettingsReturn::deliver`].
    fn launch_settings(&self, on_return: SettingsReturn) -> Result<(), String>;

    /// Withdraw the consent flow for a request that was resolved without it.
    /// An answer given afterwards must not change the grant.
    fn dismiss(&self, _token: CorrelationToken) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Requested(CorrelationToken),
}

/// Handed to the platform so the consent flow can report back.
///
/// It holds the gate weakly: a flow that returns after the daemon is gone
/// does nothing.
#[derive(Debug)]
pub struct SettingsReturn {
    gate: Weak<GateShared>,
    token: CorrelationToken,
}

impl SettingsReturn {
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Returns whether this resolved the outstanding request.
    pub fn deliver(self) -> bool {
        match self.gate.upgrade() {
            Some(shared) => PermissionGate { shared }.on_settings_result(self.token),
            None => false,
        }
    }
}

struct Outstanding {
    token: CorrelationToken,
    issued_at: Instant,
    reply: oneshot::Sender<Result<bool, PermissionError>>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct GateInner {
    next_serial: u64,
    outstanding: Option<Outstanding>,
}

struct GateShared {
    os: Arc<dyn OverlayPermissions>,
    events: EventEmitter,
    timeout: Duration,
    inner: Mutex<GateInner>,
}

impl std::fmt::Debug for GateShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateShared")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Single-flight permission requests with a timeout
#[derive(Debug, Clone)]
pub struct PermissionGate {
    shared: Arc<GateShared>,
}

impl PermissionGate {
    pub fn new(os: Arc<dyn OverlayPermissions>, events: EventEmitter, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(GateShared {
                os,
                events,
                timeout,
                inner: Mutex::new(GateInner::default()),
            }),
        }
    }

    pub fn can_draw_overlays(&self) -> bool {
        self.shared.os.can_draw_overlays()
    }

    pub fn state(&self) -> GateState {
        match &self.lock().outstanding {
            Some(outstanding) => GateState::Requested(outstanding.token),
            None => GateState::Idle,
        }
    }

    /// Ask for the overlay grant.
    ///
    /// Resolves `true` at once when already granted. Otherwise launches the
    /// consent flow and resolves with the grant state read after the flow
    /// returns, or fails with [`PermissionError::Timeout`].
    pub async fn request_permission(&self) -> Result<bool, PermissionError> {
        let shared = &self.shared;
        if shared.os.can_draw_overlays() {
            shared.events.emit(BridgeEvent::PermissionResult { granted: true });
            return Ok(true);
        }

        let (token, reply) = {
            let mut inner = self.lock();
            if inner.outstanding.is_some() {
                drop(inner);
                shared.events.emit(BridgeEvent::PermissionError);
                return Err(PermissionError::RequestInProgress);
            }
            if !shared.os.has_foreground_host() {
                drop(inner);
                shared.events.emit(BridgeEvent::PermissionError);
                return Err(PermissionError::NoHostAvailable);
            }

            inner.next_serial += 1;
            let token = CorrelationToken {
                request_code: OVERLAY_PERMISSION_REQUEST_CODE,
                serial: inner.next_serial,
            };
            let (tx, rx) = oneshot::channel();
            let timer = self.spawn_timer(token);
            inner.outstanding = Some(Outstanding {
                token,
                issued_at: Instant::now(),
                reply: tx,
                timer,
            });
            (token, rx)
        };

        info!("Requesting overlay permission (serial {})", token.serial);
        shared.events.emit(BridgeEvent::PermissionRequested);

        let on_return = SettingsReturn {
            gate: Arc::downgrade(shared),
            token,
        };
        if let Err(reason) = shared.os.launch_settings(on_return) {
            warn!("Overlay permission prompt failed to launch: {}", reason);
            if let Some(outstanding) = self.take_outstanding(token) {
                outstanding.timer.abort();
            }
            shared.events.emit(BridgeEvent::PermissionError);
            return Err(PermissionError::RequestFailed(reason));
        }

        reply.await.unwrap_or(Err(PermissionError::Cancelled))
    }

    /// The consent flow handed control back. Late or foreign tokens are ignored.
    pub fn on_settings_result(&self, token: CorrelationToken) -> bool {
        if token.request_code != OVERLAY_PERMISSION_REQUEST_CODE {
            return false;
        }
        let Some(outstanding) = self.take_outstanding(token) else {
            debug!("Ignoring consent result for stale serial {}", token.serial);
            return false;
        };
        outstanding.timer.abort();

        let granted = self.shared.os.can_draw_overlays();
        info!(
            "Overlay permission flow returned after {:?}: granted={}",
            outstanding.issued_at.elapsed(),
            granted
        );
        self.shared
            .events
            .emit(BridgeEvent::PermissionResult { granted });
        let _ = outstanding.reply.send(Ok(granted));
        true
    }

    fn on_timeout(&self, token: CorrelationToken) -> bool {
        let Some(outstanding) = self.take_outstanding(token) else {
            return false;
        };
        warn!("Overlay permission request {} timed out", token.serial);
        self.shared.os.dismiss(token);
        self.shared.events.emit(BridgeEvent::PermissionTimeout);
        let _ = outstanding.reply.send(Err(PermissionError::Timeout));
        true
    }

    /// Resolve any outstanding request as cancelled and stop its timer.
    pub fn cancel(&self) -> bool {
        let Some(outstanding) = self.lock().outstanding.take() else {
            return false;
        };
        outstanding.timer.abort();
        self.shared.os.dismiss(outstanding.token);
        info!("Cancelled overlay permission request {}", outstanding.token.serial);
        let _ = outstanding.reply.send(Err(PermissionError::Cancelled));
        true
    }

    fn spawn_timer(&self, token: CorrelationToken) -> JoinHandle<()> {
        let gate = Arc::downgrade(&self.shared);
        let timeout = self.shared.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = gate.upgrade() {
                PermissionGate { shared }.on_timeout(token);
            }
        })
    }

    fn take_outstanding(&self, token: CorrelationToken) -> Option<Outstanding> {
        let mut inner = self.lock();
        if inner.outstanding.as_ref().is_some_and(|o| o.token == token) {
            inner.outstanding.take()
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
