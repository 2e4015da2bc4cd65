//! The long-lived context that owns the overlay while it is visible.
//!
//! Everything here runs on the thread that owns the compositor. Requests
//! from the async side arrive as [`UiRequest`]s; lifecycle news travels back
//! as [`ServiceNotice`]s.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::OverlayConfig;
use crate::gesture::TouchEvent;
use crate::menu::RouteIntent;
use crate::overlay::{OverlayError, OverlayManager};
use crate::permission::OverlayPermissions;
use crate::registry::{self, OVERLAY_KEY, OverlayControl, SharedOverlay};
use crate::store::{OverlayPrefs, PositionStore};
use crate::surface::{Compositor, SurfaceError};

/// Requests marshalled onto the compositor thread
#[derive(Debug)]
pub enum UiRequest {
    /// Replies whether the bubble is on screen afterwards
    Start(oneshot::Sender<bool>),
    Stop,
    UpdateCount(u32),
    Collapse,
    IsExpanded(oneshot::Sender<bool>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    SurfaceFailure,
}

/// Lifecycle news for the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceNotice {
    Started,
    Stopped(StopReason),
    RouteSelected(RouteIntent),
}

/// Something outside the overlay that mirrors its state (a tray icon)
pub trait StatusIndicator {
    fn set_count(&self, count: u32);
    fn shutdown(&self);
}

pub type StatusFactory = Box<dyn FnMut() -> Option<Box<dyn StatusIndicator>>>;

pub struct OverlayService<C: Compositor> {
    manager: OverlayManager<C>,
    permissions: Arc<dyn OverlayPermissions>,
    notices: mpsc::UnboundedSender<ServiceNotice>,
    status: Option<Box<dyn StatusIndicator>>,
    running: bool,
}

impl<C: Compositor> OverlayService<C> {
    pub fn new(
        manager: OverlayManager<C>,
        permissions: Arc<dyn OverlayPermissions>,
        notices: mpsc::UnboundedSender<ServiceNotice>,
        status: Option<Box<dyn StatusIndicator>>,
    ) -> Self {
        Self {
            manager,
            permissions,
            notices,
            status,
            running: false,
        }
    }

    pub fn manager(&self) -> &OverlayManager<C> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut OverlayManager<C> {
        &mut self.manager
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Put the bubble up from persisted state. A refusal tears everything down.
    pub fn start(&mut self, prefs: &OverlayPrefs) -> bool {
        if self.running {
            return true;
        }
        let counter = prefs.last_count.unwrap_or(0);
        let shown = if self.permissions.can_draw_overlays() {
            self.manager.create_bubble(prefs.bubble_position(), counter)
        } else {
            Err(OverlayError::from(SurfaceError::PermissionDenied))
        };
        match shown {
            Ok(()) => {
                self.running = true;
                if let Some(status) = &self.status {
                    status.set_count(counter);
                }
                info!("Overlay service started");
                self.notify(ServiceNotice::Started);
                true
            }
            Err(e) => {
                error!("Overlay could not be shown: {}", e);
                self.manager.teardown();
                if let Some(status) = self.status.take() {
                    status.shutdown();
                }
                self.notify(ServiceNotice::Stopped(StopReason::SurfaceFailure));
                false
            }
        }
    }

    fn shutdown(&mut self, reason: StopReason) {
        if !self.running {
            return;
        }
        self.running = false;
        self.manager.teardown();
        registry::unregister(OVERLAY_KEY);
        if let Some(status) = self.status.take() {
            status.shutdown();
        }
        info!("Overlay service stopped ({:?})", reason);
        self.notify(ServiceNotice::Stopped(reason));
    }

    /// A grant revoked while the bubble is up ends it like a refused update.
    fn permitted(&mut self) -> bool {
        if !self.running {
            return false;
        }
        if self.permissions.can_draw_overlays() {
            return true;
        }
        error!("Overlay permission was revoked");
        self.shutdown(StopReason::SurfaceFailure);
        false
    }

    /// Any surface failure ends the overlay; nothing is retried.
    fn guard<T>(&mut self, result: Result<T, OverlayError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Stopping overlay after surface failure: {}", e);
                self.shutdown(StopReason::SurfaceFailure);
                None
            }
        }
    }

    fn notify(&self, notice: ServiceNotice) {
        if self.notices.send(notice).is_err() {
            debug!("Bridge is gone; dropping service notice");
        }
    }
}

impl<C: Compositor> OverlayControl for OverlayService<C> {
    fn update_counter(&mut self, value: u32) {
        if !self.permitted() {
            return;
        }
        let result = self.manager.update_counter(value);
        if self.guard(result).is_some() {
            if let Some(status) = &self.status {
                status.set_count(value);
            }
        }
    }

    fn collapse(&mut self) {
        if self.permitted() {
            let result = self.manager.collapse();
            self.guard(result);
        }
    }

    fn is_expanded(&self) -> bool {
        self.running && self.manager.is_expanded()
    }

    fn stop(&mut self) {
        self.shutdown(StopReason::Requested);
    }

    fn handle_touch(&mut self, event: &TouchEvent) {
        if self.running {
            let result = self.manager.handle_touch(event);
            self.guard(result);
        }
    }

    fn select_menu_entry(&mut self, index: usize) {
        if !self.permitted() {
            return;
        }
        let result = self.manager.select_menu_entry(index);
        if let Some(Some(intent)) = self.guard(result) {
            self.notify(ServiceNotice::RouteSelected(intent));
        }
    }

    fn tap_scrim(&mut self) {
        if self.permitted() {
            let result = self.manager.tap_scrim();
            self.guard(result);
        }
    }

    fn tick(&mut self, now: Instant) -> bool {
        if !self.running {
            return false;
        }
        let result = self.manager.tick(now);
        self.guard(result).unwrap_or(false)
    }
}

impl<C: Compositor> Drop for OverlayService<C> {
    fn drop(&mut self) {
        self.manager.teardown();
    }
}

/// Routes [`UiRequest`]s to the live service, creating it on start.
pub struct UiDispatcher<C: Compositor + 'static> {
    make_compositor: Box<dyn FnMut() -> C>,
    permissions: Arc<dyn OverlayPermissions>,
    make_status: Option<StatusFactory>,
    config: OverlayConfig,
    store: PositionStore,
    notices: mpsc::UnboundedSender<ServiceNotice>,
    service: Option<Rc<RefCell<OverlayService<C>>>>,
}

impl<C: Compositor + 'static> UiDispatcher<C> {
    pub fn new(
        make_compositor: impl FnMut() -> C + 'static,
        permissions: Arc<dyn OverlayPermissions>,
        config: OverlayConfig,
        store: PositionStore,
        notices: mpsc::UnboundedSender<ServiceNotice>,
    ) -> Self {
        Self {
            make_compositor: Box::new(make_compositor),
            permissions,
            make_status: None,
            config,
            store,
            notices,
            service: None,
        }
    }

    pub fn with_status(mut self, make_status: StatusFactory) -> Self {
        self.make_status = Some(make_status);
        self
    }

    pub fn service(&self) -> Option<&Rc<RefCell<OverlayService<C>>>> {
        self.service.as_ref()
    }

    /// Handle one request. Returns `false` once the loop should exit.
    pub fn handle(&mut self, request: UiRequest) -> bool {
        self.forget_dead_service();
        debug!("UI request: {:?}", request);
        match request {
            UiRequest::Start(reply) => {
                let live = self.start();
                let _ = reply.send(live);
            }
            UiRequest::Stop => self.stop(),
            UiRequest::UpdateCount(value) => match registry::current(OVERLAY_KEY) {
                Some(overlay) => overlay.borrow_mut().update_counter(value),
                None => {
                    // No bubble: keep the value for the next start
                    if let Err(e) = self.store.save_count(value) {
                        warn!("Failed to store counter for later: {}", e);
                    }
                }
            },
            UiRequest::Collapse => {
                if let Some(overlay) = registry::current(OVERLAY_KEY) {
                    overlay.borrow_mut().collapse();
                }
            }
            UiRequest::IsExpanded(reply) => {
                let expanded = registry::current(OVERLAY_KEY)
                    .is_some_and(|overlay| overlay.borrow().is_expanded());
                let _ = reply.send(expanded);
            }
            UiRequest::Shutdown => {
                self.stop();
                return false;
            }
        }
        true
    }

    fn start(&mut self) -> bool {
        if self.service.is_some() {
            return true;
        }
        let compositor = (self.make_compositor)();
        let manager = OverlayManager::new(compositor, self.config.clone(), self.store.clone());
        let status = self.make_status.as_mut().and_then(|make| make());
        let mut service = OverlayService::new(
            manager,
            self.permissions.clone(),
            self.notices.clone(),
            status,
        );
        if !service.start(&self.store.prefs()) {
            return false;
        }

        let service = Rc::new(RefCell::new(service));
        let shared: SharedOverlay = service.clone();
        registry::register(OVERLAY_KEY, &shared);
        self.service = Some(service);
        true
    }

    fn stop(&mut self) {
        if let Some(service) = self.service.take() {
            service.borrow_mut().stop();
        }
        registry::unregister(OVERLAY_KEY);
    }

    fn forget_dead_service(&mut self) {
        let dead = self
            .service
            .as_ref()
            .is_some_and(|s| s.try_borrow().is_ok_and(|s| !s.is_running()));
        if dead {
            self.service = None;
        }
    }
}

/// Drain requests into `dispatcher` until shutdown or until every sender is gone.
pub async fn serve<C: Compositor + 'static>(
    mut dispatcher: UiDispatcher<C>,
    mut requests: mpsc::UnboundedReceiver<UiRequest>,
) {
    while let Some(request) = requests.recv().await {
        if !dispatcher.handle(request) {
            break;
        }
    }
    dispatcher.stop();
    debug!("UI request loop finished");
}
