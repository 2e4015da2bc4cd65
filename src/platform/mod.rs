//! Compositor backends and the loops that drive them.

#[cfg(feature = "layer-shell")]
pub mod layer_shell;

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::geometry::Screen;
use crate::registry::{self, OVERLAY_KEY};
use crate::service::{UiDispatcher, UiRequest};
use crate::surface::{Compositor, LayoutParams, MemoryCompositor, SurfaceError, SurfaceKind};

/// Frame cadence while animations run
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Tick the live overlay once. Returns whether it wants another frame.
pub fn tick_overlay(now: Instant) -> bool {
    let Some(overlay) = registry::current(OVERLAY_KEY) else {
        return false;
    };
    // Busy means we are inside one of its own callbacks; try again next frame
    match overlay.try_borrow_mut() {
        Ok(mut overlay) => overlay.tick(now),
        Err(_) => true,
    }
}

/// Surfaces that exist only in memory; every mutation is logged.
#[derive(Debug, Clone)]
pub struct HeadlessCompositor {
    inner: MemoryCompositor,
}

impl HeadlessCompositor {
    pub fn new(screen: Screen) -> Self {
        Self {
            inner: MemoryCompositor::new(screen),
        }
    }
}

impl Compositor for HeadlessCompositor {
    fn screen(&self) -> Screen {
        self.inner.screen()
    }

    fn attach(&mut self, kind: SurfaceKind, params: &LayoutParams) -> Result<(), SurfaceError> {
        self.inner.attach(kind, params)?;
        self.inner.clear_calls();
        info!("[headless] attach {} at {:?} alpha={:.2}", kind.name(), params.origin, params.alpha);
        Ok(())
    }

    fn update_layout(&mut self, kind: SurfaceKind, params: &LayoutParams) -> Result<(), SurfaceError> {
        self.inner.update_layout(kind, params)?;
        self.inner.clear_calls();
        debug!(
            "[headless] {} at {:?} alpha={:.2} dy={}",
            kind.name(),
            params.origin,
            params.alpha,
            params.translation_y
        );
        Ok(())
    }

    fn detach(&mut self, kind: SurfaceKind) -> Result<(), SurfaceError> {
        self.inner.detach(kind)?;
        self.inner.clear_calls();
        info!("[headless] detach {}", kind.name());
        Ok(())
    }

    fn is_attached(&self, kind: SurfaceKind) -> bool {
        self.inner.is_attached(kind)
    }

    fn set_bubble_label(&mut self, text: &str) -> Result<(), SurfaceError> {
        self.inner.set_bubble_label(text)?;
        self.inner.clear_calls();
        info!("[headless] bubble label {:?}", text);
        Ok(())
    }
}

/// Drive the dispatcher without a display. Frames tick only while an
/// animation runs.
pub async fn run_headless(
    mut dispatcher: UiDispatcher<HeadlessCompositor>,
    mut requests: mpsc::UnboundedReceiver<UiRequest>,
) {
    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut animating = false;

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else { break };
                if !dispatcher.handle(request) {
                    return;
                }
                animating = tick_overlay(Instant::now());
            }
            _ = frames.tick(), if animating => {
                animating = tick_overlay(Instant::now());
            }
        }
    }
    dispatcher.handle(UiRequest::Shutdown);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlayConfig;
    use crate::permission::{OverlayPermissions, SettingsReturn};
    use crate::store::PositionStore;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    struct Granted;

    impl OverlayPermissions for Granted {
        fn can_draw_overlays(&self) -> bool {
            true
        }
        fn has_foreground_host(&self) -> bool {
            false
        }
        fn launch_settings(&self, _on_return: SettingsReturn) -> Result<(), String> {
            Err("headless".into())
        }
    }

    #[tokio::test]
    async fn headless_loop_serves_requests_until_shutdown() {
        let store = PositionStore::in_memory();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let screen = Screen::new(800, 600, 1.0);
        let dispatcher = UiDispatcher::new(
            move || HeadlessCompositor::new(screen),
            Arc::new(Granted),
            OverlayConfig::default(),
            store.clone(),
            notice_tx,
        );

        LocalSet::new()
            .run_until(async move {
                let pump = tokio::task::spawn_local(run_headless(dispatcher, ui_rx));

                let (tx, rx) = oneshot::channel();
                ui_tx.send(UiRequest::Start(tx)).unwrap();
                assert!(rx.await.unwrap());
                ui_tx.send(UiRequest::UpdateCount(5)).unwrap();
                ui_tx.send(UiRequest::Shutdown).unwrap();
                pump.await.unwrap();

                assert_eq!(store.last_count(), 5);
                assert!(registry::current(OVERLAY_KEY).is_none());
            })
            .await;

        let mut seen = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            seen.push(notice);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn headless_compositor_does_not_accumulate_history() {
        let mut compositor = HeadlessCompositor::new(Screen::new(800, 600, 1.0));
        compositor.attach(SurfaceKind::Scrim, &LayoutParams::scrim()).unwrap();
        for _ in 0..10 {
            compositor
                .update_layout(SurfaceKind::Scrim, &LayoutParams::scrim())
                .unwrap();
        }
        assert!(compositor.inner.calls.is_empty());
        assert!(compositor.is_attached(SurfaceKind::Scrim));
    }
}
