//! Compositor-level surfaces and the seam to the platform that owns them.

use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::geometry::{Point, Screen, Size};

/// The three surfaces the overlay ever puts on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    Bubble,
    Menu,
    Scrim,
}

impl SurfaceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SurfaceKind::Bubble => "bubble",
            SurfaceKind::Menu => "menu",
            SurfaceKind::Scrim => "scrim",
        }
    }
}

/// Stacking band a surface is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceLayer {
    /// Above everything, used by the bubble and the menu
    Overlay,
    /// Directly beneath the overlay band, used by the scrim
    Top,
}

/// How one axis of a surface is sized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    Px(i32),
    WrapContent,
    MatchParent,
}

/// Window-manager hints for a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceFlags {
    /// Never take keyboard focus away from the app underneath
    pub not_focusable: bool,
    pub translucent: bool,
}

impl Default for SurfaceFlags {
    fn default() -> Self {
        Self {
            not_focusable: true,
            translucent: true,
        }
    }
}

/// Placement and appearance of an attached surface
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutParams {
    /// Top-left anchor
    pub origin: Point,
    pub width: Extent,
    pub height: Extent,
    pub layer: SurfaceLayer,
    pub flags: SurfaceFlags,
    pub alpha: f32,
    /// Visual vertical offset that does not move the anchor
    pub translation_y: i32,
}

impl LayoutParams {
    pub fn bubble(origin: Point, size: Size) -> Self {
        Self {
            origin,
            width: Extent::Px(size.width),
            height: Extent::Px(size.height),
            layer: SurfaceLayer::Overlay,
            flags: SurfaceFlags::default(),
            alpha: 1.0,
            translation_y: 0,
        }
    }

    pub fn menu(origin: Point, width: i32) -> Self {
        Self {
            origin,
            width: Extent::Px(width),
            height: Extent::WrapContent,
            layer: SurfaceLayer::Overlay,
            flags: SurfaceFlags::default(),
            alpha: 1.0,
            translation_y: 0,
        }
    }

    pub fn scrim() -> Self {
        Self {
            origin: Point::default(),
            width: Extent::MatchParent,
            height: Extent::MatchParent,
            layer: SurfaceLayer::Top,
            flags: SurfaceFlags::default(),
            alpha: 1.0,
            translation_y: 0,
        }
    }
}

/// Why the compositor refused a surface operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("overlay permission denied by the compositor")]
    PermissionDenied,
    #[error("{0} surface is not attached")]
    NotAttached(&'static str),
    #[error("invalid surface state: {0}")]
    InvalidState(String),
}

/// The platform side that owns the real windows.
///
/// Every call happens on the thread that owns the compositor connection.
/// Implementations report refusals as errors and never panic.
pub trait Compositor {
    fn screen(&self) -> Screen;

    fn attach(&mut self, kind: SurfaceKind, params: &LayoutParams) -> Result<(), SurfaceError>;

    fn update_layout(&mut self, kind: SurfaceKind, params: &LayoutParams)
    -> Result<(), SurfaceError>;

    fn detach(&mut self, kind: SurfaceKind) -> Result<(), SurfaceError>;

    fn is_attached(&self, kind: SurfaceKind) -> bool;

    /// Replace the text shown on the bubble.
    fn set_bubble_label(&mut self, text: &str) -> Result<(), SurfaceError>;

    /// Measured width of an attached surface, if the platform knows it yet.
    fn measured_width(&self, _kind: SurfaceKind) -> Option<i32> {
        None
    }

    /// An animation started; keep delivering ticks until it settles.
    fn schedule_frame(&mut self) {}
}

/// Bookkeeping for a surface the overlay created.
///
/// The handle keeps the layout so it can be re-applied and survives a
/// detach, which lets the next attach reuse the same parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceHandle {
    pub kind: SurfaceKind,
    pub params: LayoutParams,
    attached: bool,
}

impl SurfaceHandle {
    pub fn new(kind: SurfaceKind, params: LayoutParams) -> Self {
        Self {
            kind,
            params,
            attached: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Attach if not already attached. Attaching twice is a no-op.
    pub fn attach<C: Compositor + ?Sized>(&mut self, compositor: &mut C) -> Result<(), SurfaceError> {
        if self.attached && compositor.is_attached(self.kind) {
            return Ok(());
        }
        compositor.attach(self.kind, &self.params)?;
        self.attached = true;
        debug!("Attached {} surface at {:?}", self.kind.name(), self.params.origin);
        Ok(())
    }

    /// Push the current layout to the compositor when attached.
    pub fn apply<C: Compositor + ?Sized>(&self, compositor: &mut C) -> Result<(), SurfaceError> {
        if !self.attached {
            return Ok(());
        }
        compositor.update_layout(self.kind, &self.params)
    }

    /// Detach if attached. Detaching twice is a no-op.
    pub fn detach<C: Compositor + ?Sized>(&mut self, compositor: &mut C) -> Result<(), SurfaceError> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        if compositor.is_attached(self.kind) {
            compositor.detach(self.kind)?;
            debug!("Detached {} surface", self.kind.name());
        }
        Ok(())
    }
}

/// In-memory compositor.
///
/// Used by the headless daemon and by tests; it records every call so
/// surface churn can be asserted.
#[derive(Debug, Clone)]
pub struct MemoryCompositor {
    screen: Screen,
    attached: HashMap<SurfaceKind, LayoutParams>,
    label: String,
    pub calls: Vec<CompositorCall>,
    /// Surfaces whose next attach is refused
    pub deny_attach: Vec<SurfaceKind>,
    pub deny_updates: bool,
    pub frame_requests: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositorCall {
    Attach(SurfaceKind),
    Update(SurfaceKind, LayoutParams),
    Detach(SurfaceKind),
    Label(String),
}

impl MemoryCompositor {
    pub fn new(screen: Screen) -> Self {
        Self {
            screen,
            attached: HashMap::new(),
            label: String::new(),
            calls: Vec::new(),
            deny_attach: Vec::new(),
            deny_updates: false,
            frame_requests: 0,
        }
    }

    pub fn layout(&self, kind: SurfaceKind) -> Option<&LayoutParams> {
        self.attached.get(&kind)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn attach_count(&self, kind: SurfaceKind) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == CompositorCall::Attach(kind))
            .count()
    }

    pub fn detach_count(&self, kind: SurfaceKind) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == CompositorCall::Detach(kind))
            .count()
    }

    /// Forget the call log, keeping the attached surfaces.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl Compositor for MemoryCompositor {
    fn screen(&self) -> Screen {
        self.screen
    }

    fn attach(&mut self, kind: SurfaceKind, params: &LayoutParams) -> Result<(), SurfaceError> {
        if let Some(index) = self.deny_attach.iter().position(|k| *k == kind) {
            self.deny_attach.remove(index);
            return Err(SurfaceError::PermissionDenied);
        }
        if self.attached.contains_key(&kind) {
            return Err(SurfaceError::InvalidState(format!(
                "{} surface attached twice",
                kind.name()
            )));
        }
        self.attached.insert(kind, params.clone());
        self.calls.push(CompositorCall::Attach(kind));
        Ok(())
    }

    fn update_layout(
        &mut self,
        kind: SurfaceKind,
        params: &LayoutParams,
    ) -> Result<(), SurfaceError> {
        if self.deny_updates {
            return Err(SurfaceError::PermissionDenied);
        }
        let slot = self
            .attached
            .get_mut(&kind)
            .ok_or(SurfaceError::NotAttached(kind.name()))?;
        *slot = params.clone();
        self.calls.push(CompositorCall::Update(kind, params.clone()));
        Ok(())
    }

    fn detach(&mut self, kind: SurfaceKind) -> Result<(), SurfaceError> {
        self.attached
            .remove(&kind)
            .ok_or(SurfaceError::NotAttached(kind.name()))?;
        self.calls.push(CompositorCall::Detach(kind));
        Ok(())
    }

    fn is_attached(&self, kind: SurfaceKind) -> bool {
        self.attached.contains_key(&kind)
    }

    fn set_bubble_label(&mut self, text: &str) -> Result<(), SurfaceError> {
        if !self.attached.contains_key(&SurfaceKind::Bubble) {
            return Err(SurfaceError::NotAttached(SurfaceKind::Bubble.name()));
        }
        self.label = text.to_string();
        self.calls.push(CompositorCall::Label(text.to_string()));
        Ok(())
    }

    fn schedule_frame(&mut self) {
        self.frame_requests += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compositor() -> MemoryCompositor {
        MemoryCompositor::new(Screen::new(1080, 1920, 1.0))
    }

    #[test]
    fn handle_attach_is_idempotent() {
        let mut compositor = compositor();
        let mut handle = SurfaceHandle::new(SurfaceKind::Scrim, LayoutParams::scrim());
        handle.attach(&mut compositor).unwrap();
        handle.attach(&mut compositor).unwrap();
        assert!(handle.is_attached());
        assert_eq!(compositor.attach_count(SurfaceKind::Scrim), 1);
    }

    #[test]
    fn handle_detach_is_idempotent() {
        let mut compositor = compositor();
        let mut handle = SurfaceHandle::new(SurfaceKind::Scrim, LayoutParams::scrim());
        handle.attach(&mut compositor).unwrap();
        handle.detach(&mut compositor).unwrap();
        handle.detach(&mut compositor).unwrap();
        assert!(!compositor.is_attached(SurfaceKind::Scrim));
        assert_eq!(compositor.detach_count(SurfaceKind::Scrim), 1);
    }

    #[test]
    fn refused_attach_leaves_handle_detached() {
        let mut compositor = compositor();
        compositor.deny_attach.push(SurfaceKind::Bubble);
        let mut handle = SurfaceHandle::new(
            SurfaceKind::Bubble,
            LayoutParams::bubble(Point::new(8, 8), Size::square(56)),
        );
        assert_eq!(
            handle.attach(&mut compositor),
            Err(SurfaceError::PermissionDenied)
        );
        assert!(!handle.is_attached());
        handle.attach(&mut compositor).unwrap();
        assert!(handle.is_attached());
    }

    #[test]
    fn apply_on_detached_handle_does_nothing() {
        let mut compositor = compositor();
        let handle = SurfaceHandle::new(SurfaceKind::Menu, LayoutParams::menu(Point::new(8, 8), 220));
        handle.apply(&mut compositor).unwrap();
        assert!(compositor.calls.is_empty());
    }
}
