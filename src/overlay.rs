//! Bubble, menu and scrim surfaces and the expand/collapse state machine.
//!
//! The manager is the only code that mutates overlay surfaces. It is driven
//! from the compositor thread: touch samples, commands, and animation ticks.
//!
//! Menu phases only ever move `Collapsed -> Expanding -> Expanded ->
//! Collapsing -> Collapsed`. A toggle received mid-animation reverses the
//! running transition; it never restarts the same one.

use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::animation::{Animator, Easing, Property, Tween};
use crate::config::OverlayConfig;
use crate::geometry::{Point, Screen, Size};
use crate::gesture::{GestureAction, GestureInterpreter, TouchEvent};
use crate::menu::{MENU_ENTRIES, RouteIntent};
use crate::store::PositionStore;
use crate::surface::{Compositor, LayoutParams, SurfaceError, SurfaceHandle, SurfaceKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OverlayError {
    #[error("overlay surface failure: {0}")]
    Surface(#[from] SurfaceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuPhase {
    Collapsed,
    Expanding,
    Expanded,
    Collapsing,
}

/// Live state of the bubble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BubbleState {
    pub position: Point,
    pub counter: u32,
    pub expanded: bool,
}

/// Work to do when a specific animation instance finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    PersistPosition,
    MenuShown,
    MenuHidden,
    ScrimHidden,
}

pub struct OverlayManager<C: Compositor> {
    compositor: C,
    config: OverlayConfig,
    store: PositionStore,
    screen: Screen,
    state: BubbleState,
    phase: MenuPhase,
    bubble: Option<SurfaceHandle>,
    menu: Option<SurfaceHandle>,
    scrim: Option<SurfaceHandle>,
    animator: Animator<Settle>,
    gestures: GestureInterpreter,
}

impl<C: Compositor> OverlayManager<C> {
    pub fn new(compositor: C, config: OverlayConfig, store: PositionStore) -> Self {
        let screen = compositor.screen();
        let gestures = GestureInterpreter::new(
            screen.dp(config.drag_threshold_dp),
            config.drag_update_interval,
        );
        let state = BubbleState {
            position: config.default_position(&screen),
            counter: 0,
            expanded: false,
        };
        Self {
            compositor,
            config,
            store,
            screen,
            state,
            phase: MenuPhase::Collapsed,
            bubble: None,
            menu: None,
            scrim: None,
            animator: Animator::default(),
            gestures,
        }
    }

    pub fn state(&self) -> BubbleState {
        self.state
    }

    pub fn phase(&self) -> MenuPhase {
        self.phase
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self.phase, MenuPhase::Expanding | MenuPhase::Expanded)
    }

    pub fn is_bubble_attached(&self) -> bool {
        self.bubble.as_ref().is_some_and(SurfaceHandle::is_attached)
    }

    pub fn is_animating(&self) -> bool {
        !self.animator.is_idle()
    }

    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut C {
        &mut self.compositor
    }

    /// Put the bubble on screen. Does nothing if it is already attached.
    pub fn create_bubble(
        &mut self,
        initial_position: Option<Point>,
        initial_counter: u32,
    ) -> Result<(), OverlayError> {
        if self.is_bubble_attached() {
            return Ok(());
        }

        let requested = initial_position.unwrap_or_else(|| self.config.default_position(&self.screen));
        let position = self.clamp_bubble(requested);
        let size = self.config.bubble_size(&self.screen);
        let mut handle = SurfaceHandle::new(SurfaceKind::Bubble, LayoutParams::bubble(position, size));
        handle.attach(&mut self.compositor)?;
        self.bubble = Some(handle);
        self.state.position = position;
        self.state.counter = initial_counter;
        self.compositor.set_bubble_label(&initial_counter.to_string())?;
        info!("Bubble created at {:?} showing {}", position, initial_counter);
        Ok(())
    }

    pub fn toggle_expanded(&mut self) -> Result<(), OverlayError> {
        match self.phase {
            MenuPhase::Collapsed | MenuPhase::Collapsing => self.expand(),
            MenuPhase::Expanding | MenuPhase::Expanded => self.collapse(),
        }
    }

    /// Show the scrim and the menu. No-op while expanding or expanded.
    pub fn expand(&mut self) -> Result<(), OverlayError> {
        if self.is_expanded() {
            return Ok(());
        }
        let reversing = self.phase == MenuPhase::Collapsing;
        self.set_phase(MenuPhase::Expanding);

        // Scrim first so it lands beneath the menu
        let scrim = self
            .scrim
            .get_or_insert_with(|| SurfaceHandle::new(SurfaceKind::Scrim, LayoutParams::scrim()));
        if !scrim.is_attached() {
            scrim.params.alpha = 0.0;
            scrim.attach(&mut self.compositor)?;
        }
        let scrim_from = scrim.params.alpha;

        let anchor = self.menu_anchor();
        let menu_width = self.config.menu_size(&self.screen).width;
        let open_offset = self.screen.dp(self.config.menu_open_translation_dp) as f32;
        let menu = self.menu.get_or_insert_with(|| {
            SurfaceHandle::new(SurfaceKind::Menu, LayoutParams::menu(anchor, menu_width))
        });
        if !menu.is_attached() {
            menu.params.origin = anchor;
            menu.params.alpha = 0.0;
            menu.params.translation_y = open_offset as i32;
            menu.attach(&mut self.compositor)?;
        }
        let alpha_from = menu.params.alpha;
        let translation_from = menu.params.translation_y as f32;

        let duration = self.config.menu_open_duration;
        self.animator.start(
            Property::ScrimAlpha,
            Tween::new(scrim_from, 1.0, duration, Easing::Linear),
            None,
        );
        self.animator.start(
            Property::MenuAlpha,
            Tween::new(alpha_from, 1.0, duration, Easing::Linear),
            None,
        );
        self.animator.start(
            Property::MenuTranslation,
            Tween::new(translation_from, 0.0, duration, Easing::Decelerate),
            Some(Settle::MenuShown),
        );
        self.compositor.schedule_frame();
        debug!(reversing, "Menu expanding at {:?}", anchor);
        Ok(())
    }

    /// Fade out and detach the menu and scrim. No-op while collapsing or collapsed.
    pub fn collapse(&mut self) -> Result<(), OverlayError> {
        if !self.is_expanded() {
            return Ok(());
        }
        self.set_phase(MenuPhase::Collapsing);
        let duration = self.config.menu_close_duration;
        let close_offset = self.screen.dp(self.config.menu_close_translation_dp) as f32;

        match self.menu.as_ref().filter(|m| m.is_attached()) {
            Some(menu) => {
                let alpha_from = menu.params.alpha;
                let translation_from = menu.params.translation_y as f32;
                self.animator.start(
                    Property::MenuAlpha,
                    Tween::new(alpha_from, 0.0, duration, Easing::Linear),
                    None,
                );
                self.animator.start(
                    Property::MenuTranslation,
                    Tween::new(translation_from, close_offset, duration, Easing::Linear),
                    Some(Settle::MenuHidden),
                );
            }
            None => {
                self.animator.cancel(Property::MenuAlpha);
                self.animator.cancel(Property::MenuTranslation);
            }
        }

        match self.scrim.as_ref().filter(|s| s.is_attached()) {
            Some(scrim) => {
                let from = scrim.params.alpha;
                self.animator.start(
                    Property::ScrimAlpha,
                    Tween::new(from, 0.0, duration, Easing::Linear),
                    Some(Settle::ScrimHidden),
                );
            }
            None => {
                self.animator.cancel(Property::ScrimAlpha);
            }
        }

        if self.is_animating() {
            self.compositor.schedule_frame();
        }
        self.finish_collapse_if_done();
        Ok(())
    }

    /// Set the counter shown on the bubble and store it durably.
    pub fn update_counter(&mut self, value: u32) -> Result<(), OverlayError> {
        self.state.counter = value;
        if let Err(e) = self.store.save_count(value) {
            warn!("Failed to persist overlay counter: {}", e);
        }
        if self.is_bubble_attached() {
            self.compositor.set_bubble_label(&value.to_string())?;
        }
        Ok(())
    }

    /// Move the bubble, keeping it on screen. Not persisted.
    pub fn move_bubble_to(&mut self, x: i32, y: i32) -> Result<(), OverlayError> {
        let position = self.clamp_bubble(Point::new(x, y));
        self.state.position = position;
        if let Some(bubble) = self.bubble.as_mut() {
            bubble.params.origin = position;
            bubble.apply(&mut self.compositor)?;
        }
        Ok(())
    }

    /// Glide the bubble to the closer horizontal edge and persist where it lands.
    pub fn snap_to_nearest_edge(&mut self) {
        if !self.is_bubble_attached() {
            return;
        }
        let bubble_width = self.bubble_size().width;
        let margin = self.config.margin(&self.screen);
        let left = margin;
        let right = margin.max(self.screen.width - bubble_width - margin);
        let center = self.state.position.x + bubble_width / 2;
        let target = if center < self.screen.width / 2 { left } else { right };

        debug!("Snapping bubble from x={} to x={}", self.state.position.x, target);
        self.animator.start(
            Property::BubbleX,
            Tween::new(
                self.state.position.x as f32,
                target as f32,
                self.config.snap_duration,
                Easing::Decelerate,
            ),
            Some(Settle::PersistPosition),
        );
        self.compositor.schedule_frame();
    }

    /// Best-effort save of the current bubble position.
    pub fn persist_position(&self) {
        if let Err(e) = self.store.save_position(self.state.position) {
            warn!("Failed to persist bubble position: {}", e);
        }
    }

    /// Interpret one touch sample on the bubble.
    pub fn handle_touch(&mut self, event: &TouchEvent) -> Result<(), OverlayError> {
        let Some(action) = self.gestures.handle(event, self.state.position) else {
            return Ok(());
        };
        match action {
            GestureAction::Began => {
                if self.animator.cancel(Property::BubbleX) {
                    debug!("Touch interrupted bubble snap at x={}", self.state.position.x);
                }
            }
            GestureAction::MoveTo(target) => self.move_bubble_to(target.x, target.y)?,
            GestureAction::Tap => self.toggle_expanded()?,
            GestureAction::Release { to } => {
                self.move_bubble_to(to.x, to.y)?;
                self.snap_to_nearest_edge();
            }
            GestureAction::Cancelled { was_drag } => {
                if was_drag {
                    self.persist_position();
                }
            }
        }
        Ok(())
    }

    /// A quick action was picked: collapse and hand back where to go.
    pub fn select_menu_entry(&mut self, index: usize) -> Result<Option<RouteIntent>, OverlayError> {
        let Some(entry) = MENU_ENTRIES.get(index) else {
            warn!("Ignoring selection of unknown menu entry {}", index);
            return Ok(None);
        };
        let intent = RouteIntent::from(entry);
        info!("Menu entry {:?} selected", entry.label);
        self.collapse()?;
        Ok(Some(intent))
    }

    /// Tap outside the menu.
    pub fn tap_scrim(&mut self) -> Result<(), OverlayError> {
        self.collapse()
    }

    /// Advance animations. Returns whether another frame is needed.
    pub fn tick(&mut self, now: Instant) -> Result<bool, OverlayError> {
        if self.animator.is_idle() {
            return Ok(false);
        }
        let frame = self.animator.tick(now);

        let mut dirty: Vec<SurfaceKind> = Vec::new();
        for (property, value) in frame.values {
            let kind = match property {
                Property::BubbleX => {
                    let x = value.round() as i32;
                    self.state.position.x = x;
                    if let Some(bubble) = self.bubble.as_mut() {
                        bubble.params.origin.x = x;
                    }
                    SurfaceKind::Bubble
                }
                Property::MenuAlpha => {
                    if let Some(menu) = self.menu.as_mut() {
                        menu.params.alpha = value;
                    }
                    SurfaceKind::Menu
                }
                Property::MenuTranslation => {
                    if let Some(menu) = self.menu.as_mut() {
                        menu.params.translation_y = value.round() as i32;
                    }
                    SurfaceKind::Menu
                }
                Property::ScrimAlpha => {
                    if let Some(scrim) = self.scrim.as_mut() {
                        scrim.params.alpha = value;
                    }
                    SurfaceKind::Scrim
                }
            };
            if !dirty.contains(&kind) {
                dirty.push(kind);
            }
        }
        for kind in dirty {
            let handle = match kind {
                SurfaceKind::Bubble => self.bubble.as_ref(),
                SurfaceKind::Menu => self.menu.as_ref(),
                SurfaceKind::Scrim => self.scrim.as_ref(),
            };
            if let Some(handle) = handle {
                handle.apply(&mut self.compositor)?;
            }
        }

        for (_, settle) in frame.completed {
            self.settle(settle)?;
        }
        Ok(!self.animator.is_idle())
    }

    /// Remove every surface. Safe to call repeatedly and from any phase.
    pub fn teardown(&mut self) {
        self.animator.cancel_all();
        if self.phase != MenuPhase::Collapsed {
            self.set_phase(MenuPhase::Collapsed);
        }
        for slot in [&mut self.menu, &mut self.scrim, &mut self.bubble] {
            if let Some(mut handle) = slot.take() {
                if let Err(e) = handle.detach(&mut self.compositor) {
                    warn!("Failed to detach {} surface: {}", handle.kind.name(), e);
                }
            }
        }
    }

    fn settle(&mut self, settle: Settle) -> Result<(), OverlayError> {
        match settle {
            Settle::PersistPosition => self.persist_position(),
            Settle::MenuShown => {
                if self.phase == MenuPhase::Expanding {
                    self.set_phase(MenuPhase::Expanded);
                }
            }
            Settle::MenuHidden => {
                if let Some(menu) = self.menu.as_mut() {
                    menu.params.translation_y = 0;
                    menu.detach(&mut self.compositor)?;
                }
                self.finish_collapse_if_done();
            }
            Settle::ScrimHidden => {
                if let Some(scrim) = self.scrim.as_mut() {
                    scrim.detach(&mut self.compositor)?;
                }
                self.finish_collapse_if_done();
            }
        }
        Ok(())
    }

    fn finish_collapse_if_done(&mut self) {
        if self.phase != MenuPhase::Collapsing {
            return;
        }
        let menu_gone = !self.menu.as_ref().is_some_and(SurfaceHandle::is_attached);
        let scrim_gone = !self.scrim.as_ref().is_some_and(SurfaceHandle::is_attached);
        if menu_gone && scrim_gone {
            self.set_phase(MenuPhase::Collapsed);
        }
    }

    fn set_phase(&mut self, phase: MenuPhase) {
        debug!("Menu phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.state.expanded = self.is_expanded();
    }

    fn bubble_size(&self) -> Size {
        match self.compositor.measured_width(SurfaceKind::Bubble) {
            Some(width) if width > 0 => Size::square(width),
            _ => self.config.bubble_size(&self.screen),
        }
    }

    fn clamp_bubble(&self, point: Point) -> Point {
        self.screen
            .clamp(point, self.bubble_size(), self.config.margin(&self.screen))
    }

    fn menu_anchor(&self) -> Point {
        let min_top = self.screen.dp(self.config.menu_min_top_dp);
        let offset = self.screen.dp(self.config.menu_anchor_offset_dp);
        let anchor = Point::new(
            self.state.position.x,
            min_top.max(self.state.position.y - offset),
        );
        self.screen.clamp(
            anchor,
            self.config.menu_size(&self.screen),
            self.config.margin(&self.screen),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::TouchPhase;
    use crate::surface::{CompositorCall, MemoryCompositor};
    use std::time::Duration;

    const WIDTH: i32 = 1080;
    const HEIGHT: i32 = 1920;

    fn manager() -> (OverlayManager<MemoryCompositor>, PositionStore) {
        let store = PositionStore::in_memory();
        let compositor = MemoryCompositor::new(Screen::new(WIDTH, HEIGHT, 1.0));
        let manager = OverlayManager::new(compositor, OverlayConfig::default(), store.clone());
        (manager, store)
    }

    fn live_manager() -> (OverlayManager<MemoryCompositor>, PositionStore) {
        let (mut manager, store) = manager();
        manager.create_bubble(None, 0).unwrap();
        (manager, store)
    }

    /// Tick far enough for every running animation to finish.
    fn settle(manager: &mut OverlayManager<MemoryCompositor>) {
        let t0 = Instant::now();
        manager.tick(t0).unwrap();
        manager.tick(t0 + Duration::from_secs(1)).unwrap();
        assert!(!manager.is_animating());
    }

    fn touch(
        manager: &mut OverlayManager<MemoryCompositor>,
        phase: TouchPhase,
        x: f64,
        y: f64,
        at: Instant,
    ) {
        manager
            .handle_touch(&TouchEvent::new(phase, x, y, at))
            .unwrap();
    }

    #[test]
    fn bubble_starts_at_default_position_with_counter() {
        let (mut manager, _) = manager();
        manager.create_bubble(None, 4).unwrap();
        let layout = manager.compositor().layout(SurfaceKind::Bubble).unwrap();
        assert_eq!(layout.origin, Point::new(16, 120));
        assert_eq!(manager.compositor().label(), "4");
        assert_eq!(manager.state().counter, 4);
    }

    #[test]
    fn create_bubble_is_idempotent() {
        let (mut manager, _) = live_manager();
        manager.create_bubble(Some(Point::new(300, 300)), 9).unwrap();
        assert_eq!(manager.compositor().attach_count(SurfaceKind::Bubble), 1);
        assert_eq!(manager.state().position, Point::new(16, 120));
    }

    #[test]
    fn persisted_position_is_clamped_on_create() {
        let (mut manager, _) = manager();
        manager.create_bubble(Some(Point::new(-40, 99_999)), 0).unwrap();
        assert_eq!(manager.state().position, Point::new(8, HEIGHT - 56 - 8));
    }

    #[test]
    fn refused_bubble_attach_is_reported() {
        let (mut manager, _) = manager();
        manager.compositor_mut().deny_attach.push(SurfaceKind::Bubble);
        assert_eq!(
            manager.create_bubble(None, 0),
            Err(OverlayError::Surface(SurfaceError::PermissionDenied))
        );
        assert!(!manager.is_bubble_attached());
    }

    #[test]
    fn move_clamps_and_does_not_persist() {
        let (mut manager, store) = live_manager();
        for (x, y) in [(-100, -100), (500, 700), (5000, 5000), (1030, 10)] {
            manager.move_bubble_to(x, y).unwrap();
            let p = manager.state().position;
            assert!((8..=WIDTH - 56 - 8).contains(&p.x), "{p:?}");
            assert!((8..=HEIGHT - 56 - 8).contains(&p.y), "{p:?}");
            assert_eq!(manager.compositor().layout(SurfaceKind::Bubble).unwrap().origin, p);
        }
        assert_eq!(store.bubble_position(), None);
    }

    #[test]
    fn tap_expands_with_scrim_and_menu() {
        let (mut manager, _) = live_manager();
        let t0 = Instant::now();
        touch(&mut manager, TouchPhase::Down, 40.0, 150.0, t0);
        touch(&mut manager, TouchPhase::Up, 42.0, 151.0, t0);

        assert!(manager.is_expanded());
        assert_eq!(manager.phase(), MenuPhase::Expanding);
        assert!(manager.compositor().is_attached(SurfaceKind::Scrim));
        assert!(manager.compositor().is_attached(SurfaceKind::Menu));
        let menu = manager.compositor().layout(SurfaceKind::Menu).unwrap();
        assert_eq!(menu.alpha, 0.0);
        assert_eq!(menu.translation_y, 16);
        assert_eq!(manager.compositor().frame_requests, 1);

        settle(&mut manager);
        assert_eq!(manager.phase(), MenuPhase::Expanded);
        let menu = manager.compositor().layout(SurfaceKind::Menu).unwrap();
        assert_eq!(menu.alpha, 1.0);
        assert_eq!(menu.translation_y, 0);
        assert_eq!(manager.compositor().layout(SurfaceKind::Scrim).unwrap().alpha, 1.0);
    }

    #[test]
    fn second_expand_changes_nothing() {
        let (mut manager, _) = live_manager();
        manager.expand().unwrap();
        settle(&mut manager);
        manager.compositor_mut().clear_calls();

        manager.expand().unwrap();
        assert!(!manager.is_animating());
        assert!(manager.compositor().calls.is_empty());
        assert_eq!(manager.phase(), MenuPhase::Expanded);
    }

    #[test]
    fn collapse_when_collapsed_is_silent() {
        let (mut manager, _) = live_manager();
        manager.compositor_mut().clear_calls();
        manager.collapse().unwrap();
        manager.tap_scrim().unwrap();
        assert!(!manager.is_animating());
        assert!(manager.compositor().calls.is_empty());
        assert_eq!(manager.phase(), MenuPhase::Collapsed);
    }

    #[test]
    fn scrim_tap_detaches_menu_and_scrim() {
        let (mut manager, _) = live_manager();
        manager.toggle_expanded().unwrap();
        settle(&mut manager);

        manager.tap_scrim().unwrap();
        assert_eq!(manager.phase(), MenuPhase::Collapsing);
        assert!(!manager.is_expanded());
        settle(&mut manager);

        assert_eq!(manager.phase(), MenuPhase::Collapsed);
        assert!(!manager.compositor().is_attached(SurfaceKind::Menu));
        assert!(!manager.compositor().is_attached(SurfaceKind::Scrim));
        assert!(manager.compositor().is_attached(SurfaceKind::Bubble));
    }

    #[test]
    fn toggle_mid_animation_reverses() {
        let (mut manager, _) = live_manager();
        let t0 = Instant::now();
        manager.toggle_expanded().unwrap();
        manager.tick(t0).unwrap();
        manager.tick(t0 + Duration::from_millis(80)).unwrap();

        // reverse while expanding
        manager.toggle_expanded().unwrap();
        assert_eq!(manager.phase(), MenuPhase::Collapsing);

        // reverse again while collapsing: menu is reused, not re-attached
        manager.toggle_expanded().unwrap();
        assert_eq!(manager.phase(), MenuPhase::Expanding);
        settle(&mut manager);
        assert_eq!(manager.phase(), MenuPhase::Expanded);
        assert_eq!(manager.compositor().attach_count(SurfaceKind::Menu), 1);
        assert_eq!(manager.compositor().attach_count(SurfaceKind::Scrim), 1);
        assert_eq!(manager.compositor().detach_count(SurfaceKind::Menu), 0);
    }

    #[test]
    fn menu_anchor_is_clamped() {
        let (mut manager, _) = live_manager();
        manager.move_bubble_to(5000, 5000).unwrap();
        manager.expand().unwrap();
        let menu = manager.compositor().layout(SurfaceKind::Menu).unwrap();
        assert_eq!(menu.origin, Point::new(WIDTH - 220 - 8, HEIGHT - 320 - 8));

        manager.teardown();
        manager.create_bubble(Some(Point::new(100, 100)), 0).unwrap();
        manager.expand().unwrap();
        let menu = manager.compositor().layout(SurfaceKind::Menu).unwrap();
        assert_eq!(menu.origin, Point::new(100, 16));
    }

    #[test]
    fn drag_release_snaps_to_left_edge_and_persists() {
        let (mut manager, store) = live_manager();
        let t0 = Instant::now();
        touch(&mut manager, TouchPhase::Down, 40.0, 150.0, t0);
        touch(&mut manager, TouchPhase::Move, 140.0, 150.0, t0 + Duration::from_millis(20));
        assert_eq!(manager.state().position, Point::new(116, 120));
        touch(&mut manager, TouchPhase::Up, 140.0, 150.0, t0 + Duration::from_millis(40));

        assert!(!manager.is_expanded());
        assert!(manager.is_animating());
        settle(&mut manager);
        assert_eq!(manager.state().position, Point::new(8, 120));
        assert_eq!(store.bubble_position(), Some(Point::new(8, 120)));
        assert!(!manager.compositor().is_attached(SurfaceKind::Menu));
    }

    #[test]
    fn drag_past_middle_snaps_to_right_edge() {
        let (mut manager, store) = live_manager();
        let t0 = Instant::now();
        touch(&mut manager, TouchPhase::Down, 40.0, 150.0, t0);
        touch(&mut manager, TouchPhase::Up, 640.0, 150.0, t0);
        settle(&mut manager);
        let right = WIDTH - 56 - 8;
        assert_eq!(manager.state().position.x, right);
        assert_eq!(store.bubble_position(), Some(Point::new(right, 120)));
    }

    #[test]
    fn touch_down_interrupts_snap() {
        let (mut manager, store) = live_manager();
        let t0 = Instant::now();
        manager.move_bubble_to(400, 500).unwrap();
        manager.snap_to_nearest_edge();
        manager.tick(t0).unwrap();
        manager.tick(t0 + Duration::from_millis(30)).unwrap();
        let mid_x = manager.state().position.x;
        assert!(mid_x < 400 && mid_x > 8, "{mid_x}");

        touch(&mut manager, TouchPhase::Down, 10.0, 10.0, t0 + Duration::from_millis(31));
        assert!(!manager.is_animating());
        assert_eq!(manager.state().position.x, mid_x);
        assert_eq!(store.bubble_position(), None);
    }

    #[test]
    fn cancel_persists_only_after_a_drag() {
        let (mut manager, store) = live_manager();
        let t0 = Instant::now();
        touch(&mut manager, TouchPhase::Down, 40.0, 150.0, t0);
        touch(&mut manager, TouchPhase::Cancel, 40.0, 150.0, t0);
        assert_eq!(store.bubble_position(), None);

        touch(&mut manager, TouchPhase::Down, 40.0, 150.0, t0);
        touch(&mut manager, TouchPhase::Move, 40.0, 450.0, t0);
        touch(&mut manager, TouchPhase::Cancel, 40.0, 450.0, t0);
        assert_eq!(store.bubble_position(), Some(Point::new(16, 420)));
        assert!(!manager.is_animating());
    }

    #[test]
    fn counter_update_relabels_and_persists() {
        let (mut manager, store) = live_manager();
        manager.update_counter(7).unwrap();
        assert_eq!(manager.compositor().label(), "7");
        assert_eq!(store.last_count(), 7);
        assert_eq!(manager.state().counter, 7);
    }

    #[test]
    fn selecting_an_entry_collapses_and_returns_intent() {
        let (mut manager, _) = live_manager();
        manager.expand().unwrap();
        settle(&mut manager);

        let intent = manager.select_menu_entry(5).unwrap().unwrap();
        assert_eq!(intent, RouteIntent::new("Tasks", true).unwrap());
        assert_eq!(manager.phase(), MenuPhase::Collapsing);
        assert_eq!(manager.select_menu_entry(42).unwrap(), None);
    }

    #[test]
    fn teardown_is_safe_from_any_phase_and_repeatable() {
        let (mut manager, _) = live_manager();
        manager.expand().unwrap();
        manager.tick(Instant::now()).unwrap();

        manager.teardown();
        manager.teardown();
        for kind in [SurfaceKind::Bubble, SurfaceKind::Menu, SurfaceKind::Scrim] {
            assert!(!manager.compositor().is_attached(kind));
            assert_eq!(manager.compositor().detach_count(kind), 1);
        }
        assert_eq!(manager.phase(), MenuPhase::Collapsed);
        assert!(!manager.is_animating());
        assert_eq!(manager.tick(Instant::now()), Ok(false));
    }

    #[test]
    fn failing_layout_update_surfaces_as_error() {
        let (mut manager, _) = live_manager();
        manager.compositor_mut().deny_updates = true;
        assert!(manager.move_bubble_to(100, 100).is_err());
        assert!(!manager
            .compositor()
            .calls
            .iter()
            .any(|c| matches!(c, CompositorCall::Update(..))));
    }
}
