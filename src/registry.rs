//! Process-wide lookup of the live overlay.
//!
//! Callers without a handle (bridge commands, platform input callbacks)
//! find the running overlay here. Entries are weak: the registry never
//! keeps an overlay alive, and a dropped overlay simply stops resolving.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::gesture::TouchEvent;

/// Key the running overlay service registers under
pub const OVERLAY_KEY: &str = "spark.overlay";

/// What the rest of the process may ask of a live overlay
pub trait OverlayControl {
    fn update_counter(&mut self, value: u32);
    fn collapse(&mut self);
    fn is_expanded(&self) -> bool;
    fn stop(&mut self);

    fn handle_touch(&mut self, event: &TouchEvent);
    fn select_menu_entry(&mut self, index: usize);
    fn tap_scrim(&mut self);

    /// Advance animations. Returns whether another frame is needed.
    fn tick(&mut self, now: Instant) -> bool;
}

pub type SharedOverlay = Rc<RefCell<dyn OverlayControl>>;

thread_local! {
    static ENTRIES: RefCell<HashMap<&'static str, Weak<RefCell<dyn OverlayControl>>>> =
        RefCell::new(HashMap::new());
}

/// Register `overlay` under `key`, replacing whatever was there.
pub fn register(key: &'static str, overlay: &SharedOverlay) {
    ENTRIES.with(|entries| {
        entries.borrow_mut().insert(key, Rc::downgrade(overlay));
    });
}

pub fn current(key: &str) -> Option<SharedOverlay> {
    ENTRIES.with(|entries| entries.borrow().get(key).and_then(Weak::upgrade))
}

pub fn unregister(key: &str) -> bool {
    ENTRIES.with(|entries| entries.borrow_mut().remove(key).is_some())
}
