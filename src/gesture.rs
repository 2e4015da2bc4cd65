//! Touch interpretation for the bubble.
//!
//! A touch sequence (down, moves, up or cancel) is classified as a tap or a
//! drag. Once any point of the sequence is further than the drag threshold
//! from where the finger landed, the sequence is a drag for good.

use std::time::{Duration, Instant};

use crate::geometry::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Down,
    Move,
    Up,
    Cancel,
}

/// One touch sample in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    pub phase: TouchPhase,
    pub raw_x: f64,
    pub raw_y: f64,
    pub at: Instant,
}

impl TouchEvent {
    pub fn new(phase: TouchPhase, raw_x: f64, raw_y: f64, at: Instant) -> Self {
        Self {
            phase,
            raw_x,
            raw_y,
            at,
        }
    }
}

/// State of a single down-to-up sequence
#[derive(Debug, Clone, PartialEq)]
pub struct GestureSession {
    pub start_position: Point,
    pub start_touch: (f64, f64),
    pub last_update: Option<Instant>,
    pub moved: bool,
}

impl GestureSession {
    fn delta(&self, event: &TouchEvent) -> (f64, f64) {
        (event.raw_x - self.start_touch.0, event.raw_y - self.start_touch.1)
    }

    fn target(&self, event: &TouchEvent) -> Point {
        let (dx, dy) = self.delta(event);
        self.start_position.offset(dx as i32, dy as i32)
    }
}

/// What the overlay should do in response to a touch sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureAction {
    /// A new sequence started; anything still moving the bubble must stop
    Began,
    /// Follow the finger
    MoveTo(Point),
    /// Finger lifted without dragging
    Tap,
    /// Finger lifted after a drag at this bubble position
    Release { to: Point },
    /// Sequence aborted by the system
    Cancelled { was_drag: bool },
}

#[derive(Debug)]
pub struct GestureInterpreter {
    drag_threshold: f64,
    update_interval: Duration,
    session: Option<GestureSession>,
}

impl GestureInterpreter {
    pub fn new(drag_threshold_px: i32, update_interval: Duration) -> Self {
        Self {
            drag_threshold: f64::from(drag_threshold_px),
            update_interval,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&GestureSession> {
        self.session.as_ref()
    }

    pub fn is_dragging(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.moved)
    }

    /// Feed one touch sample. `bubble_origin` is where the bubble currently is.
    pub fn handle(&mut self, event: &TouchEvent, bubble_origin: Point) -> Option<GestureAction> {
        match event.phase {
            TouchPhase::Down => {
                self.session = Some(GestureSession {
                    start_position: bubble_origin,
                    start_touch: (event.raw_x, event.raw_y),
                    last_update: None,
                    moved: false,
                });
                Some(GestureAction::Began)
            }
            TouchPhase::Move => {
                let threshold = self.drag_threshold;
                let interval = self.update_interval;
                let session = self.session.as_mut()?;
                mark_moved(session, event, threshold);

                if let Some(last) = session.last_update {
                    if event.at.saturating_duration_since(last) < interval {
                        return None;
                    }
                }
                session.last_update = Some(event.at);
                Some(GestureAction::MoveTo(session.target(event)))
            }
            TouchPhase::Up => {
                let mut session = self.session.take()?;
                mark_moved(&mut session, event, self.drag_threshold);
                if session.moved {
                    Some(GestureAction::Release {
                        to: session.target(event),
                    })
                } else {
                    Some(GestureAction::Tap)
                }
            }
            TouchPhase::Cancel => {
                let session = self.session.take()?;
                Some(GestureAction::Cancelled {
                    was_drag: session.moved,
                })
            }
        }
    }
}

fn mark_moved(session: &mut GestureSession, event: &TouchEvent, threshold: f64) {
    if session.moved {
        return;
    }
    let (dx, dy) = session.delta(event);
    if dx.abs() > threshold || dy.abs() > threshold {
        session.moved = true;
    }
}
