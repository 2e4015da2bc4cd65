//! Frame-driven property animations.
//!
//! Each animation is an explicit instance with its own id. A completion
//! action travels with the instance, so cancelling or replacing an
//! animation also drops its completion; a finished animation can never
//! act on state that a newer animation has taken over.

use std::time::{Duration, Instant};

pub type AnimationId = u64;

/// Animated properties of the overlay surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    BubbleX,
    MenuAlpha,
    MenuTranslation,
    ScrimAlpha,
}

/// Timing curves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    Linear,
    /// Fast start, slow finish: `1 - (1 - t)^2`
    Decelerate,
}

impl Easing {
    pub fn apply(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::Decelerate => 1.0 - (1.0 - t) * (1.0 - t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tween {
    pub from: f32,
    pub to: f32,
    pub duration: Duration,
    pub easing: Easing,
}

impl Tween {
    pub fn new(from: f32, to: f32, duration: Duration, easing: Easing) -> Self {
        Self {
            from,
            to,
            duration,
            easing,
        }
    }

    pub fn value_at(&self, elapsed: Duration) -> f32 {
        if self.duration.is_zero() {
            return self.to;
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * self.easing.apply(t)
    }
}

#[derive(Debug)]
struct Running<A> {
    id: AnimationId,
    property: Property,
    tween: Tween,
    /// Set by the first tick so that starting an animation needs no clock
    started_at: Option<Instant>,
    value: f32,
    on_complete: Option<A>,
}

/// Values produced by one tick
#[derive(Debug, PartialEq)]
pub struct Frame<A> {
    pub values: Vec<(Property, f32)>,
    pub completed: Vec<(AnimationId, A)>,
}

impl<A> Default for Frame<A> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            completed: Vec::new(),
        }
    }
}

/// Set of running animations, at most one per property
#[derive(Debug)]
pub struct Animator<A> {
    next_id: AnimationId,
    running: Vec<Running<A>>,
}

impl<A> Default for Animator<A> {
    fn default() -> Self {
        Self {
            next_id: 1,
            running: Vec::new(),
        }
    }
}

impl<A> Animator<A> {
    /// Start animating `property`, replacing (and silencing) any animation
    /// already running on it.
    pub fn start(&mut self, property: Property, tween: Tween, on_complete: Option<A>) -> AnimationId {
        self.cancel(property);
        let id = self.next_id;
        self.next_id += 1;
        self.running.push(Running {
            id,
            property,
            tween,
            started_at: None,
            value: tween.from,
            on_complete,
        });
        id
    }

    /// Drop the animation on `property` without running its completion.
    pub fn cancel(&mut self, property: Property) -> bool {
        let before = self.running.len();
        self.running.retain(|r| r.property != property);
        before != self.running.len()
    }

    pub fn cancel_all(&mut self) {
        self.running.clear();
    }

    pub fn is_running(&self, property: Property) -> bool {
        self.running.iter().any(|r| r.property == property)
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    /// Latest value of a running animation
    pub fn current(&self, property: Property) -> Option<f32> {
        self.running
            .iter()
            .find(|r| r.property == property)
            .map(|r| r.value)
    }

    /// Advance every animation to `now`.
    pub fn tick(&mut self, now: Instant) -> Frame<A> {
        let mut frame = Frame::default();
        let mut index = 0;
        while index < self.running.len() {
            let running = &mut self.running[index];
            let started_at = *running.started_at.get_or_insert(now);
            let elapsed = now.saturating_duration_since(started_at);
            running.value = running.tween.value_at(elapsed);
            frame.values.push((running.property, running.value));

            if elapsed >= running.tween.duration {
                let finished = self.running.remove(index);
                if let Some(action) = finished.on_complete {
                    frame.completed.push((finished.id, action));
                }
            } else {
                index += 1;
            }
        }
        frame
    }
}
