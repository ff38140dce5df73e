//! Piecewise schedules mutating resource peaks and states over time.

use serde::{Deserialize, Serialize};

/// A restartable sequence of `(delta, value)` events attached to a resource. Each event
/// fires `delta` seconds after the previous one and rewrites the target quantity: a
/// multiplicative scale for speed/bandwidth profiles, 0/1 for state profiles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub events: Vec<(f64, f64)>,
    /// Restart from the first event after the last one fired.
    #[serde(default)]
    pub periodic: bool,
}

impl Profile {
    pub fn new(events: Vec<(f64, f64)>, periodic: bool) -> Self {
        assert!(!events.is_empty(), "a profile needs at least one event");
        assert!(
            events.iter().all(|&(delta, _)| delta >= 0.0),
            "profile deltas must be non-negative"
        );
        Profile { events, periodic }
    }
}

/// Replay state of a profile: the absolute time and value of the next event.
#[derive(Clone, Debug)]
pub(crate) struct ProfileCursor {
    profile: Profile,
    next_index: Option<usize>,
    next_time: f64,
}

impl ProfileCursor {
    pub fn new(profile: Profile, start: f64) -> Self {
        let next_time = start + profile.events[0].0;
        ProfileCursor {
            profile,
            next_index: Some(0),
            next_time,
        }
    }

    /// Absolute time of the next event, if any remains.
    pub fn next_event_time(&self) -> Option<f64> {
        self.next_index.map(|_| self.next_time)
    }

    /// Fires the next event if it is due at `now`, returning its value.
    pub fn pop_due(&mut self, now: f64, eps: f64) -> Option<f64> {
        let index = self.next_index?;
        if self.next_time > now + eps {
            return None;
        }
        let value = self.profile.events[index].1;
        let next = index + 1;
        if next < self.profile.events.len() {
            self.next_index = Some(next);
            self.next_time += self.profile.events[next].0;
        } else if self.profile.periodic {
            self.next_index = Some(0);
            self.next_time += self.profile.events[0].0;
        } else {
            self.next_index = None;
        }
        Some(value)
    }
}
