//! Synchronous callback buses fired by the maestro.
//!
//! Handlers run inside the kernel while it is being mutated, so they must not issue
//! simcalls or call back into the engine; doing so aborts the simulation.

use std::rc::Rc;

/// A list of handlers called in registration order with a borrowed payload.
pub struct Signal<T> {
    slots: Vec<Rc<dyn Fn(&T)>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Signal { slots: Vec::new() }
    }
}

impl<T> Signal<T> {
    pub fn connect(&mut self, handler: impl Fn(&T) + 'static) {
        self.slots.push(Rc::new(handler));
    }

    pub fn emit(&self, payload: &T) {
        for slot in self.slots.iter() {
            slot(payload);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
