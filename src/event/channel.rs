use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::event::event::Event;

/// Default bus capacity, per the component design's suggested bound.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Multi-producer handle onto the bounded event bus. `publish` never blocks:
/// on overflow the oldest pending event is dropped to make room.
#[derive(Clone)]
pub struct EventPublisher(Arc<ArrayQueue<Event>>);

/// Single-consumer handle draining the bus.
pub struct EventConsumer(Arc<ArrayQueue<Event>>);

pub fn bounded(capacity: usize) -> (EventPublisher, EventConsumer) {
    let queue = Arc::new(ArrayQueue::new(capacity));
    (EventPublisher(queue.clone()), EventConsumer(queue))
}

impl EventPublisher {
    pub fn publish(&self, event: Event) {
        let mut remaining = event;
        loop {
            match self.0.push(remaining) {
                Ok(()) => return,
                Err(rejected) => {
                    remaining = rejected;
                    self.0.pop();
                }
            }
        }
    }
}

impl EventConsumer {
    pub fn try_recv(&self) -> Option<Event> {
        self.0.pop()
    }

    /// Drains every event currently queued, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.0.pop() {
            events.push(event);
        }
        events
    }
}
