use linkpage_core::OverflowPolicy;
use std::collections::VecDeque;

/// Oldest-first event buffer.
#[derive(Debug)]
pub struct EventBuffer<E> {
    events: VecDeque<E>,
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self {
            events: VecDeque::new(),
        }
    }
}

impl<E> EventBuffer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail and return the new length.
    pub fn push(&mut self, event: E) -> usize {
        self.events.push_back(event);
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take every buffered event, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events).into()
    }

    /// Put a failed batch back in front of anything buffered since it was taken.
    ///
    /// The result is truncated to `cap` according to `policy`. Returns the
    /// number of events dropped.
    pub fn reinsert(&mut self, batch: Vec<E>, cap: usize, policy: OverflowPolicy) -> usize {
        let mut combined: VecDeque<E> = batch.into();
        combined.append(&mut self.events);

        let excess = combined.len().saturating_sub(cap);
        if excess > 0 {
            match policy {
                OverflowPolicy::KeepOldest => combined.truncate(cap),
                OverflowPolicy::KeepNewest => {
                    combined.drain(..excess);
                }
            }
        }

        self.events = combined;
        excess
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.events.iter()
    }
}
