//! Priority-tiered FIFO queue of pending calls.

use std::collections::VecDeque;

use serde::Serialize;

use crate::scheduler::call::{ApiCall, Priority};

/// Pending calls by tier. FIFO within a tier; higher tiers pop first.
#[derive(Debug, Default)]
pub struct CallQueue {
    high: VecDeque<ApiCall>,
    medium: VecDeque<ApiCall>,
    low: VecDeque<ApiCall>,
}

/// Queue depth per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueDepth {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

impl CallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<ApiCall> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    /// Enqueue at the back of the call's tier.
    pub fn push(&mut self, call: ApiCall) {
        self.tier_mut(call.priority).push_back(call);
    }

    /// Enqueue at the front of the call's tier (used for requeues).
    pub fn push_front(&mut self, call: ApiCall) {
        self.tier_mut(call.priority).push_front(call);
    }

    /// Take the next call: highest tier first, oldest first within a tier.
    pub fn pop(&mut self) -> Option<ApiCall> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    /// Priority of the call `pop` would return.
    pub fn peek_priority(&self) -> Option<Priority> {
        Priority::DESCENDING.into_iter().find(|&p| match p {
            Priority::High => !self.high.is_empty(),
            Priority::Medium => !self.medium.is_empty(),
            Priority::Low => !self.low.is_empty(),
        })
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> QueueDepth {
        QueueDepth {
            high: self.high.len(),
            medium: self.medium.len(),
            low: self.low.len(),
        }
    }
}
