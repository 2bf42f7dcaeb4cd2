// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use alloc::collections::VecDeque;

use crate::exit::ExitEvent;

/// The event currently being delivered to a listener.
///
/// Hardware exits are serial per vCPU, so at most one event is ever expected
/// here. [`PendingSlot::push`] still queues a second one and reports the new
/// length, leaving the recovery decision to the dispatcher.
#[derive(Debug, Default)]
pub struct PendingSlot {
    events: VecDeque<ExitEvent>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(1),
        }
    }

    /// Queues `event` and returns the number of events now pending.
    pub fn push(&mut self, event: ExitEvent) -> usize {
        self.events.push_back(event);
        self.events.len()
    }

    /// The event in flight, left in place.
    pub fn front(&self) -> Option<&ExitEvent> {
        self.events.front()
    }

    /// Removes the event in flight.
    pub fn pop(&mut self) -> Option<ExitEvent> {
        self.events.pop_front()
    }

    /// Removes the most recently queued event.
    pub fn pop_latest(&mut self) -> Option<ExitEvent> {
        self.events.pop_back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
