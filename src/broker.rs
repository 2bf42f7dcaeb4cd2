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

use crate::exit::{ExitEvent, ExitReasonId};
use crate::hypercall::Vpid;
use crate::pending::PendingSlot;
use crate::registry::ExitRegistry;

/// Sentinel deadline meaning "no timeout recorded".
pub const NO_TIMEOUT: u64 = u64::MAX;

/// Where a listener is in the `next_exit` / `end_of_exit` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Nothing pending and no deadline.
    Idle,
    /// A `next_exit` deadline is recorded, still no event.
    Armed,
    /// An event sits in the pending slot.
    Delivering,
}

/// The exit broker state attached to one vCPU.
///
/// As a target, it holds the listeners of each exit reason of its vCPU. As a
/// listener, it holds the event being delivered to its vCPU, the `next_exit`
/// deadline, and the privilege level delivery is made at.
#[derive(Debug)]
pub struct ExitBroker {
    vpid: Vpid,
    registry: ExitRegistry,
    pending: PendingSlot,
    cpl: u8,
    deadline: u64,
}

impl ExitBroker {
    pub fn new(vpid: Vpid, listener_capacity: usize) -> Self {
        Self {
            vpid,
            registry: ExitRegistry::new(listener_capacity),
            pending: PendingSlot::new(),
            cpl: 0,
            deadline: NO_TIMEOUT,
        }
    }

    /// The vCPU this broker belongs to.
    pub fn vpid(&self) -> Vpid {
        self.vpid
    }

    pub fn registry(&self) -> &ExitRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ExitRegistry {
        &mut self.registry
    }

    pub fn pending(&self) -> &PendingSlot {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingSlot {
        &mut self.pending
    }

    pub fn add_listener(&mut self, reason: ExitReasonId, vpid: Vpid) -> bool {
        self.registry.add_listener(reason, vpid)
    }

    pub fn remove_listener(&mut self, reason: ExitReasonId, vpid: Vpid) -> bool {
        self.registry.remove_listener(reason, vpid)
    }

    /// The event in flight for this listener.
    pub fn pending_event(&self) -> Option<ExitEvent> {
        self.pending.front().copied()
    }

    pub fn cpl(&self) -> u8 {
        self.cpl
    }

    pub fn set_cpl(&mut self, cpl: u8) {
        self.cpl = cpl;
    }

    /// Kernel listeners are signalled with a virtual interrupt, user-mode ones
    /// poll `next_exit`.
    pub fn is_kernel_listener(&self) -> bool {
        self.cpl == 0
    }

    /// The recorded `next_exit` deadline, in nanoseconds.
    pub fn deadline(&self) -> Option<u64> {
        (self.deadline != NO_TIMEOUT).then_some(self.deadline)
    }

    pub fn set_deadline(&mut self, deadline: u64) {
        self.deadline = deadline;
    }

    pub fn clear_deadline(&mut self) {
        self.deadline = NO_TIMEOUT;
    }

    pub fn state(&self) -> DeliveryState {
        if !self.pending.is_empty() {
            DeliveryState::Delivering
        } else if self.deadline().is_some() {
            DeliveryState::Armed
        } else {
            DeliveryState::Idle
        }
    }
}
