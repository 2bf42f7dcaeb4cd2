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

use numeric_enum_macro::numeric_enum;

use crate::hypercall::Vpid;

numeric_enum! {
    #[repr(u64)]
    /// The generic exit reasons a listener can subscribe to.
    ///
    /// The raw values are part of the hypercall ABI: `next_exit` returns them in `r11`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum ExitReasonId {
        Cr3LoadExiting = 0,
        MonitorTrapFlag = 1,
        EptReadViolation = 2,
        EptWriteViolation = 3,
        EptExecuteViolation = 4,
        Timeout = 5,
    }
}

/// Number of [`ExitReasonId`]s, i.e. the size of per-reason tables.
pub const EXIT_REASON_MAX: usize = 6;

impl ExitReasonId {
    /// Every exit reason, in ABI order.
    pub const ALL: [ExitReasonId; EXIT_REASON_MAX] = [
        ExitReasonId::Cr3LoadExiting,
        ExitReasonId::MonitorTrapFlag,
        ExitReasonId::EptReadViolation,
        ExitReasonId::EptWriteViolation,
        ExitReasonId::EptExecuteViolation,
        ExitReasonId::Timeout,
    ];

    /// The three EPT violation sub-reasons, monitored together.
    pub const EPT_VIOLATIONS: [ExitReasonId; 3] = [
        ExitReasonId::EptReadViolation,
        ExitReasonId::EptWriteViolation,
        ExitReasonId::EptExecuteViolation,
    ];

    /// Position of this reason in per-reason tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this is one of the EPT violation sub-reasons.
    pub const fn is_ept_violation(self) -> bool {
        matches!(
            self,
            ExitReasonId::EptReadViolation
                | ExitReasonId::EptWriteViolation
                | ExitReasonId::EptExecuteViolation
        )
    }

    /// The raw value placed in `r11` by `next_exit`.
    pub fn raw(self) -> u64 {
        self.into()
    }
}

/// A VM exit turned into a generic event.
///
/// Built by a trap translator on the origin vCPU, copied into the pending slot
/// of a listener, and discarded by `end_of_exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    /// The vCPU that took the exit.
    pub origin: Vpid,
    /// Why it exited.
    pub reason: ExitReasonId,
    /// Reason-specific payload, returned in `r12`.
    pub data0: u64,
    /// Reason-specific payload, returned in `r13`.
    pub data1: u64,
}

impl ExitEvent {
    pub const fn new(origin: Vpid, reason: ExitReasonId, data0: u64, data1: u64) -> Self {
        Self {
            origin,
            reason,
            data0,
            data1,
        }
    }
}
