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

#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate log;

extern crate alloc;

pub(crate) mod regs;

mod broker;
mod context;
mod delivery;
mod dispatch;
mod exit;
mod hal;
mod hypercall;
mod pending;
mod registry;
mod toggler;
mod trap;
mod vcpu;
mod vmcall;
mod vmx;

#[cfg(test)]
mod tests;

pub use broker::{DeliveryState, ExitBroker, NO_TIMEOUT};
pub use context::{BrokerConfig, DEFAULT_EXIT_EVENT_VECTOR, Transfer, VirtContext};
pub use exit::{EXIT_REASON_MAX, ExitEvent, ExitReasonId};
pub use hal::BrokerHal;
pub use hypercall::*;
pub use pending::PendingSlot;
pub use registry::{ExitRegistry, ListenerSet};
pub use regs::{GeneralRegisters, GeneralRegistersDiff};
pub use vcpu::{DomainKind, ExitVCpu};
pub use vmx::{
    CR3_LOAD_EXITING, ControlField, CrAccessInfo, EPT_VIOLATION_VE, EptViolationInfo, Fallback,
    MONITOR_TRAP_FLAG, PRIMARY_ALLOWANCE_MASK, PRIMARY_CONTROLS, SECONDARY_ALLOWANCE_MASK,
    SECONDARY_CONTROLS, VmControl, VmxExitInfo, VmxExitReason, fields,
};
