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

//! Hardware-facing definitions: exit reasons, exit qualifications and the
//! execution controls the broker lets listeners toggle.

mod controls;
mod definitions;
mod exit_info;

pub use self::controls::{
    CR3_LOAD_EXITING, ControlField, EPT_VIOLATION_VE, Fallback, MONITOR_TRAP_FLAG,
    PRIMARY_ALLOWANCE_MASK, PRIMARY_CONTROLS, SECONDARY_ALLOWANCE_MASK, SECONDARY_CONTROLS,
    VmControl,
};
pub use self::definitions::VmxExitReason;
pub use self::exit_info::{CrAccessInfo, EptViolationInfo, VmxExitInfo};

/// VMCS field encodings the broker reads or writes.
pub mod fields {
    pub use x86::vmx::vmcs::control::{
        PRIMARY_PROCBASED_EXEC_CONTROLS, SECONDARY_PROCBASED_EXEC_CONTROLS,
    };
    pub use x86::vmx::vmcs::guest::{CR0, CR3, CR4, CS_SELECTOR, RFLAGS, RIP, RSP};
}
