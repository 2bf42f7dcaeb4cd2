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

use bit_field::BitField;

use super::definitions::VmxExitReason;

/// VM-Exit Informations. (SDM Vol. 3C, Section 24.9.1)
#[derive(Debug, Clone, Copy)]
pub struct VmxExitInfo {
    /// VM-entry failure. (0 = true VM exit; 1 = VM-entry failure)
    pub entry_failure: bool,
    /// Basic exit reason.
    pub exit_reason: VmxExitReason,
    /// For VM exits resulting from instruction execution, this field receives
    /// the length in bytes of the instruction whose execution led to the VM exit.
    pub exit_instruction_length: u32,
    /// Guest `RIP` where the VM exit occurs.
    pub guest_rip: usize,
    /// Exit qualification of the VM exit.
    pub exit_qualification: u64,
}

/// Exit Qualification for Control-Register Accesses. (SDM Vol. 3C, Section 27.2.1, Table 27-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrAccessInfo {
    /// Number of control register
    pub cr_number: u8,
    /// Access type (0 = MOV to CR; 1 = MOV from CR; 2 = CLTS; 3 = LMSW)
    pub access_type: u8,
    /// LMSW operand type
    pub lmsw_op_type: u8,
    /// For MOV CR, the general-purpose register
    pub gpr: u8,
    /// For LMSW, the LMSW source data
    pub lmsw_source_data: u16,
}

impl CrAccessInfo {
    pub const ACCESS_MOV_TO_CR: u8 = 0;
    pub const ACCESS_MOV_FROM_CR: u8 = 1;

    pub fn from_qualification(qualification: u64) -> Self {
        Self {
            cr_number: qualification.get_bits(0..4) as u8,
            access_type: qualification.get_bits(4..6) as u8,
            lmsw_op_type: qualification.get_bit(6) as u8,
            gpr: qualification.get_bits(8..12) as u8,
            lmsw_source_data: qualification.get_bits(16..32) as u16,
        }
    }

    /// `MOV CR3, reg`.
    pub fn is_cr3_write(&self) -> bool {
        self.cr_number == 3 && self.access_type == Self::ACCESS_MOV_TO_CR
    }
}

/// Exit Qualification for EPT Violations. (SDM Vol. 3C, Section 27.2.1, Table 27-7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EptViolationInfo {
    /// The violation was caused by a data read.
    pub read: bool,
    /// The violation was caused by a data write.
    pub write: bool,
    /// The violation was caused by an instruction fetch.
    pub execute: bool,
    /// The guest linear-address field is valid.
    pub linear_address_valid: bool,
}

impl EptViolationInfo {
    pub fn from_qualification(qualification: u64) -> Self {
        Self {
            read: qualification.get_bit(0),
            write: qualification.get_bit(1),
            execute: qualification.get_bit(2),
            linear_address_valid: qualification.get_bit(7),
        }
    }
}
