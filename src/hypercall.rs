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

//! The register-level hypercall ABI shared with introspection guests.
//!
//! `rax` selects the hypercall (opcode in bits 16..32, index in bits 0..16),
//! `r11`..`r14` carry the arguments and the status is written back to `rax`.

use axerrno::AxError;
use bit_field::BitField;
use bitflags::bitflags;
use numeric_enum_macro::numeric_enum;

/// Identifier of a virtual processor.
pub type Vpid = u64;

/// Refers to the calling vCPU itself.
pub const VPID_SELF: Vpid = u64::MAX;
/// Refers to the parent vCPU of the caller.
pub const VPID_PARENT: Vpid = u64::MAX - 1;
/// Refers to any vCPU.
pub const VPID_ANY: Vpid = u64::MAX - 2;

/// vCPU pause/resume hypercalls.
pub const VP_MANAGEMENT_OP: u64 = 0x0004;
/// vCPU register inspection hypercalls.
pub const VP_STATE_OP: u64 = 0x0005;
/// Exit event hypercalls.
pub const VP_EXIT_OP: u64 = 0x0006;
/// Address translation for introspection libraries.
pub const VMI_OP: u64 = 0x0007;

pub const VP_MANAGEMENT_OP_PAUSE_VP_IDX: u64 = 0;
pub const VP_MANAGEMENT_OP_RESUME_VP_IDX: u64 = 1;

pub const VP_STATE_OP_REG_VAL_IDX: u64 = 0;

pub const VP_EXIT_OP_NEXT_EXIT_IDX: u64 = 0;
pub const VP_EXIT_OP_END_OF_EXIT_IDX: u64 = 1;
pub const VP_EXIT_OP_VMREAD_IDX: u64 = 2;
pub const VP_EXIT_OP_VMWRITE_IDX: u64 = 3;

pub const VMI_OP_TRANSLATE_V2P_IDX: u64 = 0;

/// Extracts the opcode of a hypercall from `rax`.
pub fn opcode(rax: u64) -> u64 {
    rax.get_bits(16..32)
}

/// Extracts the index of a hypercall from `rax`.
pub fn index(rax: u64) -> u64 {
    rax.get_bits(0..16)
}

/// Builds the `rax` value of a hypercall.
pub const fn hypercall(opcode: u64, index: u64) -> u64 {
    ((opcode & 0xFFFF) << 16) | (index & 0xFFFF)
}

numeric_enum! {
    #[repr(u64)]
    /// Status codes written to `rax` when a hypercall completes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Status {
        Success = 0,
        FailureUnknown = 0xDEAD_0000_0001_0001,
        FailureUnknownHypercall = 0xDEAD_0000_0002_0001,
        FailureUnsupported = 0xDEAD_0000_0004_0001,
        InvalidParams0 = 0xDEAD_0000_0001_0002,
        InvalidParams1 = 0xDEAD_0000_0002_0002,
        InvalidParams2 = 0xDEAD_0000_0004_0002,
        InvalidParams3 = 0xDEAD_0000_0008_0002,
        InvalidParams4 = 0xDEAD_0000_0010_0002,
        InvalidParams5 = 0xDEAD_0000_0020_0002,
        InvalidVpidUnknown = 0xDEAD_0000_0001_0003,
        InvalidVpidUnsupportedSelf = 0xDEAD_0000_0002_0003,
        InvalidVpidUnsupportedParent = 0xDEAD_0000_0004_0003,
        InvalidVpidUnsupportedAny = 0xDEAD_0000_0008_0003,
        InvalidExitAlreadyListening = 0xDEAD_0000_0001_0004,
        InvalidExitNoListener = 0xDEAD_0000_0002_0004,
    }
}

/// Result of a hypercall handler. The error is the status reported to the guest.
pub type HypercallResult<T = ()> = Result<T, Status>;

impl Status {
    /// The raw value placed in `rax`.
    pub fn raw(self) -> u64 {
        self.into()
    }
}

impl From<AxError> for Status {
    fn from(err: AxError) -> Self {
        match err {
            AxError::Unsupported => Status::FailureUnsupported,
            AxError::NotFound => Status::InvalidVpidUnknown,
            AxError::AlreadyExists => Status::InvalidExitAlreadyListening,
            AxError::InvalidInput => Status::InvalidParams0,
            _ => Status::FailureUnknown,
        }
    }
}

bitflags! {
    /// Flags of `next_exit`, passed in `r11`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NextExitFlags: u64 {
        /// Bits 32..64 of `r11` hold a timeout in milliseconds.
        const HAS_TIMEOUT = 1 << 0;
    }
}

impl NextExitFlags {
    /// Timeout in nanoseconds encoded in `r11`, if the caller asked for one.
    pub fn timeout_nanos(r11: u64) -> Option<u64> {
        Self::from_bits_truncate(r11)
            .contains(Self::HAS_TIMEOUT)
            .then(|| r11.get_bits(32..64).saturating_mul(1_000_000))
    }
}

bitflags! {
    /// Flags of `end_of_exit`, passed in `r11`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndOfExitFlags: u64 {
        /// The listener handled the event; otherwise it goes to the next one.
        const HANDLED = 1 << 0;
        /// Advance the origin vCPU past the instruction that exited.
        const ADVANCE = 1 << 1;
    }
}

numeric_enum! {
    #[repr(u64)]
    /// Register ids understood by `reg_val`, passed in `r12`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RegisterId {
        Rax = 1,
        Rbx = 2,
        Rcx = 3,
        Rdx = 4,
        Rdi = 5,
        Rsi = 6,
        R8 = 7,
        R9 = 8,
        R10 = 9,
        R11 = 10,
        R12 = 11,
        R13 = 12,
        R14 = 13,
        R15 = 14,
        Rbp = 15,
        Rsp = 16,
        Rip = 17,
        Cr0 = 18,
        Cr3 = 20,
        Cr4 = 21,
        Rflags = 31,
        Cs = 36,
    }
}
