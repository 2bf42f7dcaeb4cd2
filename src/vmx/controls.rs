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

use axerrno::AxResult;
use x86::vmx::vmcs::control::{PrimaryControls, SecondaryControls};

use super::fields;
use crate::exit::ExitReasonId;
use crate::vcpu::ExitVCpu;

/// The processor-based execution control fields a listener may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlField {
    /// Primary processor-based VM-execution controls. (0x4002)
    Primary,
    /// Secondary processor-based VM-execution controls. (0x401E)
    Secondary,
}

impl ControlField {
    pub const fn encoding(self) -> u32 {
        match self {
            ControlField::Primary => fields::PRIMARY_PROCBASED_EXEC_CONTROLS,
            ControlField::Secondary => fields::SECONDARY_PROCBASED_EXEC_CONTROLS,
        }
    }

    pub fn from_encoding(field: u64) -> Option<Self> {
        match field {
            f if f == fields::PRIMARY_PROCBASED_EXEC_CONTROLS as u64 => Some(ControlField::Primary),
            f if f == fields::SECONDARY_PROCBASED_EXEC_CONTROLS as u64 => {
                Some(ControlField::Secondary)
            }
            _ => None,
        }
    }

    /// The bits of this field a listener is allowed to touch.
    pub const fn allowance_mask(self) -> u64 {
        match self {
            ControlField::Primary => PRIMARY_ALLOWANCE_MASK,
            ControlField::Secondary => SECONDARY_ALLOWANCE_MASK,
        }
    }

    pub fn controls(self) -> &'static [VmControl] {
        match self {
            ControlField::Primary => &PRIMARY_CONTROLS,
            ControlField::Secondary => &SECONDARY_CONTROLS,
        }
    }

    /// The control living at `bit` of this field, if the broker manages it.
    pub fn control_for_bit(self, bit: u32) -> Option<&'static VmControl> {
        self.controls().iter().find(|c| c.mask == 1 << bit)
    }

    /// Read-modify-write of the control field on the currently loaded VMCS.
    fn update<V: ExitVCpu>(self, vcpu: &mut V, bits: u64, enable: bool) -> AxResult {
        let mut ctrl = vcpu.vmread(self.encoding())?;
        if enable {
            ctrl |= bits
        } else {
            ctrl &= !bits
        }
        vcpu.vmwrite(self.encoding(), ctrl)
    }
}

/// What to do with the origin vCPU when nobody handles one of its exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Skip the instruction that exited.
    Advance,
    /// Re-run it untouched.
    Resume,
}

/// An exiting control a listener can subscribe to, and the exit reason it feeds.
#[derive(Debug)]
pub struct VmControl {
    pub name: &'static str,
    pub field: ControlField,
    pub mask: u64,
    pub exit: ExitReasonId,
    pub fallback: Fallback,
}

pub const CR3_LOAD_EXITING: VmControl = VmControl {
    name: "cr3_load_exiting",
    field: ControlField::Primary,
    mask: PrimaryControls::CR3_LOAD_EXITING.bits() as u64,
    exit: ExitReasonId::Cr3LoadExiting,
    fallback: Fallback::Advance,
};

pub const MONITOR_TRAP_FLAG: VmControl = VmControl {
    name: "monitor_trap_flag",
    field: ControlField::Primary,
    mask: PrimaryControls::MONITOR_TRAP_FLAG.bits() as u64,
    exit: ExitReasonId::MonitorTrapFlag,
    fallback: Fallback::Resume,
};

/// Stands for all three EPT violation sub-reasons.
pub const EPT_VIOLATION_VE: VmControl = VmControl {
    name: "ept_violation_ve",
    field: ControlField::Secondary,
    mask: SecondaryControls::EPT_VIOLATION_VE.bits() as u64,
    exit: ExitReasonId::EptReadViolation,
    fallback: Fallback::Resume,
};

pub static PRIMARY_CONTROLS: [VmControl; 2] = [CR3_LOAD_EXITING, MONITOR_TRAP_FLAG];
pub static SECONDARY_CONTROLS: [VmControl; 1] = [EPT_VIOLATION_VE];

pub const PRIMARY_ALLOWANCE_MASK: u64 = CR3_LOAD_EXITING.mask | MONITOR_TRAP_FLAG.mask;
pub const SECONDARY_ALLOWANCE_MASK: u64 = EPT_VIOLATION_VE.mask;

impl VmControl {
    /// The control whose exits are reported as `reason`.
    pub fn for_exit(reason: ExitReasonId) -> Option<&'static VmControl> {
        PRIMARY_CONTROLS
            .iter()
            .chain(SECONDARY_CONTROLS.iter())
            .find(|c| c.covers(reason))
    }

    /// Whether exits reported as `reason` are produced by this control.
    pub fn covers(&self, reason: ExitReasonId) -> bool {
        if self.exit == ExitReasonId::EptReadViolation {
            reason.is_ept_violation()
        } else {
            self.exit == reason
        }
    }

    pub fn enable<V: ExitVCpu>(&self, vcpu: &mut V) -> AxResult {
        self.field.update(vcpu, self.mask, true)
    }

    pub fn disable<V: ExitVCpu>(&self, vcpu: &mut V) -> AxResult {
        self.field.update(vcpu, self.mask, false)
    }

    pub fn is_enabled<V: ExitVCpu>(&self, vcpu: &V) -> AxResult<bool> {
        Ok(vcpu.vmread(self.field.encoding())? & self.mask != 0)
    }

    /// Runs the default handling of an exit no listener took.
    pub fn run_fallback<V: ExitVCpu>(&self, vcpu: &mut V) -> AxResult {
        match self.fallback {
            Fallback::Advance => vcpu.advance(),
            Fallback::Resume => Ok(()),
        }
    }
}
