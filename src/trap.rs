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

//! Translation of hardware VM exits into exit events.

use axerrno::AxResult;

use crate::context::{Transfer, VirtContext};
use crate::exit::{ExitEvent, ExitReasonId};
use crate::hal::BrokerHal;
use crate::hypercall::Vpid;
use crate::regs::GeneralRegisters;
use crate::vcpu::ExitVCpu;
use crate::vmx::{
    CR3_LOAD_EXITING, CrAccessInfo, EPT_VIOLATION_VE, EptViolationInfo, MONITOR_TRAP_FLAG,
    VmxExitInfo, VmxExitReason, fields,
};

const CR3_PCID_NOFLUSH: u64 = 1 << 63;

impl<V: ExitVCpu, H: BrokerHal> VirtContext<V, H> {
    /// Handles a VM exit of `vpid` if it belongs to the broker.
    ///
    /// Returns `None` for exits the broker does not own, leaving them to the
    /// rest of the VMM. Otherwise the returned [`Transfer`] names the vCPU to
    /// enter next.
    pub fn handle_exit(&mut self, vpid: Vpid, exit_info: &VmxExitInfo) -> Option<AxResult<Transfer>> {
        if exit_info.entry_failure {
            return None;
        }
        match exit_info.exit_reason {
            VmxExitReason::CR_ACCESS => {
                let cr_access = CrAccessInfo::from_qualification(exit_info.exit_qualification);
                cr_access
                    .is_cr3_write()
                    .then(|| self.handle_wrcr3(vpid, cr_access.gpr))
            }
            VmxExitReason::EPT_VIOLATION => {
                let violation = EptViolationInfo::from_qualification(exit_info.exit_qualification);
                Some(self.handle_ept_violation(vpid, violation))
            }
            VmxExitReason::MONITOR_TRAP_FLAG => Some(self.handle_monitor_trap(vpid)),
            VmxExitReason::VMCALL => self.handle_hypercall(vpid),
            _ => None,
        }
    }

    /// Makes `vpid` the loaded vCPU, as it is right after its own exit.
    pub(crate) fn enter(&mut self, vpid: Vpid) -> AxResult {
        if self.loaded() != Some(vpid) {
            self.load(vpid)?;
        }
        Ok(())
    }

    /// `MOV CR3, gpr` trapped by CR3-load exiting.
    ///
    /// The write is carried out before listeners hear of it: the event holds
    /// the new CR3 in `data0` and the old one in `data1`.
    pub fn handle_wrcr3(&mut self, vpid: Vpid, gpr: u8) -> AxResult<Transfer> {
        self.enter(vpid)?;
        let vcpu = self.vcpu_mut(vpid)?;
        let source = if gpr == GeneralRegisters::RSP_INDEX {
            vcpu.stack_pointer()?
        } else {
            vcpu.regs().get_reg_of_index(gpr)
        };
        // Bit 63 is the PCID no-flush hint, not part of CR3.
        let new_cr3 = source & !CR3_PCID_NOFLUSH;
        let old_cr3 = vcpu.cr3()?;
        vcpu.vmwrite(fields::CR3, new_cr3)?;
        trace!("handle_wrcr3: {old_cr3:#x} -> {new_cr3:#x} on {vpid:#x}");

        let event = ExitEvent::new(vpid, ExitReasonId::Cr3LoadExiting, new_cr3, old_cr3);
        if let Some(transfer) = self.notify_exit(event)? {
            return Ok(transfer);
        }

        warn!("wrcr3 exiting is enabled on {vpid:#x} but there is no listener to notify");
        let vcpu = self.vcpu_mut(vpid)?;
        CR3_LOAD_EXITING.disable(vcpu)?;
        vcpu.advance()?;
        Ok(Transfer::Run(vpid))
    }

    /// EPT violation, reported as one of the three EPT violation reasons.
    ///
    /// A write takes precedence over an instruction fetch, which takes
    /// precedence over a read.
    pub fn handle_ept_violation(
        &mut self,
        vpid: Vpid,
        violation: EptViolationInfo,
    ) -> AxResult<Transfer> {
        let reason = if violation.write {
            ExitReasonId::EptWriteViolation
        } else if violation.execute {
            ExitReasonId::EptExecuteViolation
        } else {
            ExitReasonId::EptReadViolation
        };

        self.enter(vpid)?;
        let event = self.rip_event(vpid, reason)?;
        trace!("handle_ept_violation: {reason:?} at rip {:#x} on {vpid:#x}", event.data1);
        if let Some(transfer) = self.notify_exit(event)? {
            return Ok(transfer);
        }

        warn!("EPT violation exiting is enabled on {vpid:#x} but there is no listener to notify");
        EPT_VIOLATION_VE.disable(self.vcpu_mut(vpid)?)?;
        Ok(Transfer::Run(vpid))
    }

    /// Monitor trap flag exit.
    ///
    /// The flag is armed again before notifying, so listeners keep
    /// single-stepping until they turn it off with `vmwrite`.
    pub fn handle_monitor_trap(&mut self, vpid: Vpid) -> AxResult<Transfer> {
        self.enter(vpid)?;
        MONITOR_TRAP_FLAG.enable(self.vcpu_mut(vpid)?)?;

        let event = self.rip_event(vpid, ExitReasonId::MonitorTrapFlag)?;
        trace!("handle_monitor_trap: rip {:#x} on {vpid:#x}", event.data1);
        if let Some(transfer) = self.notify_exit(event)? {
            return Ok(transfer);
        }

        warn!("MTF exiting is enabled on {vpid:#x} but there is no listener to notify");
        let vcpu = self.vcpu_mut(vpid)?;
        MONITOR_TRAP_FLAG.disable(vcpu)?;
        vcpu.advance()?;
        Ok(Transfer::Run(vpid))
    }

    /// An event carrying the guest-physical address of `RIP` and `RIP` itself.
    fn rip_event(&self, vpid: Vpid, reason: ExitReasonId) -> AxResult<ExitEvent> {
        let vcpu = self.vcpu(vpid)?;
        let rip = vcpu.rip()?;
        let gpa = vcpu.gva_to_gpa(rip)?;
        Ok(ExitEvent::new(vpid, reason, gpa, rip))
    }
}
