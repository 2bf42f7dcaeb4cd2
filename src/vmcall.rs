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

use crate::context::{Transfer, VirtContext};
use crate::hal::BrokerHal;
use crate::hypercall::{
    HypercallResult, RegisterId, Status, VP_EXIT_OP, VP_EXIT_OP_END_OF_EXIT_IDX,
    VP_EXIT_OP_NEXT_EXIT_IDX, VP_EXIT_OP_VMREAD_IDX, VP_EXIT_OP_VMWRITE_IDX, VP_MANAGEMENT_OP,
    VP_MANAGEMENT_OP_PAUSE_VP_IDX, VP_MANAGEMENT_OP_RESUME_VP_IDX, VP_STATE_OP,
    VP_STATE_OP_REG_VAL_IDX, VPID_ANY, VPID_PARENT, VPID_SELF, VMI_OP, VMI_OP_TRANSLATE_V2P_IDX,
    Vpid, index, opcode,
};
use crate::regs::GeneralRegisters;
#[cfg(feature = "tracing")]
use crate::regs::GeneralRegistersDiff;
use crate::vcpu::ExitVCpu;
use crate::vmx::fields;

impl RegisterId {
    /// The VMCS field holding this register, for registers not kept in the
    /// general-purpose register file.
    fn vmcs_field(self) -> Option<u32> {
        match self {
            RegisterId::Rsp => Some(fields::RSP),
            RegisterId::Rip => Some(fields::RIP),
            RegisterId::Cr0 => Some(fields::CR0),
            RegisterId::Cr3 => Some(fields::CR3),
            RegisterId::Cr4 => Some(fields::CR4),
            RegisterId::Rflags => Some(fields::RFLAGS),
            RegisterId::Cs => Some(fields::CS_SELECTOR),
            _ => None,
        }
    }

    fn read_gpr(self, regs: &GeneralRegisters) -> u64 {
        match self {
            RegisterId::Rax => regs.rax,
            RegisterId::Rbx => regs.rbx,
            RegisterId::Rcx => regs.rcx,
            RegisterId::Rdx => regs.rdx,
            RegisterId::Rdi => regs.rdi,
            RegisterId::Rsi => regs.rsi,
            RegisterId::R8 => regs.r8,
            RegisterId::R9 => regs.r9,
            RegisterId::R10 => regs.r10,
            RegisterId::R11 => regs.r11,
            RegisterId::R12 => regs.r12,
            RegisterId::R13 => regs.r13,
            RegisterId::R14 => regs.r14,
            RegisterId::R15 => regs.r15,
            RegisterId::Rbp => regs.rbp,
            _ => 0,
        }
    }
}

impl<V: ExitVCpu, H: BrokerHal> VirtContext<V, H> {
    /// Handles a `VMCALL` of `vpid`.
    ///
    /// Returns `None` if the opcode in `rax` is not one of the broker's, so
    /// other hypercall handlers can take it. Hypercall failures are reported
    /// to the caller in `rax`; only a vpid unknown to this context is an error.
    pub fn handle_hypercall(&mut self, vpid: Vpid) -> Option<AxResult<Transfer>> {
        self.dispatch_hypercall(vpid).transpose()
    }

    fn dispatch_hypercall(&mut self, caller: Vpid) -> AxResult<Option<Transfer>> {
        let rax = self.vcpu(caller)?.regs().rax;
        let (op, idx) = (opcode(rax), index(rax));
        if !matches!(op, VP_EXIT_OP | VP_STATE_OP | VP_MANAGEMENT_OP | VMI_OP) {
            return Ok(None);
        }
        self.enter(caller)?;

        #[cfg(feature = "tracing")]
        let before = *self.vcpu(caller)?.regs();

        let transfer = if op == VP_EXIT_OP
            && idx == VP_EXIT_OP_NEXT_EXIT_IDX
            && self.vcpu(caller)?.is_domu()
        {
            // `next_exit` may have to be retried, so it advances itself.
            match self.next_exit(caller) {
                Ok(transfer) => transfer,
                Err(err) => {
                    self.load(caller)?;
                    self.vcpu_mut(caller)?.advance()?;
                    self.fail_hypercall(caller, err.into())?
                }
            }
        } else {
            self.vcpu_mut(caller)?.advance()?;
            let result = match op {
                VP_EXIT_OP => self.vp_exit_op(caller, idx),
                VP_STATE_OP => self.vp_state_op(caller, idx),
                VMI_OP => self.vmi_op(caller, idx),
                _ => self.vp_management_op(caller, idx),
            };
            match result {
                Ok(transfer) => transfer,
                Err(status) => self.fail_hypercall(caller, status)?,
            }
        };

        #[cfg(feature = "tracing")]
        {
            let diff = GeneralRegistersDiff::new(before, *self.vcpu(caller)?.regs());
            if !diff.is_same() {
                trace!("hypercall {rax:#x} of {caller:#x}: {diff:?}");
            }
        }

        Ok(Some(transfer))
    }

    fn fail_hypercall(&mut self, caller: Vpid, status: Status) -> AxResult<Transfer> {
        debug!("hypercall of {caller:#x} failed: {status:?}");
        self.load(caller)?;
        self.vcpu_mut(caller)?.regs_mut().rax = status.raw();
        Ok(Transfer::Run(caller))
    }

    fn vp_exit_op(&mut self, caller: Vpid, idx: u64) -> HypercallResult<Transfer> {
        if self.vcpu(caller)?.is_dom0() {
            return Err(Status::FailureUnknownHypercall);
        }
        match idx {
            VP_EXIT_OP_END_OF_EXIT_IDX => Ok(self.end_of_exit(caller)?),
            VP_EXIT_OP_VMREAD_IDX => {
                self.vmread_hypercall(caller)?;
                Ok(Transfer::Run(caller))
            }
            VP_EXIT_OP_VMWRITE_IDX => {
                self.vmwrite_hypercall(caller)?;
                Ok(Transfer::Run(caller))
            }
            _ => Err(Status::FailureUnknownHypercall),
        }
    }

    fn vp_state_op(&mut self, caller: Vpid, idx: u64) -> HypercallResult<Transfer> {
        match idx {
            VP_STATE_OP_REG_VAL_IDX => {
                self.reg_val(caller)?;
                Ok(Transfer::Run(caller))
            }
            _ => Err(Status::FailureUnknownHypercall),
        }
    }

    /// `reg_val`: reads register `r12` of the vCPU named by `r11` into `r10`.
    ///
    /// A domU may only name its parent.
    fn reg_val(&mut self, caller: Vpid) -> HypercallResult {
        let vcpu = self.vcpu(caller)?;
        let (vpid, reg) = (vcpu.regs().r11, vcpu.regs().r12);
        let is_dom0 = vcpu.is_dom0();
        let parent = self.parent_of(caller)?;

        let target = match vpid {
            VPID_SELF => return Err(Status::InvalidVpidUnsupportedSelf),
            VPID_ANY => return Err(Status::InvalidVpidUnsupportedAny),
            VPID_PARENT if is_dom0 => return Err(Status::InvalidVpidUnsupportedParent),
            VPID_PARENT => parent.ok_or(Status::InvalidVpidUnknown)?,
            vpid if !is_dom0 && parent != Some(vpid) => return Err(Status::FailureUnsupported),
            vpid if self.contains(vpid) => vpid,
            _ => return Err(Status::InvalidVpidUnknown),
        };
        let reg = RegisterId::try_from(reg).map_err(|_| Status::InvalidParams2)?;

        let value = match reg.vmcs_field() {
            Some(field) => self.with_vmcs(target, |vcpu| vcpu.vmread(field))?,
            None => reg.read_gpr(self.vcpu(target)?.regs()),
        };
        let regs = self.vcpu_mut(caller)?.regs_mut();
        regs.r10 = value;
        regs.rax = Status::Success.raw();
        Ok(())
    }

    /// `vmi_op`, which follows the SysV calling convention of the LibVMI driver
    /// instead of the `r11`..`r14` argument registers.
    ///
    /// `translate_v2p` replaces the guest virtual address in `rdi` with its
    /// guest-physical address, walking the caller's own page tables.
    fn vmi_op(&mut self, caller: Vpid, idx: u64) -> HypercallResult<Transfer> {
        if self.vcpu(caller)?.is_dom0() || idx != VMI_OP_TRANSLATE_V2P_IDX {
            return Err(Status::FailureUnknownHypercall);
        }
        let vcpu = self.vcpu_mut(caller)?;
        let gva = vcpu.regs().rdi;
        let gpa = vcpu.gva_to_gpa(gva)?;
        trace!("translate_v2p: {gva:#x} -> {gpa:#x} on {caller:#x}");
        let regs = vcpu.regs_mut();
        regs.rdi = gpa;
        regs.rax = Status::Success.raw();
        Ok(Transfer::Run(caller))
    }

    fn vp_management_op(&mut self, caller: Vpid, idx: u64) -> HypercallResult<Transfer> {
        let pause = match idx {
            VP_MANAGEMENT_OP_PAUSE_VP_IDX => true,
            VP_MANAGEMENT_OP_RESUME_VP_IDX => false,
            _ => return Err(Status::FailureUnknownHypercall),
        };

        let vpid = self.vcpu(caller)?.regs().r11;
        let target = if vpid == VPID_PARENT {
            self.parent_of(caller)?
        } else {
            self.contains(vpid).then_some(vpid)
        };
        let Some(target) = target else {
            warn!("{} vp {vpid:#x} failed", if pause { "pause" } else { "resume" });
            return Err(Status::FailureUnknown);
        };

        let vcpu = self.vcpu_mut(target)?;
        if pause {
            vcpu.pause();
        } else {
            vcpu.resume();
        }
        self.vcpu_mut(caller)?.regs_mut().rax = Status::Success.raw();
        Ok(Transfer::Run(caller))
    }
}
