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

use crate::context::VirtContext;
use crate::hal::BrokerHal;
use crate::hypercall::{HypercallResult, Status, VPID_PARENT, VPID_SELF, Vpid};
use crate::vcpu::ExitVCpu;
use crate::vmx::{ControlField, VmControl};

impl<V: ExitVCpu, H: BrokerHal> VirtContext<V, H> {
    /// Turns the exit controls selected by `r14` of `caller` on or off on
    /// `target`, taking the new bit values from `r13`.
    ///
    /// Every enabled control makes `caller` a listener of its exit on
    /// `target`, every disabled one removes it. Returns the previous value of
    /// the control field.
    ///
    /// Bits are processed from the lowest up and a failure stops the loop,
    /// leaving the bits handled so far in place.
    pub fn control_exiting(
        &mut self,
        caller: Vpid,
        target: Vpid,
        field: ControlField,
    ) -> HypercallResult<u64> {
        let regs = self.vcpu(caller)?.regs();
        let (mask, value) = (regs.r14, regs.r13);

        let denied = mask & !field.allowance_mask();
        if denied != 0 {
            for bit in (0..u64::BITS).filter(|bit| denied & (1 << bit) != 0) {
                warn!("control_exiting: bit {bit} of {field:?} may not be changed");
            }
            return Err(Status::InvalidParams4);
        }

        let old_value = self.with_vmcs(target, |vcpu| vcpu.vmread(field.encoding()))?;

        for bit in (0..u64::BITS).filter(|bit| mask & (1 << bit) != 0) {
            let control = field
                .control_for_bit(bit)
                .ok_or(Status::InvalidParams4)?;
            if value & (1 << bit) != 0 {
                self.with_vmcs(target, |vcpu| control.enable(vcpu))?;
                debug!("control_exiting: enable {} on {target:#x}", control.name);
                if !self.broker_mut(target)?.add_listener(control.exit, caller) {
                    return Err(Status::InvalidExitAlreadyListening);
                }
            } else {
                self.with_vmcs(target, |vcpu| control.disable(vcpu))?;
                debug!("control_exiting: disable {} on {target:#x}", control.name);
                self.resolve_pending(caller, target, control)?;
                if !self.broker_mut(target)?.remove_listener(control.exit, caller) {
                    return Err(Status::InvalidExitNoListener);
                }
            }
        }

        Ok(old_value)
    }

    /// Releases an event of `control` from `target` still waiting on
    /// `caller`, so that turning the control off never strands `target`.
    ///
    /// Events from other targets stay pending: their controls are untouched.
    fn resolve_pending(
        &mut self,
        caller: Vpid,
        target: Vpid,
        control: &VmControl,
    ) -> HypercallResult {
        let Some(event) = self.broker(caller)?.pending_event() else {
            return Ok(());
        };
        if event.origin != target || !control.covers(event.reason) {
            return Ok(());
        }

        self.broker_mut(caller)?.pending_mut().pop();
        warn!(
            "control_exiting: {:?} of {:#x} was still pending, running its default handler",
            event.reason, event.origin
        );
        self.with_vmcs(event.origin, |origin| {
            control.run_fallback(origin)?;
            origin.resume();
            Ok(())
        })?;
        Ok(())
    }

    /// Resolves the vpid a `vmread`/`vmwrite` of `caller` targets.
    fn exit_op_target(&self, caller: Vpid, vpid: Vpid) -> HypercallResult<Vpid> {
        match vpid {
            VPID_SELF => Err(Status::InvalidParams1),
            VPID_PARENT => self.parent_of(caller)?.ok_or(Status::InvalidParams1),
            vpid if self.contains(vpid) => Ok(vpid),
            _ => Err(Status::InvalidParams1),
        }
    }

    /// `vmread`: reads field `r12` of the vCPU named by `r11` into `r10`.
    pub fn vmread_hypercall(&mut self, caller: Vpid) -> HypercallResult {
        let regs = self.vcpu(caller)?.regs();
        let (vpid, field) = (regs.r11, regs.r12);
        let target = self.exit_op_target(caller, vpid)?;
        let field = u32::try_from(field).map_err(|_| Status::InvalidParams2)?;

        let value = self.with_vmcs(target, |vcpu| vcpu.vmread(field))?;
        let regs = self.vcpu_mut(caller)?.regs_mut();
        regs.r10 = value;
        regs.rax = Status::Success.raw();
        Ok(())
    }

    /// `vmwrite`: changes the exit controls of the vCPU named by `r11`.
    ///
    /// Only the primary and secondary processor-based execution controls can be
    /// written, through [`VirtContext::control_exiting`]. The previous field
    /// value is returned in `r10`.
    pub fn vmwrite_hypercall(&mut self, caller: Vpid) -> HypercallResult {
        let cpl = self.vcpu(caller)?.cpl()?;
        self.broker_mut(caller)?.set_cpl(cpl);

        let regs = self.vcpu(caller)?.regs();
        let (vpid, field) = (regs.r11, regs.r12);
        let target = self.exit_op_target(caller, vpid)?;
        let Some(field) = ControlField::from_encoding(field) else {
            warn!("vmwrite: unhandled field {field:#x}");
            return Err(Status::InvalidParams2);
        };

        let old_value = self.control_exiting(caller, target, field).inspect_err(|status| {
            debug!("vmwrite: {field:?} exiting failed with {status:?}");
        })?;
        let regs = self.vcpu_mut(caller)?.regs_mut();
        regs.r10 = old_value;
        regs.rax = Status::Success.raw();
        Ok(())
    }
}
