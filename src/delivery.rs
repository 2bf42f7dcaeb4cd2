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

//! The `next_exit` / `end_of_exit` protocol a listener drives.

use axerrno::{AxResult, ax_err, ax_err_type};

use crate::broker::NO_TIMEOUT;
use crate::context::{Transfer, VirtContext};
use crate::exit::{ExitEvent, ExitReasonId};
use crate::hal::BrokerHal;
use crate::hypercall::{EndOfExitFlags, NextExitFlags, Status, Vpid};
use crate::vcpu::ExitVCpu;

impl<V: ExitVCpu, H: BrokerHal> VirtContext<V, H> {
    /// `next_exit` of `caller`, whose hypercall has not been advanced yet.
    ///
    /// A kernel listener always finds the event announced by the exit-event
    /// interrupt. A user-mode listener with nothing pending goes back to its
    /// parent without completing the call, optionally recording a deadline;
    /// retrying after that deadline reports a single `Timeout` exit.
    pub fn next_exit(&mut self, caller: Vpid) -> AxResult<Transfer> {
        if self.broker(caller)?.is_kernel_listener() {
            return self.next_exit_kernel(caller);
        }

        let broker = self.broker_mut(caller)?;
        if let Some(event) = broker.pending_event() {
            broker.clear_deadline();
            debug!("next_exit: notifying {:?} to {caller:#x}", event.reason);
            return self.report_event(caller, event);
        }

        let now = H::current_time_nanos();
        match broker.deadline() {
            Some(deadline) if now >= deadline => {
                broker.clear_deadline();
                debug!("next_exit: timeout on {caller:#x}");
                let vcpu = self.vcpu_mut(caller)?;
                vcpu.regs_mut().r11 = ExitReasonId::Timeout.raw();
                vcpu.advance()?;
                vcpu.regs_mut().rax = Status::Success.raw();
                Ok(Transfer::Run(caller))
            }
            Some(deadline) => self.return_to_parent(caller, Some(deadline - now)),
            None => {
                let timeout = NextExitFlags::timeout_nanos(self.vcpu(caller)?.regs().r11);
                if let Some(ns) = timeout {
                    let deadline = now.saturating_add(ns).min(NO_TIMEOUT - 1);
                    self.broker_mut(caller)?.set_deadline(deadline);
                }
                debug!("next_exit: no pending events for {caller:#x}");
                self.return_to_parent(caller, timeout)
            }
        }
    }

    fn next_exit_kernel(&mut self, caller: Vpid) -> AxResult<Transfer> {
        let Some(event) = self.broker(caller)?.pending_event() else {
            error!("next_exit: kernel listener {caller:#x} asked for an exit event but none is pending");
            return ax_err!(BadState, "no pending exit event");
        };
        self.report_event(caller, event)
    }

    fn report_event(&mut self, caller: Vpid, event: ExitEvent) -> AxResult<Transfer> {
        let vcpu = self.vcpu_mut(caller)?;
        let regs = vcpu.regs_mut();
        regs.r10 = event.origin;
        regs.r11 = event.reason.raw();
        regs.r12 = event.data0;
        regs.r13 = event.data1;
        vcpu.advance()?;
        vcpu.regs_mut().rax = Status::Success.raw();
        Ok(Transfer::Run(caller))
    }

    fn return_to_parent(&mut self, caller: Vpid, yield_ns: Option<u64>) -> AxResult<Transfer> {
        let parent = self
            .parent_of(caller)?
            .ok_or_else(|| ax_err_type!(BadState, "listener has no parent to return to"))?;
        self.load(parent)?;
        Ok(Transfer::ReturnToParent { parent, yield_ns })
    }

    /// `end_of_exit` of `caller`, already advanced past its hypercall.
    ///
    /// Pops the event in flight. A handled event releases its origin; an
    /// unhandled one goes to the next listener, or to the default handling of
    /// its reason when every listener declined it.
    pub fn end_of_exit(&mut self, caller: Vpid) -> AxResult<Transfer> {
        let flags = EndOfExitFlags::from_bits_truncate(self.vcpu(caller)?.regs().r11);

        let Some(event) = self.broker(caller)?.pending_event() else {
            warn!("end_of_exit: no pending event on {caller:#x}");
            return ax_err!(BadState, "end_of_exit without a pending event");
        };
        self.broker_mut(caller)?.pending_mut().pop();
        if !self.contains(event.origin) {
            warn!("end_of_exit: dropping event of vanished vcpu {:#x}", event.origin);
            return ax_err!(NotFound, "origin of the pending event is gone");
        }
        self.vcpu_mut(caller)?.regs_mut().rax = Status::Success.raw();

        if flags.contains(EndOfExitFlags::HANDLED) {
            debug!("end_of_exit: {:?} handled by {caller:#x}", event.reason);
            self.listener_handled_exit(event.origin, flags.contains(EndOfExitFlags::ADVANCE))
        } else {
            debug!("end_of_exit: {caller:#x} declined {:?}, trying next listener", event.reason);
            match self.notify_next(event)? {
                Some(transfer) => Ok(transfer),
                None => self.fallback_and_resume(event),
            }
        }
    }
}
