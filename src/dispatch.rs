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
use crate::exit::ExitEvent;
use crate::hal::BrokerHal;
use crate::hypercall::Vpid;
use crate::vcpu::ExitVCpu;
use crate::vmx::VmControl;

impl<V: ExitVCpu, H: BrokerHal> VirtContext<V, H> {
    /// Hands `event` to the first listener of its reason on the origin vCPU.
    ///
    /// The origin is paused until a listener releases it. Returns `Ok(None)`
    /// when nobody listens, in which case the caller must fall back.
    pub fn notify_exit(&mut self, event: ExitEvent) -> AxResult<Option<Transfer>> {
        let origin = event.origin;
        let Some(listener) = self
            .broker_mut(origin)?
            .registry_mut()
            .first_listener(event.reason)
        else {
            return Ok(None);
        };
        if !self.contains(listener) {
            warn!("notify_exit: listener {listener:#x} of {:?} is gone", event.reason);
            return Ok(None);
        }

        debug!("notify_exit: pausing vcpu {origin:#x}");
        self.vcpu_mut(origin)?.pause();
        self.inject_exit_and_run(listener, event).map(Some)
    }

    /// Hands `event` to the listener after the one that just declined it.
    ///
    /// Returns `Ok(None)` once every listener of the reason has seen the event.
    pub fn notify_next(&mut self, event: ExitEvent) -> AxResult<Option<Transfer>> {
        let Some(listener) = self
            .broker_mut(event.origin)?
            .registry_mut()
            .next_listener(event.reason)
        else {
            info!("notify_next: {:?} unhandled by listeners", event.reason);
            return Ok(None);
        };
        if !self.contains(listener) {
            warn!("notify_next: listener {listener:#x} of {:?} is gone", event.reason);
            return Ok(None);
        }
        self.inject_exit_and_run(listener, event).map(Some)
    }

    /// Queues `event` on `listener` and switches to it.
    ///
    /// A kernel listener gets the exit-event interrupt; a user-mode one simply
    /// runs again and finds the event with its retried `next_exit`.
    pub fn inject_exit_and_run(&mut self, listener: Vpid, event: ExitEvent) -> AxResult<Transfer> {
        let broker = self.broker_mut(listener)?;
        let pending = broker.pending_mut().push(event);
        if pending > 1 {
            // Exits are serial per vCPU, so a second event means a listener
            // never answered the first one.
            error!("inject_exit_and_run: {pending} pending events on listener {listener:#x}");
            broker.pending_mut().pop_latest();
            return self.fallback_and_resume(event);
        }
        broker.clear_deadline();
        let kernel = broker.is_kernel_listener();

        self.load(listener)?;
        if kernel {
            debug!("inject_exit_and_run: injecting virtual interrupt into {listener:#x}");
            let vector = self.config().exit_event_vector;
            self.vcpu_mut(listener)?.queue_virtual_interrupt(vector)?;
        } else {
            debug!("inject_exit_and_run: resuming {listener:#x}");
        }
        Ok(Transfer::Run(listener))
    }

    /// Lets `origin` run again once a listener has dealt with its exit.
    pub fn listener_handled_exit(&mut self, origin: Vpid, advance: bool) -> AxResult<Transfer> {
        self.load(origin)?;
        let vcpu = self.vcpu_mut(origin)?;
        if advance {
            vcpu.advance()?;
        } else {
            debug!("listener_handled_exit: not advancing {origin:#x}");
        }
        vcpu.resume();
        Ok(Transfer::Run(origin))
    }

    /// Default handling of an event no listener will take: the control behind
    /// its reason runs its fallback and is switched off, then the origin runs.
    pub(crate) fn fallback_and_resume(&mut self, event: ExitEvent) -> AxResult<Transfer> {
        let origin = event.origin;
        self.load(origin)?;
        let vcpu = self.vcpu_mut(origin)?;
        if let Some(control) = VmControl::for_exit(event.reason) {
            warn!("{:?} on {origin:#x}: falling back to {}", event.reason, control.name);
            control.run_fallback(vcpu)?;
            control.disable(vcpu)?;
        }
        vcpu.resume();
        Ok(Transfer::Run(origin))
    }
}
