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

use alloc::collections::BTreeMap;
use core::marker::PhantomData;

use axerrno::{AxResult, ax_err, ax_err_type};

use crate::broker::ExitBroker;
use crate::hal::BrokerHal;
use crate::hypercall::Vpid;
use crate::vcpu::ExitVCpu;

/// Vector of the virtual interrupt announcing an exit event to a kernel listener.
pub const DEFAULT_EXIT_EVENT_VECTOR: u8 = 0xE1;

/// Configuration of a [`VirtContext`].
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Vector injected into kernel-mode listeners when an event arrives.
    pub exit_event_vector: u8,
    /// Initial capacity of every per-reason listener set.
    pub listener_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            exit_event_vector: DEFAULT_EXIT_EVENT_VECTOR,
            listener_capacity: 1,
        }
    }
}

/// The world switch a broker operation asks the VMM to perform.
///
/// Broker operations never run a guest themselves; they leave the hardware
/// context loaded for the vCPU named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Enter `vpid`.
    Run(Vpid),
    /// Hand control back to the scheduler of `parent`. The vCPU that asked for
    /// this has not completed its hypercall and will retry it when it next runs.
    ReturnToParent {
        parent: Vpid,
        /// Run the child again after this many nanoseconds at the latest.
        yield_ns: Option<u64>,
    },
}

struct VCpuSlot<V> {
    vcpu: V,
    broker: ExitBroker,
}

/// The vCPUs visible to the broker, each with its [`ExitBroker`], and the
/// record of whose VMCS is loaded.
///
/// Brokers never hold references to each other: cross-vCPU work always goes
/// through a vpid lookup here.
pub struct VirtContext<V: ExitVCpu, H: BrokerHal> {
    config: BrokerConfig,
    vcpus: BTreeMap<Vpid, VCpuSlot<V>>,
    loaded: Option<Vpid>,
    _hal: PhantomData<H>,
}

impl<V: ExitVCpu, H: BrokerHal> VirtContext<V, H> {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            vcpus: BTreeMap::new(),
            loaded: None,
            _hal: PhantomData,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Registers a vCPU and creates its broker.
    pub fn add_vcpu(&mut self, vcpu: V) -> AxResult {
        let vpid = vcpu.id();
        if self.vcpus.contains_key(&vpid) {
            return ax_err!(AlreadyExists, "vcpu already registered");
        }
        let broker = ExitBroker::new(vpid, self.config.listener_capacity);
        self.vcpus.insert(vpid, VCpuSlot { vcpu, broker });
        debug!("[broker] vcpu {vpid:#x} registered");
        Ok(())
    }

    /// Unregisters a vCPU, handing it back to the caller.
    pub fn remove_vcpu(&mut self, vpid: Vpid) -> AxResult<V> {
        let slot = self
            .vcpus
            .remove(&vpid)
            .ok_or_else(|| ax_err_type!(NotFound, "unknown vpid"))?;
        if self.loaded == Some(vpid) {
            self.loaded = None;
        }
        if !slot.broker.pending().is_empty() {
            warn!("[broker] vcpu {vpid:#x} removed with an exit event pending");
        }
        Ok(slot.vcpu)
    }

    pub fn contains(&self, vpid: Vpid) -> bool {
        self.vcpus.contains_key(&vpid)
    }

    pub fn vcpu(&self, vpid: Vpid) -> AxResult<&V> {
        self.slot(vpid).map(|s| &s.vcpu)
    }

    pub fn vcpu_mut(&mut self, vpid: Vpid) -> AxResult<&mut V> {
        self.slot_mut(vpid).map(|s| &mut s.vcpu)
    }

    pub fn broker(&self, vpid: Vpid) -> AxResult<&ExitBroker> {
        self.slot(vpid).map(|s| &s.broker)
    }

    pub fn broker_mut(&mut self, vpid: Vpid) -> AxResult<&mut ExitBroker> {
        self.slot_mut(vpid).map(|s| &mut s.broker)
    }

    /// The parent of `vpid`, if it has one registered here.
    pub fn parent_of(&self, vpid: Vpid) -> AxResult<Option<Vpid>> {
        Ok(self
            .vcpu(vpid)?
            .parent_id()
            .filter(|parent| self.contains(*parent)))
    }

    /// The vCPU whose VMCS is currently loaded.
    pub fn loaded(&self) -> Option<Vpid> {
        self.loaded
    }

    /// Loads the VMCS of `vpid`, leaving it loaded.
    pub fn load(&mut self, vpid: Vpid) -> AxResult {
        self.vcpu_mut(vpid)?.load()?;
        self.loaded = Some(vpid);
        Ok(())
    }

    /// Runs `f` with the VMCS of `target` loaded, then reloads whatever was
    /// loaded before.
    ///
    /// This is the only way the broker touches VMCS fields of a vCPU, so a
    /// field access can never land on the wrong vCPU after a forgotten switch.
    pub fn with_vmcs<T, F>(&mut self, target: Vpid, f: F) -> AxResult<T>
    where
        F: FnOnce(&mut V) -> AxResult<T>,
    {
        let previous = self.loaded;
        if previous != Some(target) {
            self.load(target)?;
        }

        let result = f(self.vcpu_mut(target)?);

        if let Some(previous) = previous.filter(|p| *p != target) {
            // The previous owner may have been removed in the meantime.
            if self.contains(previous) {
                self.load(previous)?;
            } else {
                self.loaded = None;
            }
        }
        result
    }

    fn slot(&self, vpid: Vpid) -> AxResult<&VCpuSlot<V>> {
        self.vcpus
            .get(&vpid)
            .ok_or_else(|| ax_err_type!(NotFound, "unknown vpid"))
    }

    fn slot_mut(&mut self, vpid: Vpid) -> AxResult<&mut VCpuSlot<V>> {
        self.vcpus
            .get_mut(&vpid)
            .ok_or_else(|| ax_err_type!(NotFound, "unknown vpid"))
    }
}
