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

//! Per-vCPU mapping from exit reason to the vCPUs listening for it.

use alloc::vec::Vec;

use crate::exit::{EXIT_REASON_MAX, ExitReasonId};
use crate::hypercall::Vpid;

/// The listeners of one exit reason, in registration order, with the
/// round-robin cursor used when a listener declines an event.
///
/// The cursor always points at a member of the set, or is `None` when the set
/// is empty.
#[derive(Debug, Default, Clone)]
pub struct ListenerSet {
    vpids: Vec<Vpid>,
    cursor: Option<usize>,
}

impl ListenerSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vpids: Vec::with_capacity(capacity),
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.vpids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vpids.is_empty()
    }

    pub fn contains(&self, vpid: Vpid) -> bool {
        self.vpids.contains(&vpid)
    }

    /// Listeners in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = Vpid> + '_ {
        self.vpids.iter().copied()
    }

    /// The listener the cursor points at.
    pub fn current(&self) -> Option<Vpid> {
        self.cursor.map(|i| self.vpids[i])
    }

    /// Adds `vpid`, returning `false` if it is already a member.
    pub fn insert(&mut self, vpid: Vpid) -> bool {
        if self.contains(vpid) {
            return false;
        }
        self.vpids.push(vpid);
        self.cursor = Some(0);
        true
    }

    /// Removes `vpid`, returning `false` if it was not a member.
    pub fn remove(&mut self, vpid: Vpid) -> bool {
        let Some(pos) = self.vpids.iter().position(|&v| v == vpid) else {
            return false;
        };
        self.vpids.remove(pos);
        self.rewind();
        true
    }

    /// Moves the cursor to the first listener and returns it.
    pub fn first(&mut self) -> Option<Vpid> {
        self.rewind();
        self.current()
    }

    /// Moves the cursor to the listener after the current one.
    ///
    /// Returns `None` once every listener has been tried, rewinding the cursor
    /// so it keeps pointing at a member.
    pub fn advance(&mut self) -> Option<Vpid> {
        let next = self.cursor.map_or(0, |i| i + 1);
        if next < self.vpids.len() {
            self.cursor = Some(next);
            self.current()
        } else {
            self.rewind();
            None
        }
    }

    fn rewind(&mut self) {
        self.cursor = if self.vpids.is_empty() { None } else { Some(0) };
    }
}

/// The listener sets of every exit reason of one vCPU.
#[derive(Debug, Clone)]
pub struct ExitRegistry {
    sets: [ListenerSet; EXIT_REASON_MAX],
}

impl Default for ExitRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ExitRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sets: core::array::from_fn(|_| ListenerSet::with_capacity(capacity)),
        }
    }

    pub fn listeners(&self, reason: ExitReasonId) -> &ListenerSet {
        &self.sets[reason.index()]
    }

    pub fn listeners_mut(&mut self, reason: ExitReasonId) -> &mut ListenerSet {
        &mut self.sets[reason.index()]
    }

    /// Registers `vpid` as a listener of `reason`.
    ///
    /// Listening for [`ExitReasonId::EptReadViolation`] registers all three EPT
    /// violation sub-reasons, all or nothing: if any of them already has `vpid`,
    /// the ones added by this call are removed again and `false` is returned.
    pub fn add_listener(&mut self, reason: ExitReasonId, vpid: Vpid) -> bool {
        if reason != ExitReasonId::EptReadViolation {
            return self.insert(reason, vpid);
        }

        for (added, sub) in ExitReasonId::EPT_VIOLATIONS.into_iter().enumerate() {
            if !self.insert(sub, vpid) {
                for rollback in &ExitReasonId::EPT_VIOLATIONS[..added] {
                    self.listeners_mut(*rollback).remove(vpid);
                }
                return false;
            }
        }
        true
    }

    /// Deregisters `vpid` from `reason`.
    ///
    /// Like [`ExitRegistry::add_listener`], [`ExitReasonId::EptReadViolation`]
    /// stands for all three EPT violation sub-reasons.
    pub fn remove_listener(&mut self, reason: ExitReasonId, vpid: Vpid) -> bool {
        if !self.listeners_mut(reason).remove(vpid) {
            debug!("remove_listener: vpid {vpid:#x} is not listening for {reason:?}");
            return false;
        }
        if reason == ExitReasonId::EptReadViolation {
            for sub in &ExitReasonId::EPT_VIOLATIONS[1..] {
                self.listeners_mut(*sub).remove(vpid);
            }
        }
        true
    }

    /// Rewinds the cursor of `reason` and returns the first listener.
    pub fn first_listener(&mut self, reason: ExitReasonId) -> Option<Vpid> {
        self.listeners_mut(reason).first()
    }

    /// Advances the cursor of `reason` to the next listener in line.
    pub fn next_listener(&mut self, reason: ExitReasonId) -> Option<Vpid> {
        self.listeners_mut(reason).advance()
    }

    fn insert(&mut self, reason: ExitReasonId, vpid: Vpid) -> bool {
        let inserted = self.listeners_mut(reason).insert(vpid);
        if !inserted {
            debug!("add_listener: vpid {vpid:#x} is already listening for {reason:?}");
        }
        inserted
    }
}
