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

use crate::hypercall::Vpid;
use crate::regs::GeneralRegisters;
use crate::vmx::fields;

/// The kind of virtual machine a vCPU belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    /// The privileged root domain.
    Dom0,
    /// An unprivileged guest, e.g. an introspector.
    DomU,
}

/// What the broker needs from a vCPU owned by the embedding VMM.
///
/// VMCS accessors ([`ExitVCpu::vmread`], [`ExitVCpu::vmwrite`],
/// [`ExitVCpu::advance`]) act on the hardware context and are only valid while
/// this vCPU is the loaded one; go through [`crate::VirtContext::with_vmcs`]
/// to get there. The general-purpose register file is always accessible.
pub trait ExitVCpu {
    /// The vpid of this vCPU.
    fn id(&self) -> Vpid;

    /// The kind of domain this vCPU belongs to.
    fn domain(&self) -> DomainKind;

    /// The vCPU that runs this one, if any.
    fn parent_id(&self) -> Option<Vpid>;

    /// Guest general-purpose registers.
    fn regs(&self) -> &GeneralRegisters;

    /// Mutable reference of guest general-purpose registers.
    fn regs_mut(&mut self) -> &mut GeneralRegisters;

    /// Makes this vCPU's VMCS the current one on this physical CPU.
    fn load(&mut self) -> AxResult;

    /// Reads a field of the loaded VMCS.
    fn vmread(&self, field: u32) -> AxResult<u64>;

    /// Writes a field of the loaded VMCS.
    fn vmwrite(&mut self, field: u32, value: u64) -> AxResult;

    /// Advances guest `RIP` past the instruction that caused the last exit.
    fn advance(&mut self) -> AxResult;

    /// Keeps the scheduler from running this vCPU.
    fn pause(&mut self);

    /// Lets the scheduler run this vCPU again.
    fn resume(&mut self);

    /// Queues a virtual interrupt, injected at the next VM entry.
    fn queue_virtual_interrupt(&mut self, vector: u8) -> AxResult;

    /// Translates a guest virtual address through the guest page tables.
    fn gva_to_gpa(&self, gva: u64) -> AxResult<u64>;

    fn is_dom0(&self) -> bool {
        self.domain() == DomainKind::Dom0
    }

    fn is_domu(&self) -> bool {
        self.domain() == DomainKind::DomU
    }

    /// Guest rip. (`RIP`)
    fn rip(&self) -> AxResult<u64> {
        self.vmread(fields::RIP)
    }

    /// Guest stack pointer. (`RSP`)
    fn stack_pointer(&self) -> AxResult<u64> {
        self.vmread(fields::RSP)
    }

    /// Guest cs. (`CS`)
    fn cs_selector(&self) -> AxResult<u16> {
        Ok(self.vmread(fields::CS_SELECTOR)? as u16)
    }

    /// Current privilege level, taken from the RPL of the `CS` selector.
    fn cpl(&self) -> AxResult<u8> {
        Ok((self.cs_selector()? & 0x3) as u8)
    }

    fn cr3(&self) -> AxResult<u64> {
        self.vmread(fields::CR3)
    }
}
