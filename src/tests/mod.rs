//! Unit tests for the exit broker.
//!
//! The broker is driven against [`MockVCpu`], which keeps its VMCS in a field
//! map that refuses any access while another vCPU is loaded, and records the
//! scheduling calls it receives in a shared call log.

mod general_registers;
mod vmcall;

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use axerrno::{AxResult, ax_err};

use crate::context::{BrokerConfig, Transfer, VirtContext};
use crate::hal::BrokerHal;
use crate::hypercall::{VP_EXIT_OP, Vpid, hypercall};
use crate::regs::GeneralRegisters;
use crate::vcpu::{DomainKind, ExitVCpu};
use crate::vmx::fields;

/// The introspected vCPU, in dom0.
pub(crate) const TARGET: Vpid = 1;
/// A listener in a domU whose parent is [`TARGET`].
pub(crate) const LISTENER: Vpid = 5;
/// A second listener of [`TARGET`].
pub(crate) const LISTENER2: Vpid = 6;

pub(crate) const START_RIP: u64 = 0x1000;
pub(crate) const INSTRUCTION_LEN: u64 = 3;
/// Guest-physical addresses of the mock are guest-virtual ones plus this.
pub(crate) const GPA_OFFSET: u64 = 0x8000_0000;

pub(crate) type CallLog = Rc<RefCell<Vec<String>>>;

thread_local! {
    static NOW: Cell<u64> = const { Cell::new(0) };
}

pub(crate) struct MockHal;

impl MockHal {
    pub(crate) fn set_time(nanos: u64) {
        NOW.with(|now| now.set(nanos));
    }
}

impl BrokerHal for MockHal {
    fn current_time_nanos() -> u64 {
        NOW.with(|now| now.get())
    }
}

#[derive(Debug)]
pub(crate) struct MockVCpu {
    id: Vpid,
    domain: DomainKind,
    parent: Option<Vpid>,
    regs: GeneralRegisters,
    vmcs: BTreeMap<u32, u64>,
    pub paused: bool,
    pub translation_unsupported: bool,
    loaded: Rc<Cell<Option<Vpid>>>,
    call_log: CallLog,
}

impl MockVCpu {
    pub(crate) fn field(&self, field: u32) -> u64 {
        self.vmcs.get(&field).copied().unwrap_or(0)
    }

    pub(crate) fn set_field(&mut self, field: u32, value: u64) {
        self.vmcs.insert(field, value);
    }

    fn check_loaded(&self) -> AxResult {
        if self.loaded.get() != Some(self.id) {
            return ax_err!(BadState, "VMCS of another vcpu is loaded");
        }
        Ok(())
    }

    fn log(&self, call: String) {
        self.call_log.borrow_mut().push(call);
    }
}

impl ExitVCpu for MockVCpu {
    fn id(&self) -> Vpid {
        self.id
    }

    fn domain(&self) -> DomainKind {
        self.domain
    }

    fn parent_id(&self) -> Option<Vpid> {
        self.parent
    }

    fn regs(&self) -> &GeneralRegisters {
        &self.regs
    }

    fn regs_mut(&mut self) -> &mut GeneralRegisters {
        &mut self.regs
    }

    fn load(&mut self) -> AxResult {
        self.loaded.set(Some(self.id));
        Ok(())
    }

    fn vmread(&self, field: u32) -> AxResult<u64> {
        self.check_loaded()?;
        Ok(self.field(field))
    }

    fn vmwrite(&mut self, field: u32, value: u64) -> AxResult {
        self.check_loaded()?;
        self.set_field(field, value);
        Ok(())
    }

    fn advance(&mut self) -> AxResult {
        self.check_loaded()?;
        let rip = self.field(fields::RIP);
        self.set_field(fields::RIP, rip + INSTRUCTION_LEN);
        self.log(format!("advance({})", self.id));
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
        self.log(format!("pause({})", self.id));
    }

    fn resume(&mut self) {
        self.paused = false;
        self.log(format!("resume({})", self.id));
    }

    fn queue_virtual_interrupt(&mut self, vector: u8) -> AxResult {
        self.check_loaded()?;
        self.log(format!("virq({}, {vector:#x})", self.id));
        Ok(())
    }

    fn gva_to_gpa(&self, gva: u64) -> AxResult<u64> {
        if self.translation_unsupported {
            return ax_err!(Unsupported, "cross-domain translation");
        }
        Ok(gva + GPA_OFFSET)
    }
}

pub(crate) struct TestBed {
    pub ctx: VirtContext<MockVCpu, MockHal>,
    pub call_log: CallLog,
    loaded: Rc<Cell<Option<Vpid>>>,
}

impl TestBed {
    pub(crate) fn new() -> Self {
        MockHal::set_time(0);
        Self {
            ctx: VirtContext::new(BrokerConfig::default()),
            call_log: Rc::new(RefCell::new(Vec::new())),
            loaded: Rc::new(Cell::new(None)),
        }
    }

    pub(crate) fn mock(&self, id: Vpid, domain: DomainKind, parent: Option<Vpid>) -> MockVCpu {
        let mut vmcs = BTreeMap::new();
        vmcs.insert(fields::RIP, START_RIP);
        MockVCpu {
            id,
            domain,
            parent,
            regs: GeneralRegisters::default(),
            vmcs,
            paused: false,
            translation_unsupported: false,
            loaded: self.loaded.clone(),
            call_log: self.call_log.clone(),
        }
    }

    pub(crate) fn add(&mut self, id: Vpid, domain: DomainKind, parent: Option<Vpid>) {
        let vcpu = self.mock(id, domain, parent);
        self.ctx.add_vcpu(vcpu).unwrap();
    }

    /// A dom0 target and a domU listener running as its child.
    pub(crate) fn with_listener() -> Self {
        let mut bed = Self::new();
        bed.add(TARGET, DomainKind::Dom0, None);
        bed.add(LISTENER, DomainKind::DomU, Some(TARGET));
        bed
    }

    pub(crate) fn vcpu(&self, id: Vpid) -> &MockVCpu {
        self.ctx.vcpu(id).unwrap()
    }

    pub(crate) fn vcpu_mut(&mut self, id: Vpid) -> &mut MockVCpu {
        self.ctx.vcpu_mut(id).unwrap()
    }

    pub(crate) fn rip(&self, id: Vpid) -> u64 {
        self.vcpu(id).field(fields::RIP)
    }

    /// The vCPU whose VMCS the mock hardware holds.
    pub(crate) fn hw_loaded(&self) -> Option<Vpid> {
        self.loaded.get()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.call_log.borrow().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.call_log.borrow_mut().clear();
    }

    /// Loads `id`, as the VMM does before handing the broker one of its exits.
    pub(crate) fn enter(&mut self, id: Vpid) {
        self.ctx.load(id).unwrap();
    }

    /// Sets the privilege level `id` runs at, through its `CS` selector.
    pub(crate) fn set_cpl(&mut self, id: Vpid, cpl: u8) {
        self.vcpu_mut(id).set_field(fields::CS_SELECTOR, u64::from(cpl));
    }

    /// Places a hypercall in the registers of `id`.
    pub(crate) fn set_call(&mut self, id: Vpid, rax: u64, r11: u64, r12: u64, r13: u64, r14: u64) {
        let regs = self.vcpu_mut(id).regs_mut();
        regs.rax = rax;
        regs.r11 = r11;
        regs.r12 = r12;
        regs.r13 = r13;
        regs.r14 = r14;
    }

    /// Runs the hypercall sitting in the registers of `id`.
    pub(crate) fn hypercall(&mut self, id: Vpid) -> Transfer {
        self.enter(id);
        self.ctx.handle_hypercall(id).unwrap().unwrap()
    }

    pub(crate) fn rax(&self, id: Vpid) -> u64 {
        self.vcpu(id).regs().rax
    }
}

/// `rax` of a `vp_exit_op` hypercall.
pub(crate) const fn exit_op(index: u64) -> u64 {
    hypercall(VP_EXIT_OP, index)
}
