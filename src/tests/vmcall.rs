use axerrno::AxError;

use super::*;
use crate::context::Transfer;
use crate::hypercall::{
    NextExitFlags, RegisterId, Status, VP_EXIT_OP_NEXT_EXIT_IDX, VP_MANAGEMENT_OP,
    VP_MANAGEMENT_OP_PAUSE_VP_IDX, VP_MANAGEMENT_OP_RESUME_VP_IDX, VP_STATE_OP,
    VP_STATE_OP_REG_VAL_IDX, VPID_ANY, VPID_PARENT, VPID_SELF, VMI_OP, VMI_OP_TRANSLATE_V2P_IDX,
    hypercall, index, opcode,
};

const REG_VAL: u64 = hypercall(VP_STATE_OP, VP_STATE_OP_REG_VAL_IDX);
const PAUSE_VP: u64 = hypercall(VP_MANAGEMENT_OP, VP_MANAGEMENT_OP_PAUSE_VP_IDX);
const RESUME_VP: u64 = hypercall(VP_MANAGEMENT_OP, VP_MANAGEMENT_OP_RESUME_VP_IDX);
const TRANSLATE_V2P: u64 = hypercall(VMI_OP, VMI_OP_TRANSLATE_V2P_IDX);

fn reg_val(bed: &mut TestBed, caller: Vpid, vpid: Vpid, reg: u64) -> u64 {
    bed.set_call(caller, REG_VAL, vpid, reg, 0, 0);
    assert_eq!(bed.hypercall(caller), Transfer::Run(caller));
    bed.rax(caller)
}

#[test]
fn test_hypercall_encoding() {
    let rax = hypercall(VP_STATE_OP, VP_STATE_OP_REG_VAL_IDX);
    assert_eq!(rax, 0x0005_0000);
    assert_eq!(opcode(rax), VP_STATE_OP);
    assert_eq!(index(rax), VP_STATE_OP_REG_VAL_IDX);
    assert_eq!(opcode(exit_op(3) | 0xffff_0000_0000), VP_EXIT_OP);
    assert_eq!(index(exit_op(3)), 3);
}

#[test]
fn test_next_exit_timeout_flags() {
    assert_eq!(NextExitFlags::timeout_nanos(0), None);
    assert_eq!(NextExitFlags::timeout_nanos(10 << 32), None);
    assert_eq!(NextExitFlags::timeout_nanos(1), Some(0));
    assert_eq!(NextExitFlags::timeout_nanos(10 << 32 | 1), Some(10_000_000));
}

#[test]
fn test_reg_val_reads_parent_registers() {
    let mut bed = TestBed::with_listener();
    bed.vcpu_mut(TARGET).regs_mut().rbx = 0x77;
    bed.vcpu_mut(TARGET).regs_mut().r15 = 0x15;
    bed.vcpu_mut(TARGET).set_field(fields::CR3, 0x3000);
    bed.vcpu_mut(TARGET).set_field(fields::CS_SELECTOR, 0x10);

    assert_eq!(reg_val(&mut bed, LISTENER, VPID_PARENT, RegisterId::Rbx.into()), 0);
    assert_eq!(bed.vcpu(LISTENER).regs().r10, 0x77);

    reg_val(&mut bed, LISTENER, TARGET, RegisterId::R15.into());
    assert_eq!(bed.vcpu(LISTENER).regs().r10, 0x15);

    reg_val(&mut bed, LISTENER, VPID_PARENT, RegisterId::Cr3.into());
    assert_eq!(bed.vcpu(LISTENER).regs().r10, 0x3000);
    assert_eq!(bed.hw_loaded(), Some(LISTENER));

    reg_val(&mut bed, LISTENER, VPID_PARENT, RegisterId::Rip.into());
    assert_eq!(bed.vcpu(LISTENER).regs().r10, START_RIP);

    reg_val(&mut bed, LISTENER, VPID_PARENT, RegisterId::Cs.into());
    assert_eq!(bed.vcpu(LISTENER).regs().r10, 0x10);
}

#[test]
fn test_reg_val_rejects_targets() {
    let mut bed = TestBed::with_listener();
    bed.add(LISTENER2, DomainKind::DomU, Some(TARGET));
    let rax = RegisterId::Rax.into();

    assert_eq!(
        reg_val(&mut bed, LISTENER, VPID_SELF, rax),
        Status::InvalidVpidUnsupportedSelf.raw()
    );
    assert_eq!(
        reg_val(&mut bed, LISTENER, VPID_ANY, rax),
        Status::InvalidVpidUnsupportedAny.raw()
    );
    assert_eq!(
        reg_val(&mut bed, LISTENER, LISTENER2, rax),
        Status::FailureUnsupported.raw()
    );
    assert_eq!(
        reg_val(&mut bed, TARGET, VPID_PARENT, rax),
        Status::InvalidVpidUnsupportedParent.raw()
    );
    assert_eq!(
        reg_val(&mut bed, TARGET, 42, rax),
        Status::InvalidVpidUnknown.raw()
    );
    assert_eq!(
        reg_val(&mut bed, LISTENER, VPID_PARENT, 99),
        Status::InvalidParams2.raw()
    );

    // dom0 may read its children.
    assert_eq!(reg_val(&mut bed, TARGET, LISTENER2, rax), 0);
}

#[test]
fn test_pause_and_resume_parent() {
    let mut bed = TestBed::with_listener();

    bed.set_call(LISTENER, PAUSE_VP, VPID_PARENT, 0, 0, 0);
    assert_eq!(bed.hypercall(LISTENER), Transfer::Run(LISTENER));
    assert_eq!(bed.rax(LISTENER), Status::Success.raw());
    assert!(bed.vcpu(TARGET).paused);

    bed.set_call(LISTENER, RESUME_VP, TARGET, 0, 0, 0);
    bed.hypercall(LISTENER);
    assert_eq!(bed.rax(LISTENER), Status::Success.raw());
    assert!(!bed.vcpu(TARGET).paused);

    bed.set_call(LISTENER, PAUSE_VP, 42, 0, 0, 0);
    bed.hypercall(LISTENER);
    assert_eq!(bed.rax(LISTENER), Status::FailureUnknown.raw());

    bed.set_call(TARGET, PAUSE_VP, VPID_PARENT, 0, 0, 0);
    bed.hypercall(TARGET);
    assert_eq!(bed.rax(TARGET), Status::FailureUnknown.raw());

    assert_eq!(
        bed.calls(),
        ["advance(5)", "pause(1)", "advance(5)", "resume(1)", "advance(5)", "advance(1)"]
    );
}

#[test]
fn test_unknown_indices() {
    let mut bed = TestBed::with_listener();
    for op in [VP_EXIT_OP, VP_STATE_OP, VP_MANAGEMENT_OP] {
        bed.set_call(LISTENER, hypercall(op, 0x42), 0, 0, 0, 0);
        bed.hypercall(LISTENER);
        assert_eq!(bed.rax(LISTENER), Status::FailureUnknownHypercall.raw());
    }
    assert_eq!(bed.rip(LISTENER), START_RIP + 3 * INSTRUCTION_LEN);
}

#[test]
fn test_dom0_next_exit_is_unknown() {
    let mut bed = TestBed::with_listener();
    bed.set_call(TARGET, exit_op(VP_EXIT_OP_NEXT_EXIT_IDX), 0, 0, 0, 0);

    assert_eq!(bed.hypercall(TARGET), Transfer::Run(TARGET));
    assert_eq!(bed.rax(TARGET), Status::FailureUnknownHypercall.raw());
    assert_eq!(bed.rip(TARGET), START_RIP + INSTRUCTION_LEN);
}

#[test]
fn test_foreign_hypercalls_are_declined() {
    let mut bed = TestBed::with_listener();
    bed.enter(LISTENER);
    bed.set_call(LISTENER, hypercall(0x1, 0), 0, 0, 0, 0);

    assert!(bed.ctx.handle_hypercall(LISTENER).is_none());
    assert_eq!(bed.rip(LISTENER), START_RIP);
    assert_eq!(bed.rax(LISTENER), hypercall(0x1, 0));

    assert_eq!(
        bed.ctx.handle_hypercall(42).unwrap().unwrap_err(),
        AxError::NotFound
    );
}

#[test]
fn test_translate_v2p() {
    let mut bed = TestBed::with_listener();
    bed.set_call(LISTENER, TRANSLATE_V2P, 0, 0, 0, 0);
    bed.vcpu_mut(LISTENER).regs_mut().rdi = 0x4000;

    assert_eq!(bed.hypercall(LISTENER), Transfer::Run(LISTENER));
    assert_eq!(bed.rax(LISTENER), Status::Success.raw());
    assert_eq!(bed.vcpu(LISTENER).regs().rdi, 0x4000 + GPA_OFFSET);
    assert_eq!(bed.rip(LISTENER), START_RIP + INSTRUCTION_LEN);

    bed.vcpu_mut(LISTENER).translation_unsupported = true;
    bed.set_call(LISTENER, TRANSLATE_V2P, 0, 0, 0, 0);
    bed.vcpu_mut(LISTENER).regs_mut().rdi = 0x4000;
    bed.hypercall(LISTENER);
    assert_eq!(bed.rax(LISTENER), Status::FailureUnsupported.raw());
    assert_eq!(bed.vcpu(LISTENER).regs().rdi, 0x4000);
}

#[test]
fn test_vmi_op_is_domu_only() {
    let mut bed = TestBed::with_listener();
    bed.set_call(TARGET, TRANSLATE_V2P, 0, 0, 0, 0);
    bed.hypercall(TARGET);
    assert_eq!(bed.rax(TARGET), Status::FailureUnknownHypercall.raw());

    // get_registers and map_pa are not served.
    for idx in [1, 2] {
        bed.set_call(LISTENER, hypercall(VMI_OP, idx), 0, 0, 0, 0);
        bed.hypercall(LISTENER);
        assert_eq!(bed.rax(LISTENER), Status::FailureUnknownHypercall.raw());
    }
}
