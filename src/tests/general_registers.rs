//! Tests for the guest register file and its hypercall diff.

use crate::regs::{GeneralRegisters, GeneralRegistersDiff};

#[test]
fn test_register_name_function() {
    assert_eq!(GeneralRegisters::register_name(0), "rax");
    assert_eq!(GeneralRegisters::register_name(8), "r8");
    assert_eq!(GeneralRegisters::register_name(15), "r15");
}

#[test]
fn test_get_reg_of_index() {
    let mut regs = GeneralRegisters::default();
    regs.rax = 0x100;
    regs.rcx = 0x101;
    regs.rdx = 0x102;
    regs.rbx = 0x103;
    regs.rbp = 0x105;
    regs.rsi = 0x106;
    regs.rdi = 0x107;
    regs.r8 = 0x108;
    regs.r9 = 0x109;
    regs.r10 = 0x10a;
    regs.r11 = 0x10b;
    regs.r12 = 0x10c;
    regs.r13 = 0x10d;
    regs.r14 = 0x10e;
    regs.r15 = 0x10f;

    assert_eq!(regs.get_reg_of_index(0), 0x100);
    assert_eq!(regs.get_reg_of_index(1), 0x101);
    assert_eq!(regs.get_reg_of_index(2), 0x102);
    assert_eq!(regs.get_reg_of_index(3), 0x103);
    assert_eq!(regs.get_reg_of_index(5), 0x105);
    assert_eq!(regs.get_reg_of_index(6), 0x106);
    assert_eq!(regs.get_reg_of_index(7), 0x107);
    assert_eq!(regs.get_reg_of_index(8), 0x108);
    assert_eq!(regs.get_reg_of_index(9), 0x109);
    assert_eq!(regs.get_reg_of_index(10), 0x10a);
    assert_eq!(regs.get_reg_of_index(11), 0x10b);
    assert_eq!(regs.get_reg_of_index(12), 0x10c);
    assert_eq!(regs.get_reg_of_index(13), 0x10d);
    assert_eq!(regs.get_reg_of_index(14), 0x10e);
    assert_eq!(regs.get_reg_of_index(15), 0x10f);
}

#[test]
#[should_panic(expected = "Illegal index")]
fn test_get_reg_invalid_index_high() {
    let regs = GeneralRegisters::default();
    let _ = regs.get_reg_of_index(16);
}

#[test]
#[should_panic(expected = "Illegal index")]
fn test_get_reg_invalid_index_rsp() {
    let regs = GeneralRegisters::default();
    // Index 4 is RSP which is unused
    let _ = regs.get_reg_of_index(4);
}

#[test]
fn test_diff_same() {
    let mut regs = GeneralRegisters::default();
    regs.rax = 0x6_0001;
    let diff = GeneralRegistersDiff::new(regs, regs);
    assert!(diff.is_same());
    assert_eq!(alloc::format!("{diff:?}"), "GeneralRegistersDiff");
}

#[test]
fn test_diff_lists_changed_registers() {
    let old = GeneralRegisters::default();
    let mut new = old;
    new.rax = 0;
    new.r10 = 0x5;
    new.r13 = 0xdead;

    let diff = GeneralRegistersDiff::new(old, new);
    assert!(!diff.is_same());

    let text = alloc::format!("{diff:?}");
    assert!(text.contains("r10: \"0x0 -> 0x5\""));
    assert!(text.contains("r13: \"0x0 -> 0xdead\""));
    assert!(!text.contains("rax"));
}
