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

use numeric_enum_macro::numeric_enum;

numeric_enum! {
    #[repr(u32)]
    /// VMX basic exit reasons. (SDM Vol. 3D, Appendix C)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[allow(non_camel_case_types)]
    pub enum VmxExitReason {
        EXCEPTION_NMI = 0,
        EXTERNAL_INTERRUPT = 1,
        TRIPLE_FAULT = 2,
        INIT = 3,
        SIPI = 4,
        SMI = 5,
        OTHER_SMI = 6,
        INTERRUPT_WINDOW = 7,
        NMI_WINDOW = 8,
        TASK_SWITCH = 9,
        CPUID = 10,
        GETSEC = 11,
        HLT = 12,
        INVD = 13,
        INVLPG = 14,
        RDPMC = 15,
        RDTSC = 16,
        RSM = 17,
        VMCALL = 18,
        VMCLEAR = 19,
        VMLAUNCH = 20,
        VMPTRLD = 21,
        VMPTRST = 22,
        VMREAD = 23,
        VMRESUME = 24,
        VMWRITE = 25,
        VMOFF = 26,
        VMON = 27,
        CR_ACCESS = 28,
        DR_ACCESS = 29,
        IO_INSTRUCTION = 30,
        MSR_READ = 31,
        MSR_WRITE = 32,
        INVALID_GUEST_STATE = 33,
        MSR_LOAD_FAIL = 34,
        MWAIT_INSTRUCTION = 36,
        MONITOR_TRAP_FLAG = 37,
        MONITOR_INSTRUCTION = 39,
        PAUSE_INSTRUCTION = 40,
        MCE_DURING_VMENTRY = 41,
        TPR_BELOW_THRESHOLD = 43,
        APIC_ACCESS = 44,
        VIRTUALIZED_EOI = 45,
        GDTR_IDTR = 46,
        LDTR_TR = 47,
        EPT_VIOLATION = 48,
        EPT_MISCONFIG = 49,
        INVEPT = 50,
        RDTSCP = 51,
        PREEMPTION_TIMER = 52,
        INVVPID = 53,
        WBINVD = 54,
        XSETBV = 55,
        APIC_WRITE = 56,
        RDRAND = 57,
        INVPCID = 58,
        VMFUNC = 59,
        ENCLS = 60,
        RDSEED = 61,
        PML_FULL = 62,
        XSAVES = 63,
        XRSTORS = 64,
    }
}
