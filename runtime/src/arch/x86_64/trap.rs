// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Asynchronous entry stubs. The kernel control device transfers here
//! with the interrupted thread's stack still live; the stubs save the
//! volatile integer registers, hand the interrupted program counter to
//! the handler body, and return through the delivery-specific exit
//! sequence. rbx anchors the pre-call stack so the body can run on a
//! realigned stack regardless of how delivery left rsp.

use core::arch::naked_asm;

// Ten 8-byte pushes; the delivery frame starts right above them.
const SAVED_REGS_BYTES: usize = 10 * 8;

// An INT-vector delivery pushes an interrupt frame; the interrupted
// program counter is its first word.
const INT_PC_OFFSET: usize = SAVED_REGS_BYTES;

// A counter-overflow delivery leaves [rflags][return address] for the
// popf-then-return exit sequence.
const PMU_PC_OFFSET: usize = SAVED_REGS_BYTES + 8;

macro_rules! lame_save_scratch {
    () => {
        "
        push rbx
        push rax
        push rcx
        push rdx
        push rsi
        push rdi
        push r8
        push r9
        push r10
        push r11
        "
    };
}

macro_rules! lame_restore_scratch {
    () => {
        "
        pop r11
        pop r10
        pop r9
        pop r8
        pop rdi
        pop rsi
        pop rdx
        pop rcx
        pop rax
        pop rbx
        "
    };
}

macro_rules! lame_trap_entry {
    ($name:ident, $cont:path, $pc_off:expr, $ret:expr) => {
        #[no_mangle]
        #[unsafe(naked)]
        pub unsafe extern "C" fn $name() {
            naked_asm!(
                concat!(
                    lame_save_scratch!(),
                    "
                    mov rbx, rsp
                    mov rdi, qword ptr [rsp + {pc}]
                    and rsp, -16
                    call {cont}
                    mov rsp, rbx
                    ",
                    lame_restore_scratch!(),
                    $ret,
                ),
                pc = const $pc_off,
                cont = sym $cont,
            );
        }
    };
}

lame_trap_entry!(
    lame_trap_entry_int,
    crate::sched::lame_handle,
    INT_PC_OFFSET,
    "iretq"
);

lame_trap_entry!(
    lame_trap_entry_pmu,
    crate::sched::lame_handle_pmu,
    PMU_PC_OFFSET,
    "popfq
     ret"
);

lame_trap_entry!(
    lame_trap_entry_pmu_pretend,
    crate::sched::lame_handle_pretend_pmu,
    PMU_PC_OFFSET,
    "popfq
     ret"
);

lame_trap_entry!(
    lame_trap_entry_pmu_stall,
    crate::sched::lame_stall,
    PMU_PC_OFFSET,
    "popfq
     ret"
);

// The no-op body has nothing to save: return straight through the
// counter-overflow exit sequence.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn lame_trap_entry_pmu_nop() {
    naked_asm!(
        "
        popfq
        ret
        ",
    );
}
