//! Register context and the context-switch primitive.
//!
//! Only callee-saved registers plus RFLAGS, RIP, and CR3 travel through a
//! voluntary switch; everything else is dead across the call boundary by
//! the SysV ABI. The layout is pinned by the assembly below; the offset
//! constants are checked at compile time.

use core::arch::naked_asm;

/// Saved register state for a software context switch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SwitchContext {
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub rflags: u64,
    pub rip: u64,
    pub cr3: u64,
}

impl SwitchContext {
    pub const fn zero() -> Self {
        Self {
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rbp: 0,
            rsp: 0,
            rflags: 0x202, // IF set
            rip: 0,
            cr3: 0,
        }
    }

    /// Context for a fresh task: the trampoline pops `entry` out of r12
    /// and `arg` out of r13.
    pub fn new_for_task(entry: u64, arg: u64, stack_top: u64, cr3: u64) -> Self {
        Self {
            rbx: 0,
            r12: entry,
            r13: arg,
            r14: 0,
            r15: 0,
            rbp: 0,
            rsp: stack_top & !0xF,
            rflags: 0x202,
            rip: task_entry_trampoline as *const () as usize as u64,
            cr3,
        }
    }
}

const _: () = assert!(core::mem::size_of::<SwitchContext>() == 80);
const _: () = assert!(core::mem::offset_of!(SwitchContext, rsp) == 0x30);
const _: () = assert!(core::mem::offset_of!(SwitchContext, rflags) == 0x38);
const _: () = assert!(core::mem::offset_of!(SwitchContext, rip) == 0x40);
const _: () = assert!(core::mem::offset_of!(SwitchContext, cr3) == 0x48);

/// Save the caller's context into `old` and resume `new`.
///
/// # Safety
/// Both pointers must reference valid contexts; `new` must describe a
/// resumable task whose stack and CR3 are live.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(old: *mut SwitchContext, new: *const SwitchContext) {
    naked_asm!(
        // Save callee-saved state into *old.
        "mov [rdi + 0x00], rbx",
        "mov [rdi + 0x08], r12",
        "mov [rdi + 0x10], r13",
        "mov [rdi + 0x18], r14",
        "mov [rdi + 0x20], r15",
        "mov [rdi + 0x28], rbp",
        // RSP as it will be after our `ret` executes.
        "lea rax, [rsp + 8]",
        "mov [rdi + 0x30], rax",
        "pushfq",
        "pop rax",
        "mov [rdi + 0x38], rax",
        // Resume point: the return address on the stack.
        "mov rax, [rsp]",
        "mov [rdi + 0x40], rax",
        "mov rax, cr3",
        "mov [rdi + 0x48], rax",
        // Install the new address space if it differs.
        "mov rax, [rsi + 0x48]",
        "test rax, rax",
        "jz 2f",
        "mov rcx, cr3",
        "cmp rax, rcx",
        "je 2f",
        "mov cr3, rax",
        "2:",
        // Load the new register state and jump.
        "mov rbx, [rsi + 0x00]",
        "mov r12, [rsi + 0x08]",
        "mov r13, [rsi + 0x10]",
        "mov r14, [rsi + 0x18]",
        "mov r15, [rsi + 0x20]",
        "mov rbp, [rsi + 0x28]",
        "mov rsp, [rsi + 0x30]",
        "push qword ptr [rsi + 0x38]",
        "popfq",
        "jmp qword ptr [rsi + 0x40]",
    )
}

/// First instruction of every fresh task. r12 = entry, r13 = arg, per
/// [`SwitchContext::new_for_task`]. If the entry function returns, the
/// task exits with status 0.
#[unsafe(naked)]
pub unsafe extern "C" fn task_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "xor edi, edi",
        "call {exit}",
        // exit_current never returns.
        "ud2",
        exit = sym task_entry_exit,
    )
}

extern "C" fn task_entry_exit(status: i64) {
    super::lifecycle::exit_current(status as i32);
}
