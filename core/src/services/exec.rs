//! Program resolution seam for `spawn_process`.
//!
//! The ELF loader is an external collaborator; whoever can turn a path
//! into an entry point registers a resolver here. The in-tree program
//! registry in `yula-userland` is the default provider.

use core::sync::atomic::{AtomicUsize, Ordering};

use yula_abi::task::Priority;

use crate::sched::lifecycle::TaskEntry;

#[derive(Clone, Copy)]
pub struct Program {
    pub name: &'static str,
    pub entry: TaskEntry,
    pub priority: Priority,
}

pub type ResolveFn = fn(path: &[u8]) -> Option<Program>;

static RESOLVER: AtomicUsize = AtomicUsize::new(0);

pub fn register_resolver(f: ResolveFn) {
    RESOLVER.store(f as usize, Ordering::Release);
}

pub fn resolve(path: &[u8]) -> Option<Program> {
    let raw = RESOLVER.load(Ordering::Acquire);
    if raw == 0 {
        return None;
    }
    // SAFETY: only ResolveFn values are stored.
    let f: ResolveFn = unsafe { core::mem::transmute(raw) };
    f(path)
}
