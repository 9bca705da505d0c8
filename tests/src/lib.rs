//! Suite runner and cross-subsystem scenarios.
//!
//! Per-crate suites self-register into the `.test_registry` link
//! section; [`run_all_suites`] walks that section from the test task
//! when the kernel boots with `builtin-tests`. The scenarios here cover
//! interactions no single crate can see: tasks blocking on pipes,
//! accept with a live connecting client, futex-signaled handoff.

#![no_std]

pub mod scenarios;

use yula_lib::testing::{TestSuiteDesc, TestSuiteResult};
use yula_lib::{klog_info, klog_warn};

#[allow(improper_ctypes)]
unsafe extern "C" {
    static __test_registry_start: TestSuiteDesc;
    static __test_registry_end: TestSuiteDesc;
}

/// Execute every registered suite, logging a per-suite line and a final
/// summary. Returns the number of failed tests.
pub fn run_all_suites() -> u32 {
    let (start, end) = (
        &raw const __test_registry_start,
        &raw const __test_registry_end,
    );
    let count = (end as usize - start as usize) / core::mem::size_of::<TestSuiteDesc>();

    klog_info!("tests: {} suites registered", count);
    let mut total = 0u32;
    let mut failed = 0u32;

    for i in 0..count {
        // SAFETY: the linker script bounds the registry section; every
        // entry was emitted by define_test_suite!.
        let desc = unsafe { &*start.add(i) };
        let Some(run) = desc.run else {
            continue;
        };
        let mut result = TestSuiteResult::default();
        let rc = run(&mut result);
        total += result.total;
        failed += result.failed;
        if rc != 0 {
            klog_warn!(
                "tests: suite {} failed ({}/{} passed)",
                i,
                result.passed,
                result.total
            );
        }
    }

    if failed == 0 {
        klog_info!("tests: all {} tests passed", total);
    } else {
        klog_warn!("tests: {} of {} tests FAILED", failed, total);
    }
    failed
}
