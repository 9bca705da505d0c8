use super::TestResult;
use crate::{klog_debug, klog_info};

/// Run one test function, logging the outcome.
pub fn run_single_test<F: FnOnce() -> TestResult>(name: &str, f: F) -> TestResult {
    klog_debug!("TEST RUN:  {}", name);
    let result = f();
    match result {
        TestResult::Pass => klog_debug!("TEST PASS: {}", name),
        TestResult::Skipped => klog_debug!("TEST SKIP: {}", name),
        TestResult::Fail => klog_info!("TEST FAIL: {}", name),
    }
    result
}
