//! Scheduler, futex, and lifecycle test suites. These run from a kernel
//! test task after the scheduler is live.

use core::sync::atomic::{AtomicU32, Ordering};

use yula_abi::signal::SIGKILL;
use yula_abi::task::Priority;
use yula_lib::testing::TestResult;
use yula_lib::{assert_test, clock, define_test_suite, fail, pass};

use crate::sched::futex::{futex_wait, futex_wake};
use crate::sched::lifecycle::{spawn_kthread, waitpid};
use crate::sched::scheduler::yield_now;
use crate::sched::signal;
use crate::sched::sleep::sleep_current_ms;

extern "C" fn exit_with_arg(arg: u64) {
    crate::sched::lifecycle::exit_current(arg as i32);
}

pub fn test_spawn_and_waitpid() -> TestResult {
    let Some(pid) = spawn_kthread("t_exit42", Priority::Normal, exit_with_arg, 42) else {
        return fail!("spawn");
    };

    let mut status = 0i32;
    let reaped = waitpid(pid as i32, &mut status);
    assert_test!(reaped == pid as i64, "waitpid returned {}", reaped);
    assert_test!(status == 42, "exit status {}", status);
    pass!()
}

pub fn test_waitpid_no_child() -> TestResult {
    let mut status = 0i32;
    // A pid that is not our child must fail immediately.
    let result = waitpid(yula_abi::task::MAX_TASKS as i32 - 1, &mut status);
    assert_test!(result < 0, "waitpid on non-child succeeded");
    pass!()
}

static COUNTER: AtomicU32 = AtomicU32::new(0);

extern "C" fn bump_counter(_arg: u64) {
    COUNTER.fetch_add(1, Ordering::SeqCst);
}

pub fn test_spawned_task_runs() -> TestResult {
    COUNTER.store(0, Ordering::SeqCst);
    let Some(pid) = spawn_kthread("t_bump", Priority::Normal, bump_counter, 0) else {
        return fail!("spawn");
    };
    let mut status = 0i32;
    let _ = waitpid(pid as i32, &mut status);
    assert_test!(COUNTER.load(Ordering::SeqCst) == 1, "task never ran");
    pass!()
}

pub fn test_sleep_elapses() -> TestResult {
    let before = clock::uptime_ms();
    sleep_current_ms(20);
    let after = clock::uptime_ms();
    assert_test!(after >= before + 20, "slept {}ms", after - before);
    pass!()
}

static FUTEX_WORD: AtomicU32 = AtomicU32::new(0);
static FUTEX_PROGRESS: AtomicU32 = AtomicU32::new(0);

extern "C" fn futex_waiter(_arg: u64) {
    FUTEX_PROGRESS.store(1, Ordering::SeqCst);
    // Wait while the word is still 0; tolerate spurious wakeups.
    while FUTEX_WORD.load(Ordering::SeqCst) == 0 {
        let _ = futex_wait(FUTEX_WORD.as_ptr() as u64, 0);
    }
    FUTEX_PROGRESS.store(2, Ordering::SeqCst);
}

pub fn test_futex_wait_wake() -> TestResult {
    FUTEX_WORD.store(0, Ordering::SeqCst);
    FUTEX_PROGRESS.store(0, Ordering::SeqCst);

    let Some(pid) = spawn_kthread("t_futex", Priority::Normal, futex_waiter, 0) else {
        return fail!("spawn");
    };

    // Let the waiter reach its wait.
    for _ in 0..100 {
        if FUTEX_PROGRESS.load(Ordering::SeqCst) == 1 {
            break;
        }
        yield_now();
    }

    FUTEX_WORD.store(1, Ordering::SeqCst);
    let _ = futex_wake(FUTEX_WORD.as_ptr() as u64, 1);

    let mut status = 0i32;
    let _ = waitpid(pid as i32, &mut status);
    assert_test!(
        FUTEX_PROGRESS.load(Ordering::SeqCst) == 2,
        "waiter never woke"
    );
    pass!()
}

pub fn test_futex_wait_value_mismatch() -> TestResult {
    FUTEX_WORD.store(7, Ordering::SeqCst);
    // Expected value differs: must return EAGAIN without blocking.
    let rc = futex_wait(FUTEX_WORD.as_ptr() as u64, 0);
    assert_test!(rc < 0, "mismatched futex_wait blocked or succeeded");
    pass!()
}

extern "C" fn sleeper_forever(_arg: u64) {
    loop {
        sleep_current_ms(1000);
    }
}

pub fn test_kill_terminates() -> TestResult {
    let Some(pid) = spawn_kthread("t_victim", Priority::Normal, sleeper_forever, 0) else {
        return fail!("spawn");
    };

    sleep_current_ms(5);
    assert_test!(signal::kill(pid, SIGKILL) == 0, "kill failed");

    let mut status = 0i32;
    let reaped = waitpid(pid as i32, &mut status);
    assert_test!(reaped == pid as i64, "victim not reaped: {}", reaped);
    assert_test!(status == 128 + SIGKILL as i32, "status {}", status);
    pass!()
}

define_test_suite!(sched_core, [
    test_spawn_and_waitpid,
    test_waitpid_no_child,
    test_spawned_task_runs,
    test_sleep_elapses,
    test_futex_wait_wake,
    test_futex_wait_value_mismatch,
    test_kill_terminates,
]);
