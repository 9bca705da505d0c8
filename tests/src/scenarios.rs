//! Cross-task scenarios: blocking pipe I/O, live-client accept, and
//! futex handoff between real tasks.

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use yula_abi::task::Priority;
use yula_fs::named_ipc;
use yula_fs::pipe::{self, PipeEnd};
use yula_fs::vfs::{NodePayload, node_payload, node_unref};
use yula_lib::testing::TestResult;
use yula_lib::{FixedName, assert_test, define_test_suite, fail, pass};

use yula_core::sched::lifecycle::{spawn_kthread, waitpid};
use yula_core::sched::sleep::sleep_current_ms;

// Writer-side state handed to the helper task through statics: kthread
// args carry one word, and these tests run strictly one at a time.
static SCENARIO_PIPE: AtomicU32 = AtomicU32::new(0);
static SCENARIO_RESULT: AtomicI32 = AtomicI32::new(0);

extern "C" fn delayed_writer(_arg: u64) {
    let pipe_id = SCENARIO_PIPE.load(Ordering::Acquire);
    sleep_current_ms(20);
    let n = pipe::pipe_write(pipe_id, &[1, 2, 3, 4, 5]);
    SCENARIO_RESULT.store(n as i32, Ordering::Release);
}

/// A reader parked on an empty pipe is woken by a writer on another
/// task, sees the bytes in order, and EOF after the close.
pub fn test_blocking_pipe_handoff() -> TestResult {
    let Some((read_node, write_node)) = named_ipc::vfs_create_pipe() else {
        return fail!("pipe create");
    };
    let pipe_id = match node_payload(read_node) {
        Some(NodePayload::Pipe { pipe, .. }) => pipe,
        _ => return fail!("payload"),
    };

    SCENARIO_PIPE.store(pipe_id, Ordering::Release);
    SCENARIO_RESULT.store(-1, Ordering::Release);

    let Some(writer) = spawn_kthread("t_pipe_writer", Priority::Normal, delayed_writer, 0) else {
        return fail!("spawn writer");
    };

    // This read blocks until the writer delivers.
    let mut buf = [0u8; 3];
    let got = pipe::pipe_read(pipe_id, &mut buf);
    assert_test!(got == 3, "first read returned {}", got);
    assert_test!(buf == [1, 2, 3], "bytes out of order");

    let mut rest = [0u8; 8];
    let got = pipe::pipe_read(pipe_id, &mut rest);
    assert_test!(got == 2, "second read returned {}", got);
    assert_test!(rest[..2] == [4, 5], "tail bytes wrong");

    let mut status = 0i32;
    let _ = waitpid(writer as i32, &mut status);
    assert_test!(SCENARIO_RESULT.load(Ordering::Acquire) == 5, "writer result");

    node_unref(write_node);
    let got = pipe::pipe_read(pipe_id, &mut rest);
    assert_test!(got == 0, "EOF after writer close, got {}", got);

    node_unref(read_node);
    pass!()
}

extern "C" fn connecting_client(_arg: u64) {
    let name = FixedName::<32>::new(b"scenario_ep").unwrap();
    let Some((c2s_w, s2c_r, _key)) = named_ipc::connect(&name) else {
        SCENARIO_RESULT.store(-2, Ordering::Release);
        return;
    };

    let pipe_id = match node_payload(c2s_w) {
        Some(NodePayload::Pipe { pipe, end: PipeEnd::Write }) => pipe,
        _ => {
            SCENARIO_RESULT.store(-3, Ordering::Release);
            return;
        }
    };
    let n = pipe::pipe_write(pipe_id, b"hello");
    SCENARIO_RESULT.store(n as i32, Ordering::Release);

    // Keep the connection alive long enough for the server side.
    sleep_current_ms(100);
    node_unref(c2s_w);
    node_unref(s2c_r);
}

/// `accept` returns the live client's halves; the bytes it wrote arrive
/// on the server's read end.
pub fn test_accept_live_client() -> TestResult {
    let name = FixedName::<32>::new(b"scenario_ep").unwrap();
    let Some(listen_node) = named_ipc::listen(&name) else {
        return fail!("listen");
    };
    let endpoint = match node_payload(listen_node) {
        Some(NodePayload::IpcListen { endpoint }) => endpoint,
        _ => return fail!("payload"),
    };

    SCENARIO_RESULT.store(0, Ordering::Release);
    let Some(client) = spawn_kthread("t_ipc_client", Priority::Normal, connecting_client, 0) else {
        node_unref(listen_node);
        return fail!("spawn client");
    };

    let Some((c2s_r, s2c_w)) = named_ipc::accept_blocking(endpoint) else {
        node_unref(listen_node);
        return fail!("accept");
    };

    let pipe_id = match node_payload(c2s_r) {
        Some(NodePayload::Pipe { pipe, end: PipeEnd::Read }) => pipe,
        _ => return fail!("server payload"),
    };
    let mut buf = [0u8; 16];
    let got = pipe::pipe_read(pipe_id, &mut buf);
    assert_test!(got == 5, "server read {}", got);
    assert_test!(&buf[..5] == b"hello", "server payload bytes");

    let mut status = 0i32;
    let _ = waitpid(client as i32, &mut status);

    node_unref(c2s_r);
    node_unref(s2c_w);
    node_unref(listen_node);
    pass!()
}

static HANDOFF_WORD: AtomicU32 = AtomicU32::new(0);

extern "C" fn futex_producer(_arg: u64) {
    sleep_current_ms(10);
    HANDOFF_WORD.store(1, Ordering::SeqCst);
    let _ = yula_core::sched::futex::futex_wake(HANDOFF_WORD.as_ptr() as u64, 1);
}

/// The classic consumer/producer futex handshake across two tasks.
pub fn test_futex_handoff() -> TestResult {
    HANDOFF_WORD.store(0, Ordering::SeqCst);
    let Some(producer) = spawn_kthread("t_futex_prod", Priority::Normal, futex_producer, 0) else {
        return fail!("spawn producer");
    };

    while HANDOFF_WORD.load(Ordering::SeqCst) == 0 {
        let _ = yula_core::sched::futex::futex_wait(HANDOFF_WORD.as_ptr() as u64, 0);
    }
    assert_test!(HANDOFF_WORD.load(Ordering::SeqCst) == 1, "word not flipped");

    let mut status = 0i32;
    let _ = waitpid(producer as i32, &mut status);
    pass!()
}

define_test_suite!(scenarios, [
    test_blocking_pipe_handoff,
    test_accept_live_client,
    test_futex_handoff,
]);
