//! Pipe, VFS, named-IPC, and SPK test suites.

use yula_lib::testing::TestResult;
use yula_lib::{FixedName, assert_test, define_test_suite, fail, pass};

use crate::named_ipc::{self, vfs_create_pipe};
use crate::pipe::{self, PipeEnd};
use crate::spk::{SPK_DEP_SIZE, SPK_FILE_ENTRY_SIZE, SPK_HEADER_SIZE, SpkError, SpkPackage};
use crate::vfs::{NodePayload, node_payload, node_refs, node_unref};

fn pipe_pair() -> Option<(u32, u32, u32)> {
    let (read_node, write_node) = vfs_create_pipe()?;
    let pipe = match node_payload(read_node) {
        Some(NodePayload::Pipe { pipe, .. }) => pipe,
        _ => return None,
    };
    Some((read_node, write_node, pipe))
}

/// Write 5, read 3, read 2, close, read EOF.
pub fn test_pipe_round_trip() -> TestResult {
    let Some((read_node, write_node, pipe)) = pipe_pair() else {
        return fail!("pipe create");
    };

    let wrote = pipe::pipe_write(pipe, &[1, 2, 3, 4, 5]);
    assert_test!(wrote == 5, "write returned {}", wrote);

    let mut buf3 = [0u8; 3];
    let got = pipe::pipe_read(pipe, &mut buf3);
    assert_test!(got == 3, "first read returned {}", got);
    assert_test!(buf3 == [1, 2, 3], "first read bytes wrong");

    let mut buf = [0u8; 8];
    let got = pipe::pipe_read(pipe, &mut buf);
    assert_test!(got == 2, "second read returned {}", got);
    assert_test!(buf[..2] == [4, 5], "second read bytes wrong");

    // Writer closes; a drained pipe must now report EOF.
    node_unref(write_node);
    let got = pipe::pipe_read(pipe, &mut buf);
    assert_test!(got == 0, "read after writer close returned {}", got);

    node_unref(read_node);
    pass!()
}

pub fn test_pipe_conservation() -> TestResult {
    let Some((read_node, write_node, pipe)) = pipe_pair() else {
        return fail!("pipe create");
    };

    let payload = [0xA5u8; 100];
    assert_test!(pipe::pipe_write(pipe, &payload) == 100, "write");
    let mut out = [0u8; 40];
    assert_test!(pipe::pipe_read(pipe, &mut out) == 40, "read");

    let (written, read) = pipe::pipe_totals(pipe);
    assert_test!(
        written - read == pipe::pipe_buffered(pipe) as u64,
        "written - read != buffered"
    );

    node_unref(read_node);
    node_unref(write_node);
    pass!()
}

pub fn test_pipe_nonblocking() -> TestResult {
    let Some((read_node, write_node, pipe)) = pipe_pair() else {
        return fail!("pipe create");
    };

    let mut buf = [0u8; 4];
    assert_test!(pipe::pipe_try_read(pipe, &mut buf) == 0, "try_read on empty");

    // Fill the ring; the next try_write must come back short or zero.
    let chunk = [0u8; pipe::PIPE_RING_SIZE];
    let first = pipe::pipe_try_write(pipe, &chunk);
    assert_test!(first == pipe::PIPE_RING_SIZE as i64, "fill write {}", first);
    assert_test!(pipe::pipe_try_write(pipe, &[1, 2, 3]) == 0, "write to full");

    // Reader closes: writes now fail outright.
    node_unref(read_node);
    assert_test!(pipe::pipe_try_write(pipe, &[1]) == -1, "write after reader close");

    node_unref(write_node);
    pass!()
}

pub fn test_pipe_frame_write() -> TestResult {
    let Some((read_node, write_node, pipe)) = pipe_pair() else {
        return fail!("pipe create");
    };

    let frame = [7u8; 64];
    assert_test!(pipe::pipe_write_frame(pipe, &frame, false) == 64, "frame write");

    // A non-essential frame that cannot fit whole is dropped, not split.
    let big = [1u8; pipe::PIPE_RING_SIZE];
    assert_test!(
        pipe::pipe_write_frame(pipe, &big, false) == 0,
        "oversized frame must be refused whole"
    );
    assert_test!(pipe::pipe_buffered(pipe) == 64, "partial frame leaked into ring");

    node_unref(read_node);
    node_unref(write_node);
    pass!()
}

pub fn test_node_refcounts() -> TestResult {
    let Some((read_node, write_node, _pipe)) = pipe_pair() else {
        return fail!("pipe create");
    };

    assert_test!(node_refs(read_node) == 1, "fresh node refcount");
    assert_test!(crate::vfs::node_ref(read_node), "ref");
    assert_test!(node_refs(read_node) == 2, "refcount after ref");
    node_unref(read_node);
    assert_test!(node_refs(read_node) == 1, "refcount after unref");

    node_unref(read_node);
    assert_test!(node_refs(read_node) == 0, "node alive after last unref");

    node_unref(write_node);
    pass!()
}

define_test_suite!(pipes, [
    test_pipe_round_trip,
    test_pipe_conservation,
    test_pipe_nonblocking,
    test_pipe_frame_write,
    test_node_refcounts,
]);

// --- Named IPC ---

pub fn test_ipc_listen_connect_accept() -> TestResult {
    let name = FixedName::<32>::new(b"ipc_test_ep").unwrap();

    let listen_node = match named_ipc::listen(&name) {
        Some(n) => n,
        None => return fail!("listen"),
    };
    // Duplicate listen must fail while the first is alive.
    assert_test!(named_ipc::listen(&name).is_none(), "duplicate listen accepted");

    let endpoint = match node_payload(listen_node) {
        Some(NodePayload::IpcListen { endpoint }) => endpoint,
        _ => return fail!("listen node payload"),
    };

    let Some((c2s_w, s2c_r, _key)) = named_ipc::connect(&name) else {
        node_unref(listen_node);
        return fail!("connect");
    };

    let Some((c2s_r, s2c_w)) = named_ipc::accept(endpoint) else {
        node_unref(listen_node);
        return fail!("accept");
    };

    // Client-to-server direction carries data.
    let (c2s_pipe, s2c_pipe) = match (node_payload(c2s_w), node_payload(s2c_w)) {
        (
            Some(NodePayload::Pipe { pipe: a, end: PipeEnd::Write }),
            Some(NodePayload::Pipe { pipe: b, end: PipeEnd::Write }),
        ) => (a, b),
        _ => return fail!("connection payloads"),
    };

    assert_test!(pipe::pipe_write(c2s_pipe, b"ping") == 4, "client write");
    let mut buf = [0u8; 8];
    assert_test!(pipe::pipe_read(c2s_pipe, &mut buf) == 4, "server read");
    assert_test!(&buf[..4] == b"ping", "payload");

    assert_test!(pipe::pipe_write(s2c_pipe, b"pong") == 4, "server write");

    // Nothing further pending.
    assert_test!(named_ipc::accept(endpoint).is_none(), "phantom pending connection");

    node_unref(c2s_w);
    node_unref(s2c_r);
    node_unref(c2s_r);
    node_unref(s2c_w);
    node_unref(listen_node);

    // Name is free again after close.
    let second = named_ipc::listen(&name);
    assert_test!(second.is_some(), "name not released on close");
    if let Some(n) = second {
        node_unref(n);
    }
    pass!()
}

pub fn test_ipc_connect_cancel() -> TestResult {
    let name = FixedName::<32>::new(b"ipc_cancel_ep").unwrap();
    let listen_node = match named_ipc::listen(&name) {
        Some(n) => n,
        None => return fail!("listen"),
    };
    let endpoint = match node_payload(listen_node) {
        Some(NodePayload::IpcListen { endpoint }) => endpoint,
        _ => return fail!("payload"),
    };

    let Some((c2s_w, s2c_r, key)) = named_ipc::connect(&name) else {
        node_unref(listen_node);
        return fail!("connect");
    };

    named_ipc::connect_cancel(key);
    assert_test!(named_ipc::accept(endpoint).is_none(), "cancelled connection accepted");

    node_unref(c2s_w);
    node_unref(s2c_r);
    node_unref(listen_node);
    pass!()
}

define_test_suite!(named_ipc_suite, [
    test_ipc_listen_connect_accept,
    test_ipc_connect_cancel,
]);

// --- SPK ---

fn build_test_package(buf: &mut [u8]) -> usize {
    let contents = b"hello from spk";
    let deps = 1usize;
    let files = 1usize;
    let entries_end = SPK_HEADER_SIZE + deps * SPK_DEP_SIZE + files * SPK_FILE_ENTRY_SIZE;

    buf[..4].copy_from_slice(b"SPIN");
    buf[4..8].copy_from_slice(&1u32.to_le_bytes());
    buf[8..8 + 7].copy_from_slice(b"testpkg");
    buf[72..72 + 5].copy_from_slice(b"1.2.3");
    buf[88..88 + 4].copy_from_slice(b"demo");
    buf[216..220].copy_from_slice(&(files as u32).to_le_bytes());
    buf[220..224].copy_from_slice(&(deps as u32).to_le_bytes());

    let dep_base = SPK_HEADER_SIZE;
    buf[dep_base..dep_base + 7].copy_from_slice(b"libcore");
    buf[dep_base + 64..dep_base + 64 + 3].copy_from_slice(b"0.9");

    let entry_base = dep_base + SPK_DEP_SIZE;
    buf[entry_base..entry_base + 12].copy_from_slice(b"bin/hello.sh");
    buf[entry_base + 200..entry_base + 204].copy_from_slice(&(contents.len() as u32).to_le_bytes());
    buf[entry_base + 204..entry_base + 208].copy_from_slice(&0o755u32.to_le_bytes());
    buf[entry_base + 208..entry_base + 212].copy_from_slice(&0u32.to_le_bytes());

    buf[entries_end..entries_end + contents.len()].copy_from_slice(contents);
    entries_end + contents.len()
}

pub fn test_spk_parse() -> TestResult {
    let mut buf = [0u8; 1024];
    let len = build_test_package(&mut buf);

    let pkg = match SpkPackage::parse(&buf[..len]) {
        Ok(p) => p,
        Err(e) => return fail!("parse failed: {:?}", e),
    };

    assert_test!(pkg.name() == b"testpkg", "package name");
    assert_test!(pkg.version() == b"1.2.3", "package version");
    assert_test!(pkg.file_count() == 1 && pkg.deps_count() == 1, "counts");

    let dep = match pkg.dep(0) {
        Ok(d) => d,
        Err(e) => return fail!("dep: {:?}", e),
    };
    assert_test!(dep.name == b"libcore" && dep.min_version == b"0.9", "dep fields");

    let file = match pkg.file(0) {
        Ok(f) => f,
        Err(e) => return fail!("file: {:?}", e),
    };
    assert_test!(file.path == b"bin/hello.sh", "file path");
    assert_test!(file.mode == 0o755, "file mode");
    assert_test!(file.contents == b"hello from spk", "file contents");
    pass!()
}

pub fn test_spk_rejects_garbage() -> TestResult {
    assert_test!(
        matches!(SpkPackage::parse(b"shrt"), Err(SpkError::Truncated)),
        "short buffer"
    );

    let mut buf = [0u8; 1024];
    let len = build_test_package(&mut buf);

    let mut bad_magic = buf;
    bad_magic[0] = b'X';
    assert_test!(
        matches!(SpkPackage::parse(&bad_magic[..len]), Err(SpkError::BadMagic)),
        "bad magic"
    );

    let mut bad_version = buf;
    bad_version[4] = 9;
    assert_test!(
        matches!(SpkPackage::parse(&bad_version[..len]), Err(SpkError::BadVersion)),
        "bad version"
    );

    // A file entry whose payload runs past the end of the package.
    let mut truncated = buf;
    let entry_base = SPK_HEADER_SIZE + SPK_DEP_SIZE;
    truncated[entry_base + 200..entry_base + 204].copy_from_slice(&0xFFFFu32.to_le_bytes());
    let pkg = match SpkPackage::parse(&truncated[..len]) {
        Ok(p) => p,
        Err(e) => return fail!("parse: {:?}", e),
    };
    assert_test!(pkg.file(0).is_err(), "oversized file accepted");
    pass!()
}

define_test_suite!(spk_format, [test_spk_parse, test_spk_rejects_garbage]);
