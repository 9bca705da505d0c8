//! Wire framing, input-ring, and WM layout test suites. All pure logic,
//! runnable before any client is alive.

use yula_abi::comp::{
    self, AttachShmName, Commit, FrameHeader, HEADER_SIZE, InputEvent, WmEvent, encode_frame,
};
use yula_abi::ring::ring_size_bytes;
use yula_lib::ring_buffer::ByteRing;
use yula_lib::testing::TestResult;
use yula_lib::{assert_test, define_test_suite, fail, pass};

use crate::apps::wm::{MAX_VIEWS, SplitDir, View, WmState, drag, layout};
use crate::comp::next_frame_from_ring;
use crate::comp::ring::{RingConsumer, RingProducer, RingView};

// --- framing ---

pub fn test_frame_round_trip() -> TestResult {
    let msg = Commit { surface_id: 7, x: -3, y: 42, flags: comp::COMMIT_FLAG_ACK };
    let mut payload = [0u8; Commit::WIRE_SIZE];
    assert_test!(msg.encode(&mut payload).is_some(), "encode");

    let mut frame = [0u8; comp::MAX_FRAME];
    let len = match encode_frame(&mut frame, comp::MSG_COMMIT, 9, &payload) {
        Some(len) => len,
        None => return fail!("frame encode"),
    };
    assert_test!(len == HEADER_SIZE + Commit::WIRE_SIZE, "frame length");

    // Feed the bytes one at a time; the frame must pop out whole.
    let mut ring = ByteRing::<1024>::new();
    let mut decoded = None;
    for &byte in &frame[..len] {
        ring.push(&[byte]);
        if let Some(frame) = next_frame_from_ring(&mut ring) {
            decoded = Some(frame);
        }
    }
    let Some(decoded) = decoded else {
        return fail!("no frame decoded");
    };
    assert_test!(decoded.header.msg_type == comp::MSG_COMMIT, "type");
    assert_test!(decoded.header.seq == 9, "seq");
    assert_test!(Commit::decode(decoded.payload_bytes()) == Some(msg), "payload");
    pass!()
}

/// Garbage before a frame delays it but never corrupts it.
pub fn test_frame_resync() -> TestResult {
    let msg = AttachShmName { surface_id: 3, width: 320, height: 240, stride: 320, size_bytes: 307200, ..AttachShmName::default() };
    let mut payload = [0u8; AttachShmName::WIRE_SIZE];
    let _ = msg.encode(&mut payload);
    let mut frame = [0u8; comp::MAX_FRAME];
    let len = encode_frame(&mut frame, comp::MSG_ATTACH_SHM_NAME, 1, &payload).unwrap();

    let mut ring = ByteRing::<1024>::new();
    // Garbage that includes a magic-looking prefix with a bad version.
    ring.push(&[0x43, 0x50, 0x49, 0x43, 0xFF, 0xFF, 0x00, 0x01]);
    ring.push(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02]);
    ring.push(&frame[..len]);

    let decoded = loop {
        match next_frame_from_ring(&mut ring) {
            Some(frame) => break frame,
            None => return fail!("resync never found the frame"),
        }
    };
    assert_test!(decoded.header.msg_type == comp::MSG_ATTACH_SHM_NAME, "type after resync");
    assert_test!(
        AttachShmName::decode(decoded.payload_bytes()) == Some(msg),
        "payload after resync"
    );
    pass!()
}

pub fn test_header_rejects_bad_version() -> TestResult {
    let mut bytes = [0u8; HEADER_SIZE];
    FrameHeader::new(comp::MSG_HELLO, 0, 1).encode(&mut bytes);
    bytes[4] = 0x7F; // version
    assert_test!(FrameHeader::decode(&bytes).is_err(), "bad version accepted");

    let mut bytes = [0u8; HEADER_SIZE];
    FrameHeader::new(comp::MSG_HELLO, 0, 1).encode(&mut bytes);
    bytes[8..12].copy_from_slice(&4096u32.to_le_bytes()); // len > MAX_PAYLOAD
    assert_test!(FrameHeader::decode(&bytes).is_err(), "oversized len accepted");
    pass!()
}

pub fn test_wm_event_codec() -> TestResult {
    let ev = WmEvent {
        kind: comp::WM_EVENT_CLICK,
        client_id: 2,
        surface_id: 5,
        sx: 10,
        sy: -20,
        sw: 300,
        sh: 200,
        px: 99,
        py: 77,
        buttons: 1,
        keycode: 0,
        key_state: 0,
        flags: comp::WM_EVENT_FLAG_REPLAY,
    };
    let mut payload = [0u8; WmEvent::WIRE_SIZE];
    assert_test!(ev.encode(&mut payload).is_some(), "encode");
    assert_test!(WmEvent::decode(&payload) == Some(ev), "round trip");
    pass!()
}

define_test_suite!(comp_wire, [
    test_frame_round_trip,
    test_frame_resync,
    test_header_rejects_bad_version,
    test_wm_event_codec,
]);

// --- input ring ---

const TEST_RING_CAP: u32 = 64;

fn mouse_event(x: i32, y: i32) -> InputEvent {
    InputEvent { surface_id: 1, kind: comp::INPUT_MOUSE, x, y, ..InputEvent::default() }
}

pub fn test_ring_produce_consume() -> TestResult {
    // u32 backing keeps the header words aligned.
    let mut backing = [0u32; ring_size_bytes(TEST_RING_CAP).div_ceil(4)];
    let Some(view) = RingView::init(backing.as_mut_ptr() as u64, TEST_RING_CAP) else {
        return fail!("ring init");
    };
    let mut producer = RingProducer::new(view);
    let consumer = RingConsumer::new(view);

    for i in 0..10 {
        assert_test!(producer.send(&mouse_event(i, i * 2), false), "send {}", i);
    }
    for i in 0..10 {
        let Some(ev) = consumer.try_pop() else {
            return fail!("pop {}", i);
        };
        assert_test!(ev.x == i && ev.y == i * 2, "event {} out of order", i);
    }
    assert_test!(consumer.try_pop().is_none(), "ring not drained");
    pass!()
}

/// Overrun: mouse events coalesce, the last position survives, nothing
/// essential is lost.
pub fn test_ring_mouse_coalescing() -> TestResult {
    let mut backing = [0u32; ring_size_bytes(TEST_RING_CAP).div_ceil(4)];
    let Some(view) = RingView::init(backing.as_mut_ptr() as u64, TEST_RING_CAP) else {
        return fail!("ring init");
    };
    let mut producer = RingProducer::new(view);
    let consumer = RingConsumer::new(view);

    // Flood: three times the capacity. The ring holds the oldest burst,
    // the coalesce slot tracks the newest position.
    let total = TEST_RING_CAP as i32 * 3;
    for i in 0..total {
        assert_test!(producer.send(&mouse_event(i, 0), false), "send {}", i);
    }
    assert_test!(view.dropped() > 0, "no drops recorded after flood");

    let mut last_seen = -1;
    while let Some(ev) = consumer.try_pop() {
        last_seen = last_seen.max(ev.x);
    }
    assert_test!(last_seen < total - 1, "flood fit without coalescing");

    // The next produce call flushes the coalesce slot ahead of its own
    // event, so the newest flooded position arrives before the sentinel.
    assert_test!(producer.send(&mouse_event(total, 0), false), "sentinel send");
    let mut saw_pending = false;
    let mut saw_sentinel = false;
    while let Some(ev) = consumer.try_pop() {
        if ev.x == total - 1 {
            saw_pending = true;
        }
        if ev.x == total {
            assert_test!(saw_pending, "sentinel arrived before the coalesced event");
            saw_sentinel = true;
        }
    }
    assert_test!(saw_pending && saw_sentinel, "coalesced position lost");
    pass!()
}

define_test_suite!(input_ring, [test_ring_produce_consume, test_ring_mouse_coalescing]);

// --- WM layout ---

fn add_view(st: &mut WmState, w: u32, h: u32) -> usize {
    let idx = st.views.iter().position(|v| !v.mapped).unwrap();
    st.views[idx] = View::empty();
    st.views[idx].mapped = true;
    st.views[idx].client_id = 0;
    st.views[idx].surface_id = idx as u32 + 1;
    st.views[idx].workspace = st.active_ws;
    st.views[idx].w = w;
    st.views[idx].h = h;
    idx
}

fn tree_leaves(st: &WmState) -> usize {
    layout::leaves_of(st, st.active_ws).1
}

pub fn test_bsp_insert_and_split() -> TestResult {
    let mut st = WmState::new();
    st.screen_w = 1024;
    st.screen_h = 768;
    st.have_screen = true;

    // First view becomes the root leaf.
    let v1 = add_view(&mut st, 300, 200);
    layout::insert_view(&mut st, v1);
    assert_test!(tree_leaves(&st) == 1, "one leaf after first insert");
    let root = st.layout_root[0];
    assert_test!(root >= 0 && !st.layout_nodes[root as usize].is_split, "root is a leaf");

    // Second view splits; the wider-than-tall target picks VERTICAL.
    let v2 = add_view(&mut st, 300, 400);
    layout::insert_view(&mut st, v2);
    assert_test!(tree_leaves(&st) == 2, "two leaves after second insert");
    let root = st.layout_root[0];
    let node = &st.layout_nodes[root as usize];
    assert_test!(node.is_split, "root became a split");
    assert_test!(node.split_dir == SplitDir::Vertical, "split dir {:?}", node.split_dir);

    // Leaf set equals the mapped non-floating view set.
    let (leaves, n) = layout::leaves_of(&st, 0);
    assert_test!(n == 2, "leaf count");
    let mut found = [false; 2];
    for &leaf in &leaves[..n] {
        if leaf == v1 as i32 {
            found[0] = true;
        }
        if leaf == v2 as i32 {
            found[1] = true;
        }
    }
    assert_test!(found[0] && found[1], "leaves reference wrong views");
    pass!()
}

/// Destroying a view collapses the split; re-mapping restores an
/// isomorphic single-leaf tree.
pub fn test_bsp_remove_collapses() -> TestResult {
    let mut st = WmState::new();
    st.screen_w = 1024;
    st.screen_h = 768;
    st.have_screen = true;

    let v1 = add_view(&mut st, 400, 300);
    layout::insert_view(&mut st, v1);
    let v2 = add_view(&mut st, 400, 300);
    layout::insert_view(&mut st, v2);
    assert_test!(tree_leaves(&st) == 2, "two leaves");

    layout::remove_view(&mut st, 0, v1);
    st.views[v1] = View::empty();

    assert_test!(tree_leaves(&st) == 1, "collapse to one leaf");
    let root = st.layout_root[0];
    assert_test!(root >= 0, "root survives");
    let node = &st.layout_nodes[root as usize];
    assert_test!(!node.is_split && node.view_idx == v2 as i32, "sibling promoted to root");

    layout::remove_view(&mut st, 0, v2);
    assert_test!(st.layout_root[0] == -1, "empty workspace has no tree");
    assert_test!(
        st.layout_nodes.iter().all(|n| !n.used),
        "leaked layout nodes"
    );
    pass!()
}

pub fn test_bsp_deep_nesting() -> TestResult {
    let mut st = WmState::new();
    st.screen_w = 1024;
    st.screen_h = 768;
    st.have_screen = true;

    let mut views = [0usize; 8];
    for slot in views.iter_mut() {
        let v = add_view(&mut st, 200, 150);
        layout::insert_view(&mut st, v);
        st.focused_idx = v as i32;
        *slot = v;
    }
    assert_test!(tree_leaves(&st) == 8, "eight leaves");

    // Parent back-links must be consistent.
    for (i, node) in st.layout_nodes.iter().enumerate() {
        if !node.used || node.parent < 0 {
            continue;
        }
        let parent = &st.layout_nodes[node.parent as usize];
        assert_test!(
            parent.a == i as i32 || parent.b == i as i32,
            "parent of node {} does not point back",
            i
        );
    }

    for &v in views.iter() {
        layout::remove_view(&mut st, 0, v);
        st.views[v] = View::empty();
    }
    assert_test!(st.layout_root[0] == -1, "tree not empty after removals");
    pass!()
}

pub fn test_resize_edge_hit() -> TestResult {
    let mut view = View::empty();
    view.mapped = true;
    view.x = 100;
    view.y = 100;
    view.w = 200;
    view.h = 150;

    assert_test!(
        drag::resize_edges_for_point(&view, 102, 170) == drag::EDGE_LEFT,
        "left edge"
    );
    assert_test!(
        drag::resize_edges_for_point(&view, 298, 248)
            == drag::EDGE_RIGHT | drag::EDGE_BOTTOM,
        "corner"
    );
    assert_test!(drag::resize_edges_for_point(&view, 200, 170) == 0, "interior");
    assert_test!(drag::resize_edges_for_point(&view, 50, 50) == 0, "outside");
    pass!()
}

define_test_suite!(wm_layout, [
    test_bsp_insert_and_split,
    test_bsp_remove_collapses,
    test_bsp_deep_nesting,
    test_resize_edge_hit,
]);

const _: () = assert!(MAX_VIEWS >= 8);
