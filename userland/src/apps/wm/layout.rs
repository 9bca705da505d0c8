//! BSP layout trees, one per workspace.
//!
//! Nodes live in a fixed arena addressed by index; a node is either a
//! leaf holding one view index or a split with two children whose
//! parent link points back. Inserting a view splits the focused leaf
//! (else any leaf) with a direction chosen from the target leaf's
//! current aspect (wider splits vertically). Removing a leaf collapses
//! its parent into the sibling.
//!
//! `apply_layout` walks the active workspace's tree depth-first with an
//! explicit stack, halving rectangles minus the inner gap, and issues
//! MOVE/RESIZE only for geometry that actually changed.

use super::{
    GAP_INNER, GAP_OUTER, LayoutNode, MAX_LAYOUT_NODES, MAX_VIEWS, MAX_WORKSPACES, RESIZE_MIN_H,
    RESIZE_MIN_W, SplitDir, WmLink, WmState, hide_view, show_view, ui,
};

fn alloc_node(st: &mut WmState, ws: u32) -> i32 {
    for i in 0..MAX_LAYOUT_NODES {
        if !st.layout_nodes[i].used {
            st.layout_nodes[i] = LayoutNode::empty();
            st.layout_nodes[i].used = true;
            st.layout_nodes[i].workspace = ws;
            return i as i32;
        }
    }
    -1
}

fn free_node(st: &mut WmState, n: i32) {
    if (0..MAX_LAYOUT_NODES as i32).contains(&n) {
        st.layout_nodes[n as usize] = LayoutNode::empty();
    }
}

fn find_leaf_for_view(st: &WmState, ws: u32, view_idx: usize) -> i32 {
    for (i, node) in st.layout_nodes.iter().enumerate() {
        if node.used
            && node.workspace == ws
            && !node.is_split
            && node.view_idx == view_idx as i32
        {
            return i as i32;
        }
    }
    -1
}

fn find_any_leaf(st: &WmState, ws: u32) -> i32 {
    for (i, node) in st.layout_nodes.iter().enumerate() {
        if node.used && node.workspace == ws && !node.is_split && node.view_idx >= 0 {
            return i as i32;
        }
    }
    -1
}

/// Wider targets split vertically (side by side), taller horizontally.
fn pick_split_dir(st: &WmState, view_idx: i32) -> SplitDir {
    if !(0..MAX_VIEWS as i32).contains(&view_idx) {
        return SplitDir::Vertical;
    }
    let view = &st.views[view_idx as usize];
    let (mut w, mut h) = (view.w, view.h);
    if w == 0 || h == 0 {
        w = st.screen_w;
        h = st.screen_h;
    }
    if w >= h { SplitDir::Vertical } else { SplitDir::Horizontal }
}

/// Insert `view_idx` into its workspace's tree: root if empty, else
/// split the focused (or any) leaf.
pub fn insert_view(st: &mut WmState, view_idx: usize) {
    let ws = st.views[view_idx].workspace;
    if ws as usize >= MAX_WORKSPACES || st.views[view_idx].floating || st.views[view_idx].ui {
        return;
    }

    // Prefer splitting the currently focused leaf.
    let mut leaf = -1;
    if (0..MAX_VIEWS as i32).contains(&st.focused_idx) {
        leaf = find_leaf_for_view(st, ws, st.focused_idx as usize);
    }
    if leaf < 0 {
        leaf = find_any_leaf(st, ws);
    }

    if leaf < 0 {
        let n = alloc_node(st, ws);
        if n < 0 {
            return;
        }
        st.layout_nodes[n as usize].view_idx = view_idx as i32;
        st.layout_root[ws as usize] = n;
        return;
    }

    let a = alloc_node(st, ws);
    let b = alloc_node(st, ws);
    if a < 0 || b < 0 {
        free_node(st, a);
        free_node(st, b);
        return;
    }

    let old_view_idx = st.layout_nodes[leaf as usize].view_idx;
    st.layout_nodes[a as usize].view_idx = old_view_idx;
    st.layout_nodes[a as usize].parent = leaf;
    st.layout_nodes[b as usize].view_idx = view_idx as i32;
    st.layout_nodes[b as usize].parent = leaf;

    let dir = pick_split_dir(st, old_view_idx);
    let node = &mut st.layout_nodes[leaf as usize];
    node.is_split = true;
    node.view_idx = -1;
    node.a = a;
    node.b = b;
    node.split_dir = dir;
}

/// Remove a view's leaf, collapsing its parent into the sibling.
pub fn remove_view(st: &mut WmState, ws: u32, view_idx: usize) {
    if ws as usize >= MAX_WORKSPACES {
        return;
    }
    let leaf = find_leaf_for_view(st, ws, view_idx);
    if leaf < 0 {
        return;
    }

    let parent = st.layout_nodes[leaf as usize].parent;
    if parent < 0 {
        free_node(st, leaf);
        st.layout_root[ws as usize] = -1;
        return;
    }

    let p = &st.layout_nodes[parent as usize];
    let sibling = if p.a == leaf { p.b } else { p.a };
    let grand = p.parent;

    if grand < 0 {
        st.layout_root[ws as usize] = sibling;
        if sibling >= 0 {
            st.layout_nodes[sibling as usize].parent = -1;
        }
    } else {
        let g = &mut st.layout_nodes[grand as usize];
        if g.a == parent {
            g.a = sibling;
        } else if g.b == parent {
            g.b = sibling;
        }
        if sibling >= 0 {
            st.layout_nodes[sibling as usize].parent = grand;
        }
    }

    free_node(st, leaf);
    free_node(st, parent);
}

#[derive(Clone, Copy, Default)]
struct Rect {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

/// Recompute geometry for the active workspace and push MOVE/RESIZE
/// commands for anything that changed. Other workspaces' views get
/// hidden; returning views get their last geometry back.
pub fn apply_layout(link: &mut WmLink, st: &mut WmState) {
    if !st.have_screen {
        if let Some((w, h)) = ui::read_screen_size() {
            st.screen_w = w;
            st.screen_h = h;
            st.have_screen = true;
        }
    }

    // Visibility pass for workspace membership.
    for i in 0..MAX_VIEWS {
        if !st.views[i].mapped || st.views[i].ui {
            continue;
        }
        if st.views[i].workspace != st.active_ws {
            let mut view = st.views[i];
            hide_view(link, &mut view);
            st.views[i] = view;
        } else if st.views[i].hidden {
            let mut view = st.views[i];
            show_view(link, &mut view);
            st.views[i] = view;
        }
    }

    let bar_h = st.ui.height() as i32;
    let ax = GAP_OUTER;
    let ay = GAP_OUTER + bar_h;
    let aw = st.screen_w as i32 - 2 * GAP_OUTER;
    let ah = st.screen_h as i32 - 2 * GAP_OUTER - bar_h;
    if aw <= 0 || ah <= 0 {
        ui::raise_and_place(link, st);
        return;
    }

    let ws = st.active_ws;
    let root = st.layout_root[ws as usize];
    if root >= 0 {
        let mut stack_idx = [0i32; MAX_LAYOUT_NODES];
        let mut stack_rect = [Rect::default(); MAX_LAYOUT_NODES];
        let mut sp = 0usize;

        stack_idx[sp] = root;
        stack_rect[sp] = Rect { x: ax, y: ay, w: aw, h: ah };
        sp += 1;

        while sp > 0 {
            sp -= 1;
            let n = stack_idx[sp];
            let r = stack_rect[sp];

            if !(0..MAX_LAYOUT_NODES as i32).contains(&n) {
                continue;
            }
            let node = st.layout_nodes[n as usize];
            if !node.used || node.workspace != ws {
                continue;
            }

            if !node.is_split {
                let vidx = node.view_idx;
                if !(0..MAX_VIEWS as i32).contains(&vidx) {
                    continue;
                }
                let view = st.views[vidx as usize];
                if !view.mapped || view.ui || view.workspace != ws || view.floating {
                    continue;
                }
                if r.w <= 0 || r.h <= 0 {
                    continue;
                }

                let nw = (r.w as u32).max(RESIZE_MIN_W);
                let nh = (r.h as u32).max(RESIZE_MIN_H);

                let need_resize = view.w != nw || view.h != nh;
                let need_move = view.x != r.x || view.y != r.y;
                if need_resize {
                    link.resize(view.client_id, view.surface_id, nw as i32, nh as i32);
                    st.views[vidx as usize].w = nw;
                    st.views[vidx as usize].h = nh;
                }
                if need_move {
                    link.move_to(view.client_id, view.surface_id, r.x, r.y);
                    st.views[vidx as usize].x = r.x;
                    st.views[vidx as usize].y = r.y;
                }
                continue;
            }

            let (a, b) = (node.a, node.b);
            if a < 0 || b < 0 {
                continue;
            }
            let gap = GAP_INNER.max(0);

            let (ra, rb) = match node.split_dir {
                SplitDir::Vertical => {
                    let left_w = ((r.w - gap) / 2).max(0);
                    let right_w = (r.w - gap - left_w).max(0);
                    (
                        Rect { x: r.x, y: r.y, w: left_w, h: r.h },
                        Rect { x: r.x + left_w + gap, y: r.y, w: right_w, h: r.h },
                    )
                }
                SplitDir::Horizontal => {
                    let top_h = ((r.h - gap) / 2).max(0);
                    let bot_h = (r.h - gap - top_h).max(0);
                    (
                        Rect { x: r.x, y: r.y, w: r.w, h: top_h },
                        Rect { x: r.x, y: r.y + top_h + gap, w: r.w, h: bot_h },
                    )
                }
            };

            stack_idx[sp] = b;
            stack_rect[sp] = rb;
            sp += 1;
            stack_idx[sp] = a;
            stack_rect[sp] = ra;
            sp += 1;
        }
    }

    ui::raise_and_place(link, st);
}

/// Leaf view indices for one workspace, for the tree/view consistency
/// invariant and tests.
pub fn leaves_of(st: &WmState, ws: u32) -> ([i32; MAX_VIEWS], usize) {
    let mut out = [-1i32; MAX_VIEWS];
    let mut n = 0;
    for node in st.layout_nodes.iter() {
        if node.used && node.workspace == ws && !node.is_split && node.view_idx >= 0 {
            out[n] = node.view_idx;
            n += 1;
        }
    }
    (out, n)
}
