//! Composition: committed surfaces, the WM preview outline, and the
//! cursor, painted back-to-front into the mapped framebuffer.

use super::{Compositor, MAX_CLIENTS, MAX_SURFACES_PER_CLIENT};

const BACKGROUND: u32 = 0xFF20_2430;
const PREVIEW_COLOR: u32 = 0xFFE0_A030;
const CURSOR_COLOR: u32 = 0xFFF0_F0F0;
const CURSOR_SIZE: i32 = 8;

struct Target {
    base: u64,
    width: i32,
    height: i32,
    pitch: u32,
}

impl Target {
    #[inline]
    fn row(&self, y: i32) -> *mut u32 {
        // SAFETY: y is clipped by every caller; the mapping spans
        // pitch * height pixels.
        unsafe { (self.base as *mut u32).add(y as usize * self.pitch as usize) }
    }

    fn fill(&self, color: u32) {
        for y in 0..self.height {
            let row = self.row(y);
            for x in 0..self.width as usize {
                unsafe { row.add(x).write_volatile(color) };
            }
        }
    }

    fn fill_rect(&self, x0: i32, y0: i32, w: i32, h: i32, color: u32) {
        let x_start = x0.max(0);
        let y_start = y0.max(0);
        let x_end = (x0 + w).min(self.width);
        let y_end = (y0 + h).min(self.height);
        for y in y_start..y_end {
            let row = self.row(y);
            for x in x_start..x_end {
                unsafe { row.add(x as usize).write_volatile(color) };
            }
        }
    }

    fn outline_rect(&self, x0: i32, y0: i32, w: i32, h: i32, color: u32) {
        self.fill_rect(x0, y0, w, 2, color);
        self.fill_rect(x0, y0 + h - 2, w, 2, color);
        self.fill_rect(x0, y0, 2, h, color);
        self.fill_rect(x0 + w - 2, y0, 2, h, color);
    }

    fn blit_surface(&self, surface: &super::Surface) {
        let x_start = surface.x.max(0);
        let y_start = surface.y.max(0);
        let x_end = (surface.x + surface.width as i32).min(self.width);
        let y_end = (surface.y + surface.height as i32).min(self.height);
        if x_end <= x_start || y_end <= y_start || surface.map_base == 0 {
            return;
        }

        let src_x0 = (x_start - surface.x) as usize;
        let copy_w = (x_end - x_start) as usize;

        for y in y_start..y_end {
            let src_y = (y - surface.y) as usize;
            // SAFETY: row bounds follow from the clip above and the
            // attach-time stride*height <= map_size check.
            unsafe {
                let src = (surface.map_base as *const u32)
                    .add(src_y * surface.stride as usize + src_x0);
                let dst = self.row(y).add(x_start as usize);
                core::ptr::copy_nonoverlapping(src, dst, copy_w);
            }
        }
    }
}

/// Full repaint: background, surfaces by ascending z, preview, cursor.
pub fn compose(server: &mut Compositor) {
    let target = Target {
        base: server.fb_base(),
        width: server.fb_width() as i32,
        height: server.fb_height() as i32,
        pitch: server.fb_pitch(),
    };
    if target.base == 0 || target.width <= 0 || target.height <= 0 {
        return;
    }

    target.fill(BACKGROUND);

    // Painter's order over a small fixed population: repeatedly take the
    // lowest not-yet-drawn z.
    let mut drawn = [[false; MAX_SURFACES_PER_CLIENT]; MAX_CLIENTS];
    loop {
        let mut best: Option<(usize, usize, u32)> = None;
        for (ci, client) in server.clients.iter().enumerate() {
            if !client.connected {
                continue;
            }
            for (si, surface) in client.surfaces.iter().enumerate() {
                if !surface.attached || !surface.committed || drawn[ci][si] {
                    continue;
                }
                match best {
                    Some((_, _, z)) if surface.z >= z => {}
                    _ => best = Some((ci, si, surface.z)),
                }
            }
        }
        let Some((ci, si, _)) = best else {
            break;
        };
        drawn[ci][si] = true;
        target.blit_surface(&server.clients[ci].surfaces[si]);
    }

    if let Some((x, y, w, h)) = server.preview_rect {
        target.outline_rect(x, y, w as i32, h as i32, PREVIEW_COLOR);
    }

    if server.input.have_mouse() {
        let (mx, my) = server.input.mouse_pos();
        target.fill_rect(mx, my, CURSOR_SIZE, CURSOR_SIZE, CURSOR_COLOR);
    }
}
