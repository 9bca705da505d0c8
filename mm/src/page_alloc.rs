//! Buddy page-frame allocator.
//!
//! One descriptor per physical 4 KiB page, kept in a flat array placed
//! right after the kernel image. For each order 0..=11 a doubly linked
//! free list threads through the descriptors by PFN index; the buddy of a
//! block at PFN `p`, order `k`, is `p ^ (1 << k)`.
//!
//! Invariants:
//! - a page is on exactly one free list iff its flags are `FREE`;
//! - a free block's descriptor carries the order of the whole block;
//! - `total == used + free` in page units at all times;
//! - adjacent free buddies never coexist at the same order (freeing
//!   coalesces them immediately).
//!
//! OOM returns `None`; the allocator never panics on exhaustion. A
//! double free is rejected with a warning.

use bitflags::bitflags;

use yula_abi::PhysAddr;
use yula_lib::{IrqMutex, align_up_u64, klog_info, klog_warn};

use crate::hhdm::PhysAddrHhdm;
use crate::mm_constants::PAGE_SIZE_4KB;

/// Largest block: `2^11` pages = 8 MiB.
pub const MAX_ORDER: u32 = 11;

const INVALID_PFN: u32 = u32::MAX;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFrameFlags: u8 {
        const FREE = 0x01;
        const USED = 0x02;
        const KERNEL = 0x04;
        const DMA = 0x08;
    }
}

/// Per-page descriptor. `prev`/`next` are PFN links valid only while the
/// page heads a free block.
#[repr(C)]
#[derive(Clone, Copy)]
struct PageFrame {
    flags: PageFrameFlags,
    order: u8,
    ref_count: u32,
    prev: u32,
    next: u32,
}

impl PageFrame {
    const fn zeroed() -> Self {
        Self {
            flags: PageFrameFlags::empty(),
            order: 0,
            ref_count: 0,
            prev: INVALID_PFN,
            next: INVALID_PFN,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct FreeArea {
    head: u32,
    count: u32,
}

struct PageAllocator {
    frames: *mut PageFrame,
    total_pages: u32,
    used_pages: u32,
    free_areas: [FreeArea; (MAX_ORDER as usize) + 1],
}

// SAFETY: the descriptor array is only touched under the global IrqMutex.
unsafe impl Send for PageAllocator {}

impl PageAllocator {
    const fn new() -> Self {
        Self {
            frames: core::ptr::null_mut(),
            total_pages: 0,
            used_pages: 0,
            free_areas: [FreeArea { head: INVALID_PFN, count: 0 }; (MAX_ORDER as usize) + 1],
        }
    }

    #[inline]
    fn frame(&self, pfn: u32) -> Option<&'static mut PageFrame> {
        if pfn >= self.total_pages || self.frames.is_null() {
            return None;
        }
        // SAFETY: pfn bounds-checked against the descriptor array length;
        // exclusive access is guaranteed by the allocator lock.
        Some(unsafe { &mut *self.frames.add(pfn as usize) })
    }

    fn list_add(&mut self, order: u32, pfn: u32) {
        let old_head = self.free_areas[order as usize].head;
        if let Some(frame) = self.frame(pfn) {
            frame.next = old_head;
            frame.prev = INVALID_PFN;
            frame.order = order as u8;
            frame.flags = PageFrameFlags::FREE;
            frame.ref_count = 0;
        }
        if old_head != INVALID_PFN {
            if let Some(old) = self.frame(old_head) {
                old.prev = pfn;
            }
        }
        self.free_areas[order as usize].head = pfn;
        self.free_areas[order as usize].count += 1;
    }

    fn list_remove(&mut self, order: u32, pfn: u32) {
        let (prev, next) = match self.frame(pfn) {
            Some(frame) => (frame.prev, frame.next),
            None => return,
        };

        if prev != INVALID_PFN {
            if let Some(p) = self.frame(prev) {
                p.next = next;
            }
        } else {
            self.free_areas[order as usize].head = next;
        }
        if next != INVALID_PFN {
            if let Some(n) = self.frame(next) {
                n.prev = prev;
            }
        }
        if let Some(frame) = self.frame(pfn) {
            frame.prev = INVALID_PFN;
            frame.next = INVALID_PFN;
        }
        self.free_areas[order as usize].count =
            self.free_areas[order as usize].count.saturating_sub(1);
    }

    fn alloc(&mut self, order: u32) -> Option<u32> {
        let mut current_order = order;
        while current_order <= MAX_ORDER {
            if self.free_areas[current_order as usize].head != INVALID_PFN {
                break;
            }
            current_order += 1;
        }
        if current_order > MAX_ORDER {
            return None;
        }

        let pfn = self.free_areas[current_order as usize].head;
        self.list_remove(current_order, pfn);

        if let Some(frame) = self.frame(pfn) {
            frame.flags = PageFrameFlags::USED;
            frame.ref_count = 1;
        }

        // Split the surplus halves back onto the smaller lists, right
        // half first each time.
        while current_order > order {
            current_order -= 1;
            let buddy_pfn = pfn + (1u32 << current_order);
            self.list_add(current_order, buddy_pfn);
        }

        if let Some(frame) = self.frame(pfn) {
            frame.order = order as u8;
        }
        self.used_pages += 1u32 << order;
        Some(pfn)
    }

    fn free(&mut self, pfn: u32, order: u32) -> Result<(), ()> {
        {
            let frame = self.frame(pfn).ok_or(())?;
            if frame.flags == PageFrameFlags::FREE {
                // Double free.
                return Err(());
            }
        }

        self.used_pages = self.used_pages.saturating_sub(1u32 << order);

        let mut pfn = pfn;
        let mut order = order;

        while order < MAX_ORDER {
            let buddy_pfn = pfn ^ (1u32 << order);
            if buddy_pfn >= self.total_pages {
                break;
            }
            let buddy_mergeable = self
                .frame(buddy_pfn)
                .map(|b| b.flags == PageFrameFlags::FREE && b.order as u32 == order)
                .unwrap_or(false);
            if !buddy_mergeable {
                break;
            }

            self.list_remove(order, buddy_pfn);
            if let Some(buddy) = self.frame(buddy_pfn) {
                buddy.order = 0;
            }

            // The merged block starts at the lower of the two PFNs.
            pfn &= buddy_pfn;
            order += 1;
        }

        self.list_add(order, pfn);
        Ok(())
    }
}

static PAGE_ALLOCATOR: IrqMutex<PageAllocator> = IrqMutex::new(PageAllocator::new());

/// Initialize the allocator over `[0, mem_size)` with the kernel image
/// ending at `kernel_end`. The descriptor array is carved out directly
/// after the image; everything below the array end stays reserved.
pub fn pmm_init(mem_size: u64, kernel_end: PhysAddr) {
    let total_pages = (mem_size / PAGE_SIZE_4KB) as u32;
    assert!(total_pages > 0, "pmm_init: no memory");

    let mem_map_phys = PhysAddr::new(align_up_u64(kernel_end.as_u64(), PAGE_SIZE_4KB));
    let mem_map_size = total_pages as u64 * core::mem::size_of::<PageFrame>() as u64;
    let mem_map = mem_map_phys
        .to_virt_checked()
        .expect("pmm_init: direct map not ready")
        .as_mut_ptr::<PageFrame>();

    let first_free_pfn =
        (align_up_u64(mem_map_phys.as_u64() + mem_map_size, PAGE_SIZE_4KB) / PAGE_SIZE_4KB) as u32;

    let mut alloc = PAGE_ALLOCATOR.lock();
    alloc.frames = mem_map;
    alloc.total_pages = total_pages;
    alloc.used_pages = total_pages;
    alloc.free_areas = [FreeArea { head: INVALID_PFN, count: 0 }; (MAX_ORDER as usize) + 1];

    for pfn in 0..total_pages {
        if let Some(frame) = alloc.frame(pfn) {
            *frame = PageFrame::zeroed();
        }
    }

    // Kernel image + descriptor array: permanently reserved.
    for pfn in 0..first_free_pfn.min(total_pages) {
        if let Some(frame) = alloc.frame(pfn) {
            frame.flags = PageFrameFlags::USED | PageFrameFlags::KERNEL;
            frame.ref_count = 1;
        }
    }

    let max_block = 1u32 << MAX_ORDER;
    let mut pfn = first_free_pfn;

    // Mis-aligned prefix, one page at a time.
    while pfn < total_pages && pfn & (max_block - 1) != 0 {
        if let Some(frame) = alloc.frame(pfn) {
            frame.flags = PageFrameFlags::USED;
        }
        let _ = alloc.free(pfn, 0);
        pfn += 1;
    }

    // Aligned body: whole max-order blocks straight onto the top list.
    while pfn + max_block <= total_pages {
        alloc.list_add(MAX_ORDER, pfn);
        alloc.used_pages -= max_block;
        pfn += max_block;
    }

    // Suffix.
    while pfn < total_pages {
        if let Some(frame) = alloc.frame(pfn) {
            frame.flags = PageFrameFlags::USED;
        }
        let _ = alloc.free(pfn, 0);
        pfn += 1;
    }

    let free = alloc.total_pages - alloc.used_pages;
    drop(alloc);

    klog_info!(
        "pmm: {} pages tracked, {} free, descriptor array at {:#x}",
        total_pages,
        free,
        mem_map_phys.as_u64()
    );
}

/// Allocate a block of `2^order` pages. `None` on OOM or bad order.
pub fn alloc_pages(order: u32) -> Option<PhysAddr> {
    if order > MAX_ORDER {
        return None;
    }
    let mut alloc = PAGE_ALLOCATOR.lock();
    let pfn = alloc.alloc(order)?;
    Some(PhysAddr::from_pfn(pfn))
}

/// Free a block previously returned by [`alloc_pages`] at the same order.
pub fn free_pages(addr: PhysAddr, order: u32) {
    if addr.is_null() || order > MAX_ORDER {
        return;
    }
    let pfn = addr.pfn();
    let mut alloc = PAGE_ALLOCATOR.lock();
    if pfn >= alloc.total_pages {
        klog_warn!("pmm: free of untracked address {:#x}", addr.as_u64());
        return;
    }
    if alloc.free(pfn, order).is_err() {
        klog_warn!("pmm: double free at pfn {}", pfn);
    }
}

/// Single-page convenience wrappers.
pub fn alloc_block() -> Option<PhysAddr> {
    alloc_pages(0)
}

pub fn free_block(addr: PhysAddr) {
    free_pages(addr, 0)
}

pub fn pmm_get_total_blocks() -> u32 {
    PAGE_ALLOCATOR.lock().total_pages
}

pub fn pmm_get_used_blocks() -> u32 {
    PAGE_ALLOCATOR.lock().used_pages
}

pub fn pmm_get_free_blocks() -> u32 {
    let alloc = PAGE_ALLOCATOR.lock();
    alloc.total_pages - alloc.used_pages
}

/// Number of blocks currently on the free list of `order`.
pub fn pmm_free_list_len(order: u32) -> u32 {
    if order > MAX_ORDER {
        return 0;
    }
    PAGE_ALLOCATOR.lock().free_areas[order as usize].count
}

/// Reference counting for pages shared across address spaces (SHM).
pub fn page_inc_ref(addr: PhysAddr) -> Result<u32, ()> {
    let alloc = PAGE_ALLOCATOR.lock();
    let pfn = addr.pfn();
    if pfn >= alloc.total_pages {
        return Err(());
    }
    let frame = alloc.frame(pfn).ok_or(())?;
    if !frame.flags.contains(PageFrameFlags::USED) {
        return Err(());
    }
    frame.ref_count = frame.ref_count.saturating_add(1);
    Ok(frame.ref_count)
}

pub fn page_get_ref(addr: PhysAddr) -> u32 {
    let alloc = PAGE_ALLOCATOR.lock();
    let pfn = addr.pfn();
    if pfn >= alloc.total_pages {
        return 0;
    }
    alloc.frame(pfn).map(|f| f.ref_count).unwrap_or(0)
}

/// Drop one reference to a single page, freeing it on the last.
pub fn page_dec_ref_and_maybe_free(addr: PhysAddr) {
    let should_free = {
        let alloc = PAGE_ALLOCATOR.lock();
        let pfn = addr.pfn();
        if pfn >= alloc.total_pages {
            return;
        }
        match alloc.frame(pfn) {
            Some(frame) if frame.ref_count > 1 => {
                frame.ref_count -= 1;
                false
            }
            Some(_) => true,
            None => false,
        }
    };
    if should_free {
        free_block(addr);
    }
}

/// An order-sized block that frees itself on drop.
pub struct OwnedPageBlock {
    phys: PhysAddr,
    order: u32,
}

impl OwnedPageBlock {
    pub fn alloc(order: u32) -> Option<Self> {
        alloc_pages(order).map(|phys| Self { phys, order })
    }

    /// Allocate and zero-fill through the direct map.
    pub fn alloc_zeroed(order: u32) -> Option<Self> {
        let block = Self::alloc(order)?;
        for i in 0..(1u64 << order) {
            let page = block.phys.offset(i * PAGE_SIZE_4KB);
            if crate::hhdm::zero_physical_page(page).is_err() {
                return None; // block freed by drop
            }
        }
        Some(block)
    }

    #[inline]
    pub fn phys_addr(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Give up ownership; the caller must `free_pages` at the same order.
    pub fn into_phys(self) -> PhysAddr {
        let phys = self.phys;
        core::mem::forget(self);
        phys
    }
}

impl Drop for OwnedPageBlock {
    fn drop(&mut self) {
        if !self.phys.is_null() {
            free_pages(self.phys, self.order);
        }
    }
}

unsafe impl Send for OwnedPageBlock {}
