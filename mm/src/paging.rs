//! Minimal 4-level page-table mapper.
//!
//! Just enough walking to map and unmap single 4 KiB pages in an arbitrary
//! root: the shared-memory window, the user heap, and the framebuffer
//! staging area are all built from single-page mappings. Intermediate
//! tables are allocated from the buddy allocator on demand and zeroed.
//! Large pages, TLB shootdown policy, and the boot-time kernel mapping are
//! owned by the platform layer.

use core::sync::atomic::{AtomicU64, Ordering};

use yula_abi::{PhysAddr, VirtAddr};
use yula_lib::klog_warn;

use crate::hhdm::PhysAddrHhdm;
use crate::page_alloc::{alloc_block, free_block};

pub const PTE_PRESENT: u64 = 1 << 0;
pub const PTE_WRITABLE: u64 = 1 << 1;
pub const PTE_USER: u64 = 1 << 2;
pub const PTE_NO_EXEC: u64 = 1 << 63;

const PTE_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;
const ENTRIES_PER_TABLE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    NoMemory,
    NotMapped,
    AlreadyMapped,
    BadAddress,
}

/// Physical root (PML4) of the kernel's own address space, registered at
/// boot from the tables the loader built.
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

pub fn set_kernel_root(root: PhysAddr) {
    KERNEL_ROOT.store(root.as_u64(), Ordering::Release);
}

pub fn kernel_root() -> PhysAddr {
    PhysAddr::new(KERNEL_ROOT.load(Ordering::Acquire))
}

#[inline]
fn table_mut(phys: PhysAddr) -> Option<*mut u64> {
    phys.to_virt_checked().map(|v| v.as_mut_ptr::<u64>())
}

#[inline]
fn index_for(virt: VirtAddr, level: u32) -> usize {
    ((virt.as_u64() >> (12 + 9 * level)) & 0x1FF) as usize
}

/// Walk to the PTE for `virt`, optionally allocating intermediate tables.
/// Returns a pointer to the level-0 entry.
fn walk(root: PhysAddr, virt: VirtAddr, create: bool) -> Result<*mut u64, MapError> {
    let mut table = table_mut(root).ok_or(MapError::BadAddress)?;

    for level in (1..=3).rev() {
        let idx = index_for(virt, level);
        // SAFETY: `table` points at a zero- or loader-initialized 4 KiB
        // table reachable through the direct map; idx < 512.
        let entry = unsafe { table.add(idx) };
        let value = unsafe { entry.read_volatile() };

        let next_phys = if value & PTE_PRESENT != 0 {
            PhysAddr::new(value & PTE_ADDR_MASK)
        } else {
            if !create {
                return Err(MapError::NotMapped);
            }
            let fresh = alloc_block().ok_or(MapError::NoMemory)?;
            if crate::hhdm::zero_physical_page(fresh).is_err() {
                free_block(fresh);
                return Err(MapError::BadAddress);
            }
            // Intermediate entries are maximally permissive; the leaf
            // carries the real protection bits.
            unsafe {
                entry.write_volatile(fresh.as_u64() | PTE_PRESENT | PTE_WRITABLE | PTE_USER);
            }
            fresh
        };

        table = table_mut(next_phys).ok_or(MapError::BadAddress)?;
    }

    Ok(unsafe { table.add(index_for(virt, 0)) })
}

/// Map one 4 KiB page. Fails if the slot is already populated.
pub fn map_page_4kb(root: PhysAddr, virt: VirtAddr, phys: PhysAddr, flags: u64) -> Result<(), MapError> {
    if !virt.is_aligned(4096) || !phys.is_aligned(4096) {
        return Err(MapError::BadAddress);
    }
    let pte = walk(root, virt, true)?;
    let existing = unsafe { pte.read_volatile() };
    if existing & PTE_PRESENT != 0 {
        return Err(MapError::AlreadyMapped);
    }
    unsafe {
        pte.write_volatile(phys.as_u64() | flags | PTE_PRESENT);
    }
    Ok(())
}

/// Unmap one page; returns the physical address that was mapped there.
pub fn unmap_page(root: PhysAddr, virt: VirtAddr) -> Result<PhysAddr, MapError> {
    let pte = walk(root, virt, false)?;
    let existing = unsafe { pte.read_volatile() };
    if existing & PTE_PRESENT == 0 {
        return Err(MapError::NotMapped);
    }
    unsafe {
        pte.write_volatile(0);
    }
    Ok(PhysAddr::new(existing & PTE_ADDR_MASK))
}

/// Translate `virt` in `root`, or `None` if unmapped.
pub fn translate(root: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
    let pte = walk(root, virt, false).ok()?;
    let value = unsafe { pte.read_volatile() };
    if value & PTE_PRESENT == 0 {
        return None;
    }
    Some(PhysAddr::new((value & PTE_ADDR_MASK) | virt.page_offset()))
}

/// Allocate a fresh PML4 sharing the kernel's higher half.
pub fn create_address_space_root() -> Result<PhysAddr, MapError> {
    let kernel = kernel_root();
    if kernel.is_null() {
        return Err(MapError::BadAddress);
    }
    let fresh = alloc_block().ok_or(MapError::NoMemory)?;
    if crate::hhdm::zero_physical_page(fresh).is_err() {
        free_block(fresh);
        return Err(MapError::BadAddress);
    }

    let src = table_mut(kernel).ok_or(MapError::BadAddress)?;
    let dst = table_mut(fresh).ok_or(MapError::BadAddress)?;
    // Upper half (kernel) entries are shared; lower half starts empty.
    for idx in ENTRIES_PER_TABLE / 2..ENTRIES_PER_TABLE {
        unsafe {
            dst.add(idx).write_volatile(src.add(idx).read_volatile());
        }
    }
    Ok(fresh)
}

/// Free the lower-half table hierarchy of a dead address space. Leaf
/// pages themselves are owned and freed by their subsystems (heap pages
/// by the process teardown, SHM pages by their objects).
pub fn destroy_address_space_root(root: PhysAddr) {
    if root.is_null() || root == kernel_root() {
        klog_warn!("paging: refusing to destroy kernel root");
        return;
    }
    free_table_level(root, 3, true);
    free_block(root);
}

fn free_table_level(table_phys: PhysAddr, level: u32, top: bool) {
    let Some(table) = table_mut(table_phys) else {
        return;
    };
    let limit = if top { ENTRIES_PER_TABLE / 2 } else { ENTRIES_PER_TABLE };
    for idx in 0..limit {
        let value = unsafe { table.add(idx).read_volatile() };
        if value & PTE_PRESENT == 0 {
            continue;
        }
        let child = PhysAddr::new(value & PTE_ADDR_MASK);
        if level > 1 {
            free_table_level(child, level - 1, false);
            free_block(child);
        }
        unsafe {
            table.add(idx).write_volatile(0);
        }
    }
}
