//! Higher-half direct map translation.
//!
//! The boot protocol hands us an offset at which all physical memory is
//! linearly mapped. Allocator bookkeeping and page-table edits go through
//! these helpers; nothing else in the tree dereferences a `PhysAddr`.

use core::sync::atomic::{AtomicU64, Ordering};

use yula_abi::{PhysAddr, VirtAddr};

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

pub fn hhdm_init(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

#[inline]
pub fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

pub trait PhysAddrHhdm {
    /// Translate through the direct map. Panics if the map is not up yet.
    fn to_virt(self) -> VirtAddr;
    fn to_virt_checked(self) -> Option<VirtAddr>;
}

impl PhysAddrHhdm for PhysAddr {
    #[inline]
    fn to_virt(self) -> VirtAddr {
        self.to_virt_checked().expect("HHDM not initialized")
    }

    #[inline]
    fn to_virt_checked(self) -> Option<VirtAddr> {
        let offset = hhdm_offset();
        if offset == 0 {
            return None;
        }
        VirtAddr::try_new(offset.wrapping_add(self.as_u64()))
    }
}

/// Zero one physical page through the direct map.
pub fn zero_physical_page(phys: PhysAddr) -> Result<(), ()> {
    match phys.to_virt_checked() {
        Some(virt) => {
            unsafe {
                core::ptr::write_bytes(
                    virt.as_mut_ptr::<u8>(),
                    0,
                    crate::mm_constants::PAGE_SIZE_4KB as usize,
                );
            }
            Ok(())
        }
        None => Err(()),
    }
}
