//! Caller pointer validation and copying.
//!
//! Syscall handlers run on the calling task with its address space
//! installed, so a validated pointer can be dereferenced directly.
//! Validation rejects NULL, non-canonical addresses, and ranges that
//! wrap. Programs in this tree run on kernel-half stacks, so both
//! halves are accepted; rejecting kernel-half pointers from genuine
//! ring-3 callers is the trap gate's job in the external user-mode
//! path.

use yula_abi::VirtAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAccessError;

fn check_range(addr: u64, len: usize) -> Result<(), UserAccessError> {
    if addr == 0 {
        return Err(UserAccessError);
    }
    let end = addr.checked_add(len as u64).ok_or(UserAccessError)?;
    if VirtAddr::try_new(addr).is_none() || VirtAddr::try_new(end).is_none() {
        return Err(UserAccessError);
    }
    Ok(())
}

/// Borrow a user byte range for reading.
pub fn user_slice<'a>(addr: u64, len: usize) -> Result<&'a [u8], UserAccessError> {
    check_range(addr, len)?;
    // SAFETY: range validated; the caller's address space is current.
    Ok(unsafe { core::slice::from_raw_parts(addr as *const u8, len) })
}

/// Borrow a user byte range for writing.
pub fn user_slice_mut<'a>(addr: u64, len: usize) -> Result<&'a mut [u8], UserAccessError> {
    check_range(addr, len)?;
    // SAFETY: as above.
    Ok(unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len) })
}

/// Read a `T` from a user address (unaligned-tolerant).
pub fn user_read<T: Copy>(addr: u64) -> Result<T, UserAccessError> {
    check_range(addr, core::mem::size_of::<T>())?;
    // SAFETY: range validated.
    Ok(unsafe { core::ptr::read_unaligned(addr as *const T) })
}

/// Write a `T` to a user address.
pub fn user_write<T: Copy>(addr: u64, value: T) -> Result<(), UserAccessError> {
    check_range(addr, core::mem::size_of::<T>())?;
    // SAFETY: range validated.
    unsafe { core::ptr::write_unaligned(addr as *mut T, value) };
    Ok(())
}

/// Copy a NUL-terminated user string of at most `max` bytes into `buf`;
/// returns the length.
pub fn user_cstr(addr: u64, buf: &mut [u8], max: usize) -> Result<usize, UserAccessError> {
    let limit = max.min(buf.len());
    let src = user_slice(addr, limit)?;
    for (i, &b) in src.iter().enumerate() {
        if b == 0 {
            return Ok(i);
        }
        buf[i] = b;
    }
    Err(UserAccessError)
}
