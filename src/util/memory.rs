use crate::util::Address;
use libc::{PROT_EXEC, PROT_READ, PROT_WRITE};
use std::io::{Error, Result};

/// Map a fresh anonymous region that may hold machine instructions. The
/// region is readable, writable and executable, and guaranteed zeroed by
/// the OS. Platforms that enforce write-xor-execute are expected to seal
/// the region with [`mprotect_exec`] and reopen it with [`munprotect_exec`]
/// from their code-write coordinator.
pub fn mmap_exec(size: usize) -> Result<Address> {
    let prot = PROT_READ | PROT_WRITE | PROT_EXEC;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE;
    let ret = unsafe { libc::mmap(std::ptr::null_mut(), size, prot, flags, -1, 0) };
    if ret == libc::MAP_FAILED {
        Err(Error::last_os_error())
    } else {
        Ok(Address::from_mut_ptr(ret))
    }
}

pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

pub fn zero(start: Address, len: usize) {
    let ptr = start.to_mut_ptr();
    wrap_libc_call(&|| unsafe { libc::memset(ptr, 0, len) }, ptr).unwrap()
}

/// Revoke write permission, leaving the region executable.
pub fn mprotect_exec(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, PROT_READ | PROT_EXEC) },
        0,
    )
}

/// Restore write permission on an executable region.
pub fn munprotect_exec(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe {
            libc::mprotect(
                start.to_mut_ptr(),
                size,
                PROT_READ | PROT_WRITE | PROT_EXEC,
            )
        },
        0,
    )
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        /// Invalidate the instruction cache for the given region. x86
        /// keeps instruction fetch coherent with data writes, so this is
        /// a no-op there.
        pub fn flush_icache(_start: Address, _size: usize) {}
    } else if #[cfg(target_os = "macos")] {
        /// Invalidate the instruction cache for the given region.
        pub fn flush_icache(start: Address, size: usize) {
            extern "C" {
                fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
            }
            unsafe { sys_icache_invalidate(start.to_mut_ptr(), size) }
        }
    } else {
        /// Invalidate the instruction cache for the given region.
        pub fn flush_icache(start: Address, size: usize) {
            extern "C" {
                fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
            }
            let end = start + size;
            unsafe { __clear_cache(start.to_mut_ptr(), end.to_mut_ptr()) }
        }
    }
}
