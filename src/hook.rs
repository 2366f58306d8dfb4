//! The `realloc`-style callback a host runtime registers.
use core::{ffi::c_void, ptr::NonNull};

use crate::Heap;

/// Allocation callback for host runtimes that funnel every allocate,
/// resize, and free through one `realloc`-shaped entry point.
///
///  - `ud` is the [`Heap`] serving the session.
///  - `ptr` is the previous allocation, or null.
///  - `osize` is the previous allocation's size in bytes (ignored when
///    `ptr` is null).
///  - `nsize` is the requested size in bytes; zero frees `ptr`.
///
/// A null return with `nsize != 0` signals capacity exhaustion; the old
/// allocation is left untouched in that case.
///
/// # Safety
///
///  - `ud` must point to a live `Heap` with exclusive access for the
///    duration of the call.
///  - `ptr` and `osize` must satisfy the [`Heap::reallocate`] contract.
pub unsafe extern "C" fn heap_hook(
    ud: *mut c_void,
    ptr: *mut c_void,
    osize: usize,
    nsize: usize,
) -> *mut c_void {
    let heap: &mut Heap<'_> = &mut *ud.cast();
    match heap.reallocate(NonNull::new(ptr.cast()), osize, nsize) {
        Some(new_ptr) => new_ptr.as_ptr().cast(),
        None => core::ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use core::{mem::MaybeUninit, ptr};

    use super::*;
    use crate::TagWord;

    #[test]
    fn drives_a_full_session() {
        let mut pool = [MaybeUninit::<TagWord>::uninit(); 256];
        let mut heap = Heap::new(&mut pool).unwrap();
        let ud = &mut heap as *mut Heap<'_> as *mut c_void;

        unsafe {
            let p = heap_hook(ud, ptr::null_mut(), 0, 16);
            assert!(!p.is_null());
            (p as *mut u8).write_bytes(0x5a, 16);

            let q = heap_hook(ud, p, 16, 64);
            assert!(!q.is_null());
            assert_eq!((q as *const u8).read(), 0x5a);

            assert!(heap_hook(ud, q, 64, 0).is_null());
        }

        // Everything went back into a single free block.
        assert_eq!(heap.headers().count(), 2);
    }

    #[test]
    fn signals_exhaustion_with_null() {
        let mut pool = [MaybeUninit::<TagWord>::uninit(); 8];
        let mut heap = Heap::new(&mut pool).unwrap();
        let ud = &mut heap as *mut Heap<'_> as *mut c_void;

        unsafe {
            assert!(heap_hook(ud, ptr::null_mut(), 0, 4096).is_null());
        }
    }

    #[test]
    fn free_of_null_is_a_noop() {
        let mut pool = [MaybeUninit::<TagWord>::uninit(); 64];
        let mut heap = Heap::new(&mut pool).unwrap();
        let ud = &mut heap as *mut Heap<'_> as *mut c_void;

        unsafe {
            assert!(heap_hook(ud, ptr::null_mut(), 0, 0).is_null());
        }
        assert_eq!(heap.headers().count(), 2);
    }
}
