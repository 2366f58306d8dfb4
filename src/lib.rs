//! This crate implements a fixed-capacity, single-pool memory allocator
//! built on boundary-tag headers, best-fit search, and bidirectional
//! coalescing.
//!
//!  - **Every allocation is served from one pre-sized pool.** The pool never
//!    grows and blocks are never relocated behind the caller's back, so the
//!    addresses handed out stay stable for the whole session. This makes the
//!    allocator a drop-in memory source for embedded interpreters that pin
//!    their objects.
//!
//!  - **The memory pool is provided by an application.** A `static` array
//!    works for global allocation; a block carved out of another allocator
//!    works for arena-style use.
//!
//!  - **This crate supports `#![no_std]`.** It can be used in bare-metal and
//!    RTOS-based applications.
//!
//! # Examples
//!
//! ## `Heap`: Core API
//!
//! ```rust
//! use btfit::{Heap, TagWord};
//! use std::mem::MaybeUninit;
//!
//! let mut pool = [MaybeUninit::<TagWord>::uninit(); 1024];
//! let mut heap = Heap::new(&mut pool).unwrap();
//!
//! // Data regions are word-aligned (4 bytes).
//! unsafe {
//!     let mut ptr1 = heap.allocate(4).unwrap().cast::<u32>();
//!     let mut ptr2 = heap.allocate(4).unwrap().cast::<u32>();
//!     *ptr1.as_mut() = 42;
//!     *ptr2.as_mut() = 56;
//!     assert_eq!(*ptr1.as_ref(), 42);
//!     assert_eq!(*ptr2.as_ref(), 56);
//!     heap.deallocate(Some(ptr1.cast()));
//!     heap.deallocate(Some(ptr2.cast()));
//! }
//! ```
//!
//! ## `heap_hook`: Host Runtime Callback
//!
//! A host runtime that funnels every allocate, resize, and free through one
//! `realloc`-shaped entry point registers [`heap_hook`] with the heap as its
//! userdata. See the [`hook`](fn@heap_hook) documentation for details.
//!
//! # Details
//!
//! ## Design Notes
//!
//!  - The free list is implicit: headers laid out contiguously across the
//!    pool form a doubly-linked chain through word offsets, so no side index
//!    is maintained.
//!
//!  - The end of the pool is capped by a margin header (a permanently
//!    occupied block with no data region) instead of a terminal flag on a
//!    normal block. Coalescing can therefore never run past the pool's end.
//!
//!  - There is no distinct backward-merge routine. Freeing applies one
//!    forward-merge primitive at two positions (the freed header and its
//!    predecessor), which converges to maximal coalesced runs across a
//!    sequence of frees.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod heap;
mod hook;
pub mod tag;
mod utils;
pub use self::{heap::*, hook::*, tag::TagWord};

#[cfg(any(test, feature = "std"))]
extern crate std;
