//! The best-fit allocator core
use core::{fmt, marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::{
    tag::{TagWord, MAX_OFFSET},
    utils::{nonnull_slice_len, nonnull_slice_start},
};

/// The number of words occupied by a block header.
pub const HEADER_WORDS: usize = 2;

/// The size of one pool word in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<TagWord>();

/// The smallest usable pool: one free header plus the margin.
const MIN_POOL_WORDS: usize = HEADER_WORDS * 2;

#[cfg_attr(doc, svgbobdoc::transform)]
/// A fixed-capacity memory pool threaded with boundary-tag block headers.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///         ,------- next-offset -------,          ,-- next-offset --,
///         |                           v          |                 v
/// ,-------+-------+==========+--------+----------+=====+-----------+-----------,
/// | next  | prev  | data ... | next   | prev     | ... | next      | prev      |
/// '-------+-------+==========+--------+---+------+=====+-----------+-----------'
///  block 0 (allocated)        block 1     |       ...    "margin" (permanently
///         ^                   (free)      |              occupied, no data)
///         '------ prev-offset ------------'
/// ```
/// </center>
///
/// Each header is two [`TagWord`]s. The first packs `HAS_NEXT` with the
/// forward offset to the next header; the second packs `ALLOCATED` with the
/// backward offset to the previous header. A block's data region starts
/// immediately after its header and spans `next_offset - 2` words.
///
/// # Properties
///
/// The pool is the entire addressable universe: it is sized once at
/// construction and never grows, moves, or shrinks. Returned pointers stay
/// valid until the same pointer is released (or relocated by
/// [`Self::reallocate`], which always moves).
///
/// Allocation walks the whole chain and picks the *smallest* free block that
/// satisfies the request, ties going to the earlier header, so the placement
/// of any sequence of requests is deterministic.
#[derive(Debug)]
pub struct Heap<'pool> {
    pool: NonNull<TagWord>,
    len: usize,
    _phantom: PhantomData<&'pool mut [TagWord]>,
}

// Safety: All pool words referenced by a particular instance of `Heap` are
//         logically owned by that `Heap` and have no interior mutability, so
//         these are safe.
unsafe impl Send for Heap<'_> {}
unsafe impl Sync for Heap<'_> {}

/// The error type for binding a pool to a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool length in words exceeds the range of the offset encoding.
    TooLarge {
        /// The rejected pool length in words.
        len: usize,
    },
    /// The pool cannot hold an initial free header plus the margin.
    TooSmall {
        /// The rejected pool length in words.
        len: usize,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PoolError::TooLarge { len } => write!(
                f,
                "pool of {} words exceeds the offset encoding's range ({} words)",
                len, MAX_OFFSET
            ),
            PoolError::TooSmall { len } => write!(
                f,
                "pool of {} words cannot hold a free header and the margin ({} words)",
                len, MIN_POOL_WORDS
            ),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
impl std::error::Error for PoolError {}

/// One violation found by [`Heap::check_consistency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corruption {
    /// The word index of the offending header.
    pub header: usize,
    /// What is wrong with it.
    pub kind: CorruptionKind,
}

/// The kinds of chain corruption the checker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// The next-offset leaves the pool or is too small to host a header.
    NextOutOfBounds {
        /// The decoded next-offset.
        offset: usize,
    },
    /// The prev-offset points before the start of the pool.
    PrevOutOfBounds {
        /// The decoded prev-offset.
        offset: usize,
    },
    /// The successor's prev-offset does not mirror this header's
    /// next-offset.
    BrokenBackLink {
        /// The distance just traversed to reach this header.
        expected: usize,
        /// The prev-offset actually stored in this header.
        actual: usize,
    },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CorruptionKind::NextOutOfBounds { offset } => write!(
                f,
                "header at word {}: next-offset {} leaves the pool",
                self.header, offset
            ),
            CorruptionKind::PrevOutOfBounds { offset } => write!(
                f,
                "header at word {}: prev-offset {} points before the pool",
                self.header, offset
            ),
            CorruptionKind::BrokenBackLink { expected, actual } => write!(
                f,
                "header at word {}: prev-offset is {} but the predecessor's next-offset is {}",
                self.header, actual, expected
            ),
        }
    }
}

impl<'pool> Heap<'pool> {
    /// Bind a pool and initialize it to a single free block.
    ///
    /// The pool is zero-filled first; any previous contents are lost.
    ///
    /// # Examples
    ///
    /// ```
    /// use btfit::{Heap, TagWord};
    /// use std::mem::MaybeUninit;
    /// let mut pool = [MaybeUninit::<TagWord>::uninit(); 1024];
    /// let mut heap = Heap::new(&mut pool).unwrap();
    /// assert!(heap.allocate(16).is_some());
    /// ```
    ///
    /// # Errors
    ///
    /// Fails with [`PoolError::TooLarge`] if the pool length cannot be
    /// represented in the offset encoding, and with [`PoolError::TooSmall`]
    /// if it cannot hold an initial free header plus the margin.
    #[inline]
    pub fn new(pool: &'pool mut [MaybeUninit<TagWord>]) -> Result<Self, PoolError> {
        // Safety: `pool` is a mutable reference, which guarantees the absence
        // of aliasing references. Being `'pool` means it will outlive `self`.
        unsafe { Self::with_pool_ptr(NonNull::new(pool as *mut [_]).unwrap()) }
    }

    /// Bind a pool specified by a raw slice pointer.
    ///
    /// Validation happens before the first write, so a failing call never
    /// touches the pointed-to memory.
    ///
    /// # Safety
    ///
    /// On success the pool is considered owned by the returned `Heap`. It
    /// must be valid for reads and writes for its whole length and must
    /// outlive the `Heap`.
    pub unsafe fn with_pool_ptr(
        pool: NonNull<[MaybeUninit<TagWord>]>,
    ) -> Result<Self, PoolError> {
        let len = nonnull_slice_len(pool);
        if len > MAX_OFFSET {
            return Err(PoolError::TooLarge { len });
        }
        if len < MIN_POOL_WORDS {
            return Err(PoolError::TooSmall { len });
        }
        let mut heap = Self {
            pool: nonnull_slice_start(pool).cast(),
            len,
            _phantom: PhantomData,
        };
        heap.clear();
        Ok(heap)
    }

    /// Re-initialize the pool to a single free block spanning it.
    ///
    /// All outstanding allocations are invalidated when this method is
    /// called.
    pub fn clear(&mut self) {
        use const_default1::ConstDefault;
        for index in 0..self.len {
            // Safety: `index` is within the pool owned by `self`
            unsafe { self.pool.as_ptr().add(index).write(TagWord::DEFAULT) };
        }

        let margin = self.len - HEADER_WORDS;
        self.set_next(0, margin);
        self.set_prev(0, 0);
        self.mark(0, false);
        // The margin's next field points one past the pool's end, which
        // clears `HAS_NEXT`. It stays occupied forever so coalescing can
        // never absorb it.
        self.set_next(margin, HEADER_WORDS);
        self.set_prev(margin, margin);
        self.mark(margin, true);
    }

    /// The pool length in words.
    #[inline]
    pub fn pool_words(&self) -> usize {
        self.len
    }

    /// Attempt to allocate a block of memory.
    ///
    /// Returns a pointer to a word-aligned data region of at least `size`
    /// bytes, located just past the block's header. Returns `None` when no
    /// free block is large enough; the pool is left unmodified in that case.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let header = self.best_fit(size)?;
        let old_next = self.next_offset(header);
        let carve = HEADER_WORDS + (size + WORD_SIZE - 1) / WORD_SIZE;
        debug_assert!(carve <= old_next);

        self.mark(header, true);

        let leftover = old_next - carve;
        if leftover >= HEADER_WORDS {
            // Describe the remaining span with a fresh free header and
            // restore the symmetric link on its successor, if any.
            let free = header + carve;
            self.set_next(free, leftover);
            self.set_prev(free, carve);
            self.mark(free, false);
            if self.has_next(free) {
                self.set_prev(free + leftover, leftover);
            }
            self.set_next(header, carve);
        }
        // A leftover smaller than one header cannot host a block; it stays
        // absorbed in the allocated block.

        // Safety: the data region of an in-pool block is itself in-pool and
        //         therefore non-null
        Some(unsafe { NonNull::new_unchecked(self.pool.as_ptr().add(header + HEADER_WORDS)) }.cast())
    }

    /// Release a previously allocated block for reuse. No-op on `None`.
    ///
    /// The freed block is merged with any free neighbor on either side.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block previously returned by [`Self::allocate`]
    /// or [`Self::reallocate`] on this heap and not released since.
    pub unsafe fn deallocate(&mut self, ptr: Option<NonNull<u8>>) {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return,
        };
        let header = self.header_for_allocation(ptr);
        self.mark(header, false);

        // Forward-merge at the freed header absorbs an already-free right
        // neighbor; forward-merge at the predecessor carries a free left
        // neighbor through the freed block. Together they cover both
        // directions with a single primitive.
        self.try_merge_forward(header);
        if self.has_prev(header) {
            let prev = header - self.prev_offset(header);
            self.try_merge_forward(prev);
        }
    }

    /// Resize an allocation, `realloc`-style.
    ///
    /// The new block is always carved *before* the old one is released, so
    /// the returned region never aliases the old one. The first
    /// `min(old_size, new_size)` bytes of content are preserved.
    ///
    ///  - `ptr == None` behaves like [`Self::allocate`].
    ///  - `new_size == 0` releases `ptr` and returns `None`.
    ///  - On capacity exhaustion, `None` is returned and the old block is
    ///    left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must satisfy the [`Self::deallocate`] contract, and `old_size`
    /// must not exceed the size requested when it was allocated.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if new_size == 0 {
            self.deallocate(ptr);
            return None;
        }

        let new_ptr = self.allocate(new_size)?;
        if let Some(old_ptr) = ptr {
            if old_size != 0 {
                // The fresh block was carved while the old one was still
                // live, so the two regions are disjoint.
                core::ptr::copy_nonoverlapping(
                    old_ptr.as_ptr(),
                    new_ptr.as_ptr(),
                    old_size.min(new_size),
                );
            }
            self.deallocate(Some(old_ptr));
        }
        Some(new_ptr)
    }

    /// Walk the whole header chain once and report every broken link,
    /// without mutating anything.
    ///
    /// Each violation is handed to `report`; on any fault the result is
    /// `Err` with the number of violations. The walk stops early only when
    /// a next-offset escapes the pool, since following it would read
    /// arbitrary pool words as headers.
    pub fn check_consistency(
        &self,
        mut report: impl FnMut(Corruption),
    ) -> Result<(), usize> {
        let mut faults = 0;
        let mut header = 0;
        loop {
            let prev = self.prev_offset(header);
            if prev > header {
                report(Corruption {
                    header,
                    kind: CorruptionKind::PrevOutOfBounds { offset: prev },
                });
                faults += 1;
            }

            if !self.has_next(header) {
                break;
            }
            let next = self.next_offset(header);
            if next < HEADER_WORDS || header + next > self.len - HEADER_WORDS {
                report(Corruption {
                    header,
                    kind: CorruptionKind::NextOutOfBounds { offset: next },
                });
                faults += 1;
                break;
            }

            let successor = header + next;
            let back = self.prev_offset(successor);
            if back != next {
                report(Corruption {
                    header: successor,
                    kind: CorruptionKind::BrokenBackLink {
                        expected: next,
                        actual: back,
                    },
                });
                faults += 1;
            }
            header = successor;
        }

        if faults == 0 {
            Ok(())
        } else {
            Err(faults)
        }
    }

    /// Iterate over the chain's headers in address order.
    ///
    /// Ends after the margin header (the one with no successor).
    pub fn headers(&self) -> Headers<'_, 'pool> {
        Headers {
            heap: self,
            header: 0,
            done: false,
        }
    }

    /// A human-readable listing of `count` headers starting at the
    /// `start`-th one, for diagnostics.
    ///
    /// ```
    /// use btfit::{Heap, TagWord};
    /// use std::mem::MaybeUninit;
    /// let mut pool = [MaybeUninit::<TagWord>::uninit(); 64];
    /// let heap = Heap::new(&mut pool).unwrap();
    /// println!("{}", heap.dump_layout(0, 16));
    /// ```
    pub fn dump_layout(&self, start: usize, count: usize) -> DumpLayout<'_, 'pool> {
        DumpLayout {
            heap: self,
            start,
            count,
        }
    }

    /// Best-fit scan over the whole chain: the smallest free block whose
    /// capacity satisfies `size`, ties going to the earliest header.
    fn best_fit(&self, size: usize) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        let mut header = Some(0);
        while let Some(h) = header {
            if !self.is_allocated(h) && self.data_capacity(h) >= size {
                let next = self.next_offset(h);
                if best.map_or(true, |(_, smallest)| next < smallest) {
                    best = Some((h, next));
                }
            }
            header = self.next_header(h);
        }
        best.map(|(h, _)| h)
    }

    /// Absorb `header`'s successor when both are free, extending `header`'s
    /// next-offset to skip past it.
    fn try_merge_forward(&mut self, header: usize) {
        if self.is_allocated(header) {
            return;
        }
        let successor = match self.next_header(header) {
            Some(successor) => successor,
            None => return,
        };
        if self.is_allocated(successor) {
            return;
        }

        let merged = self.next_offset(header) + self.next_offset(successor);
        self.set_next(header, merged);
        if self.has_next(header) {
            // The absorbed span's own successor now links back to `header`.
            self.set_prev(header + merged, merged);
        }
    }

    /// Recover the header index for a pointer returned by the allocation
    /// entry points.
    fn header_for_allocation(&self, ptr: NonNull<u8>) -> usize {
        let base = self.pool.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        assert!(
            addr > base && addr - base <= self.len * WORD_SIZE,
            "pointer {:p} is outside the pool",
            ptr
        );
        let byte_offset = addr - base;
        assert!(
            byte_offset % WORD_SIZE == 0,
            "pointer {:p} is not word-aligned",
            ptr
        );
        let index = byte_offset / WORD_SIZE;
        assert!(
            index >= HEADER_WORDS,
            "pointer {:p} has no room for a header before it",
            ptr
        );
        index - HEADER_WORDS
    }

    /// The successor of `header`, or `None` for the margin.
    #[inline]
    fn next_header(&self, header: usize) -> Option<usize> {
        if !self.has_next(header) {
            return None;
        }
        let next = self.next_offset(header);
        assert!(
            next >= HEADER_WORDS && header + next + HEADER_WORDS <= self.len,
            "corrupted chain: header {} has next-offset {}",
            header,
            next
        );
        Some(header + next)
    }

    /// Data capacity of the block in bytes.
    fn data_capacity(&self, header: usize) -> usize {
        let next = self.next_offset(header);
        assert!(
            next >= HEADER_WORDS,
            "corrupted chain: header {} has next-offset {}",
            header,
            next
        );
        (next - HEADER_WORDS) * WORD_SIZE
    }

    /// Stores `offset` in the next field. `HAS_NEXT` is recomputed from
    /// pool membership of `header + offset`; callers cannot set it
    /// directly.
    fn set_next(&mut self, header: usize, offset: usize) {
        let in_pool = header + offset < self.len;
        let word = self.word(header).with_offset(offset).with_flag(in_pool);
        self.set_word(header, word);
    }

    /// Stores `offset` in the prev field, preserving `ALLOCATED`. An offset
    /// that would escape the pool's start is stored as zero (first-header
    /// case).
    fn set_prev(&mut self, header: usize, offset: usize) {
        let offset = if offset > header { 0 } else { offset };
        let word = self.word(header + 1).with_offset(offset);
        self.set_word(header + 1, word);
    }

    fn mark(&mut self, header: usize, allocated: bool) {
        let word = self.word(header + 1).with_flag(allocated);
        self.set_word(header + 1, word);
    }

    #[inline]
    fn next_offset(&self, header: usize) -> usize {
        self.word(header).offset()
    }

    #[inline]
    fn prev_offset(&self, header: usize) -> usize {
        self.word(header + 1).offset()
    }

    #[inline]
    fn has_next(&self, header: usize) -> bool {
        self.word(header).flag()
    }

    #[inline]
    fn has_prev(&self, header: usize) -> bool {
        self.prev_offset(header) != 0
    }

    #[inline]
    fn is_allocated(&self, header: usize) -> bool {
        self.word(header + 1).flag()
    }

    #[inline]
    fn word(&self, index: usize) -> TagWord {
        assert!(index < self.len, "header access out of pool bounds: {}", index);
        // Safety: `index` is in bounds and the pool was initialized by
        //         `clear`
        unsafe { self.pool.as_ptr().add(index).read() }
    }

    #[inline]
    fn set_word(&mut self, index: usize, word: TagWord) {
        assert!(index < self.len, "header access out of pool bounds: {}", index);
        // Safety: `index` is in bounds
        unsafe { self.pool.as_ptr().add(index).write(word) };
    }
}

/// A snapshot of one block header, yielded by [`Heap::headers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    /// The word index of the header within the pool.
    pub index: usize,
    /// The forward offset to the next header, in words.
    pub next_offset: usize,
    /// The backward offset to the previous header, in words. Zero for the
    /// first header.
    pub prev_offset: usize,
    /// Whether the block is allocated.
    pub allocated: bool,
    /// `false` only for the terminating margin header.
    pub has_next: bool,
}

impl HeaderInfo {
    /// Data capacity of the block in bytes.
    pub fn data_capacity(&self) -> usize {
        (self.next_offset - HEADER_WORDS) * WORD_SIZE
    }
}

/// Iterator over a heap's header chain. See [`Heap::headers`].
#[derive(Debug)]
pub struct Headers<'a, 'pool> {
    heap: &'a Heap<'pool>,
    header: usize,
    done: bool,
}

impl Iterator for Headers<'_, '_> {
    type Item = HeaderInfo;

    fn next(&mut self) -> Option<HeaderInfo> {
        if self.done {
            return None;
        }
        let heap = self.heap;
        let header = self.header;
        let info = HeaderInfo {
            index: header,
            next_offset: heap.next_offset(header),
            prev_offset: heap.prev_offset(header),
            allocated: heap.is_allocated(header),
            has_next: heap.has_next(header),
        };
        match heap.next_header(header) {
            Some(successor) => self.header = successor,
            None => self.done = true,
        }
        Some(info)
    }
}

/// Displayable header listing. See [`Heap::dump_layout`].
#[derive(Debug)]
pub struct DumpLayout<'a, 'pool> {
    heap: &'a Heap<'pool>,
    start: usize,
    count: usize,
}

impl fmt::Display for DumpLayout<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for info in self.heap.headers().skip(self.start).take(self.count) {
            writeln!(
                f,
                "hdr @{:6}: prev={:6} next={:6} {}{}",
                info.index,
                info.prev_offset,
                info.next_offset,
                if info.allocated { "used" } else { "free" },
                if info.has_next { "" } else { " (margin)" },
            )?;
        }
        Ok(())
    }
}
