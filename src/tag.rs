//! The bit-packed boundary-tag word.
use const_default1::ConstDefault;
use core::fmt;

/// The largest offset representable in a [`TagWord`], in words.
pub const MAX_OFFSET: usize = (TagWord::FLAG_BIT - 1) as usize;

/// One pool word: an unsigned word offset packed with a single flag bit.
///
/// The high bit carries `HAS_NEXT` (in a header's next field) or `ALLOCATED`
/// (in its prev field); the low bits carry the offset. The accessors mask,
/// so offset arithmetic can never bleed into the flag.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct TagWord(u32);

impl TagWord {
    const FLAG_BIT: u32 = 1 << 31;

    /// The all-zero word: offset `0`, flag clear.
    pub const ZERO: Self = Self(0);

    /// The decoded offset, in words.
    #[inline]
    pub fn offset(self) -> usize {
        (self.0 & !Self::FLAG_BIT) as usize
    }

    /// The flag bit.
    #[inline]
    pub fn flag(self) -> bool {
        (self.0 & Self::FLAG_BIT) != 0
    }

    /// Returns a copy with the offset bits replaced, leaving the flag alone.
    #[inline]
    #[must_use]
    pub fn with_offset(self, offset: usize) -> Self {
        debug_assert!(offset <= MAX_OFFSET);
        Self((self.0 & Self::FLAG_BIT) | (offset as u32 & !Self::FLAG_BIT))
    }

    /// Returns a copy with the flag bit replaced, leaving the offset alone.
    #[inline]
    #[must_use]
    pub fn with_flag(self, flag: bool) -> Self {
        if flag {
            Self(self.0 | Self::FLAG_BIT)
        } else {
            Self(self.0 & !Self::FLAG_BIT)
        }
    }
}

impl ConstDefault for TagWord {
    const DEFAULT: Self = Self::ZERO;
}

impl fmt::Debug for TagWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagWord")
            .field("offset", &self.offset())
            .field("flag", &self.flag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_masked() {
        let w = TagWord::ZERO.with_flag(true).with_offset(MAX_OFFSET);
        assert_eq!(w.offset(), MAX_OFFSET);
        assert!(w.flag());
    }

    #[test]
    fn flag_does_not_disturb_offset() {
        let w = TagWord::ZERO.with_offset(1234);
        assert_eq!(w.with_flag(true).offset(), 1234);
        assert_eq!(w.with_flag(true).with_flag(false), w);
        assert!(!w.flag());
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(<TagWord as ConstDefault>::DEFAULT, TagWord::ZERO);
        assert_eq!(TagWord::default(), TagWord::ZERO);
    }
}
