//! Feature Flags
//!
//! A growable bitset selecting which shader blocks are active for one
//! permutation. Bit `i` corresponds to the block registered `i`-th in a
//! [`ShaderBlockRegistry`](super::ShaderBlockRegistry).
//!
//! The representation is normalized (no trailing zero words) so that two
//! flag sets with the same active bits always compare and hash equal, which
//! is what makes [`FeatureFlags`] usable as a cache key.
//!
//! ```rust,ignore
//! let mut flags = FeatureFlags::new();
//! flags.insert(light.bit());
//! flags.insert(200); // no fixed machine-word ceiling
//! assert!(flags.contains(200));
//! ```

use std::fmt;

use smallvec::SmallVec;

use super::BlockId;

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FeatureFlags {
    words: SmallVec<[u64; 2]>,
}

impl FeatureFlags {
    /// Highest bit index + 1 that [`insert`](Self::insert) accepts (1024 words).
    ///
    /// Larger indices can never name a registered block and are ignored.
    pub const MAX_BITS: usize = 1 << 16;

    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            words: SmallVec::new(),
        }
    }

    /// Builds flags from a single 64-bit mask (bits 0..64).
    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        let mut flags = Self::new();
        if bits != 0 {
            flags.words.push(bits);
        }
        flags
    }

    /// Builds flags from little-endian words (word 0 holds bits 0..64).
    #[must_use]
    pub fn from_words(words: &[u64]) -> Self {
        let mut flags = Self {
            words: SmallVec::from_slice(words),
        };
        flags.normalize();
        flags
    }

    #[inline]
    #[must_use]
    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    /// Sets `bit`. Bits at or above [`MAX_BITS`](Self::MAX_BITS) are ignored.
    pub fn insert(&mut self, bit: usize) {
        if bit >= Self::MAX_BITS {
            log::warn!("ignoring feature bit {bit} (limit {})", Self::MAX_BITS);
            return;
        }
        let (word, mask) = Self::locate(bit);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= mask;
    }

    pub fn remove(&mut self, bit: usize) {
        let (word, mask) = Self::locate(bit);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !mask;
            self.normalize();
        }
    }

    /// Builder-style [`insert`](Self::insert) for a registered block.
    #[must_use]
    pub fn with(mut self, block: BlockId) -> Self {
        self.insert(block.bit());
        self
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, bit: usize) -> bool {
        let (word, mask) = Self::locate(bit);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    #[inline]
    #[must_use]
    pub fn contains_block(&self, block: BlockId) -> bool {
        self.contains(block.bit())
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates set bit indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let tz = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * WORD_BITS + tz)
            })
        })
    }

    /// Returns a copy restricted to bits `0..bit_count`.
    ///
    /// Used to drop bits that have no registered block yet.
    #[must_use]
    pub fn masked(&self, bit_count: usize) -> Self {
        let full_words = bit_count / WORD_BITS;
        let rem = bit_count % WORD_BITS;
        let mut words: SmallVec<[u64; 2]> = self.words.iter().take(full_words).copied().collect();
        if rem != 0
            && let Some(&partial) = self.words.get(full_words)
        {
            words.push(partial & ((1u64 << rem) - 1));
        }
        let mut flags = Self { words };
        flags.normalize();
        flags
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let len = self.words.len().max(other.words.len());
        let words = (0..len)
            .map(|i| {
                self.words.get(i).copied().unwrap_or(0) | other.words.get(i).copied().unwrap_or(0)
            })
            .collect();
        Self { words }
    }

    #[inline]
    fn locate(bit: usize) -> (usize, u64) {
        (bit / WORD_BITS, 1u64 << (bit % WORD_BITS))
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl From<u64> for FeatureFlags {
    fn from(bits: u64) -> Self {
        Self::from_bits(bits)
    }
}

impl FromIterator<BlockId> for FeatureFlags {
    fn from_iter<T: IntoIterator<Item = BlockId>>(iter: T) -> Self {
        let mut flags = Self::new();
        for block in iter {
            flags.insert(block.bit());
        }
        flags
    }
}

impl fmt::Debug for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.words.is_empty() {
            return f.write_str("0x0");
        }
        f.write_str("0x")?;
        for (i, word) in self.words.iter().rev().enumerate() {
            if i == 0 {
                write!(f, "{word:x}")?;
            } else {
                write!(f, "{word:016x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_sets_compare_equal() {
        let mut a = FeatureFlags::new();
        a.insert(130);
        a.remove(130);
        assert_eq!(a, FeatureFlags::new());

        let b = FeatureFlags::from_words(&[0b101, 0, 0]);
        assert_eq!(b, FeatureFlags::from_bits(0b101));
    }

    #[test]
    fn test_wide_bits() {
        let mut flags = FeatureFlags::new();
        flags.insert(3);
        flags.insert(64);
        flags.insert(200);
        assert!(flags.contains(200));
        assert!(!flags.contains(199));
        assert_eq!(flags.iter().collect::<Vec<_>>(), vec![3, 64, 200]);
        assert_eq!(flags.count(), 3);
    }

    #[test]
    fn test_out_of_range_bit_is_ignored() {
        let mut flags = FeatureFlags::from_bits(0b1);
        flags.insert(1 << 40);
        flags.insert(FeatureFlags::MAX_BITS);
        assert_eq!(flags, FeatureFlags::from_bits(0b1));
        assert!(!flags.contains(1 << 40));

        flags.insert(FeatureFlags::MAX_BITS - 1);
        assert!(flags.contains(FeatureFlags::MAX_BITS - 1));
    }

    #[test]
    fn test_masked_drops_unregistered_bits() {
        let flags = FeatureFlags::from_words(&[u64::MAX, 1]);
        let masked = flags.masked(3);
        assert_eq!(masked, FeatureFlags::from_bits(0b111));
        assert_eq!(flags.masked(65).iter().last(), Some(64));
        assert!(FeatureFlags::from_bits(0b1000).masked(3).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(FeatureFlags::new().to_string(), "0x0");
        assert_eq!(FeatureFlags::from_bits(0xff).to_string(), "0xff");
        assert_eq!(
            FeatureFlags::from_words(&[1, 2]).to_string(),
            "0x20000000000000001"
        );
    }
}
