use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::bytes::ByteCount;

/// A contiguous extent on a block device, measured in blocks.
///
/// A region always has a non-zero length, constructors refuse anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Region {
    /// First block of the region.
    pub start: u64,

    /// Number of blocks.
    pub length: u64,

    /// Size of one block in bytes.
    pub block_size: u64,
}

/// How regions are aligned to the disk's alignment grain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlignPolicy {
    /// Both the start and the end are moved to grain boundaries.
    #[default]
    AlignStartAndEnd,

    /// The start is aligned, the end stays where it is.
    AlignStartKeepEnd,

    /// The start is aligned and the region keeps its size, as long as it
    /// still fits.
    AlignStartKeepSize,
}

/// Alignment applied to every region the engine creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Alignment {
    #[serde(default = "default_grain")]
    pub grain: ByteCount,

    #[serde(default)]
    pub policy: AlignPolicy,
}

fn default_grain() -> ByteCount {
    ByteCount(crate::constants::DEFAULT_ALIGN_GRAIN)
}

impl Default for Alignment {
    fn default() -> Self {
        Self {
            grain: default_grain(),
            policy: AlignPolicy::default(),
        }
    }
}

impl Region {
    pub fn new(start: u64, length: u64, block_size: u64) -> Option<Self> {
        (length > 0 && block_size > 0).then_some(Self {
            start,
            length,
            block_size,
        })
    }

    /// Builds a region out of a byte offset and a byte size, rounding the
    /// start up and the length down to whole blocks.
    pub fn from_bytes(offset: ByteCount, size: ByteCount, block_size: u64) -> Option<Self> {
        if block_size == 0 {
            return None;
        }
        let start = offset.bytes().div_ceil(block_size);
        let skipped = start * block_size - offset.bytes();
        let length = size.bytes().saturating_sub(skipped) / block_size;
        Self::new(start, length, block_size)
    }

    /// Last block of the region (inclusive).
    pub fn end(&self) -> u64 {
        self.start + self.length - 1
    }

    /// First block after the region.
    pub fn end_exclusive(&self) -> u64 {
        self.start + self.length
    }

    pub fn size(&self) -> ByteCount {
        ByteCount(self.length * self.block_size)
    }

    pub fn start_offset(&self) -> ByteCount {
        ByteCount(self.start * self.block_size)
    }

    pub fn end_offset(&self) -> ByteCount {
        ByteCount(self.end_exclusive() * self.block_size)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.start_offset() < other.end_offset() && other.start_offset() < self.end_offset()
    }

    pub fn contains(&self, other: &Region) -> bool {
        self.start_offset() <= other.start_offset() && other.end_offset() <= self.end_offset()
    }

    /// Number of whole blocks needed to hold `size`.
    pub fn blocks_for(&self, size: ByteCount) -> u64 {
        size.bytes().div_ceil(self.block_size)
    }

    /// Returns a region starting at the same block with the given size,
    /// rounded down to whole blocks.
    pub fn with_size(&self, size: ByteCount) -> Option<Region> {
        Self::new(self.start, size.bytes() / self.block_size, self.block_size)
    }

    /// Aligns the region to `grain` bytes according to `policy`.
    ///
    /// Returns `None` when nothing is left after aligning.
    pub fn align(&self, grain: ByteCount, policy: AlignPolicy) -> Option<Region> {
        let grain = grain.bytes().max(self.block_size);
        let start = self.start_offset().bytes().div_ceil(grain) * grain;
        let end = self.end_offset().bytes();
        let aligned_end = match policy {
            AlignPolicy::AlignStartAndEnd => end - end % grain,
            AlignPolicy::AlignStartKeepEnd => end,
            AlignPolicy::AlignStartKeepSize => {
                let wanted = start + self.size().bytes();
                if wanted > end {
                    return None;
                }
                wanted
            }
        };
        if aligned_end <= start {
            return None;
        }
        Self::from_bytes(
            ByteCount(start),
            ByteCount(aligned_end - start),
            self.block_size,
        )
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {} B]",
            self.start, self.length, self.block_size
        )
    }
}
