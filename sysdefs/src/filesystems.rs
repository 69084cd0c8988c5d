use serde::{Deserialize, Serialize};
use strum_macros::{EnumIs, EnumIter, EnumString, IntoStaticStr};

/// Filesystem types the engine knows how to place on a device.
///
/// Everything except `Nfs` needs a block device underneath.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIs,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilesystemType {
    Btrfs,
    Exfat,
    Ext2,
    Ext3,
    Ext4,
    Ntfs,
    Swap,
    Vfat,
    Xfs,
    Nfs,
}

impl FilesystemType {
    /// Whether the filesystem lives on a block device.
    pub fn is_block(self) -> bool {
        !self.is_nfs()
    }

    /// Whether an existing filesystem of this type can be shrunk in place.
    pub fn supports_shrink(self) -> bool {
        matches!(
            self,
            Self::Btrfs | Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Ntfs | Self::Swap
        )
    }

    /// Whether an existing filesystem of this type can be grown in place.
    pub fn supports_grow(self) -> bool {
        !matches!(self, Self::Nfs | Self::Exfat)
    }

    /// Smallest device this filesystem can be created on.
    pub fn min_size(self) -> u64 {
        match self {
            Self::Btrfs => 256 << 20,
            Self::Xfs => 300 << 20,
            Self::Ext2 | Self::Ext3 | Self::Ext4 => 1 << 20,
            Self::Vfat | Self::Exfat | Self::Ntfs => 1 << 20,
            Self::Swap => 40 << 10,
            Self::Nfs => 0,
        }
    }
}

impl std::fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_filesystem_type_names() {
        let fs: FilesystemType = serde_json::from_str(r#""ext4""#).unwrap();
        assert_eq!(fs, FilesystemType::Ext4);
        assert_eq!(FilesystemType::from_str("btrfs").unwrap(), FilesystemType::Btrfs);
        assert!(FilesystemType::from_str("zfs").is_err());

        // Display and FromStr agree for every variant
        for fs in FilesystemType::iter() {
            assert_eq!(FilesystemType::from_str(&fs.to_string()).unwrap(), fs);
        }
    }

    #[test]
    fn test_block_filesystems() {
        assert!(FilesystemType::Ext4.is_block());
        assert!(!FilesystemType::Nfs.is_block());
        assert!(!FilesystemType::Xfs.supports_shrink());
        assert!(FilesystemType::Xfs.supports_grow());
    }
}
