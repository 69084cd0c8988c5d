// Configuration constants

/// Keyword for a size without upper limit.
pub const SIZE_UNLIMITED: &str = "unlimited";

/// Root mount point path.
pub const ROOT_MOUNT_POINT_PATH: &str = "/";

/// Default alignment grain, 1 MiB.
pub const DEFAULT_ALIGN_GRAIN: u64 = 1 << 20;

/// Default LVM extent size, 4 MiB.
pub const DEFAULT_EXTENT_SIZE: u64 = 4 << 20;

/// Space used by LVM metadata at the start of every physical volume.
pub const LVM_PV_OVERHEAD: u64 = 1 << 20;

/// Space used by the MD superblock and bitmap on every member.
pub const MD_MEMBER_OVERHEAD: u64 = 1 << 20;

/// Space used by the bcache superblock on the backing device.
pub const BCACHE_BACKING_OVERHEAD: u64 = 8 << 10;

/// Default block size when a device does not report one.
pub const DEFAULT_BLOCK_SIZE: u64 = 512;

/// Smallest size a flexible planned device can be shrunk to.
pub const FLEXIBLE_MIN_SIZE: u64 = 1;
