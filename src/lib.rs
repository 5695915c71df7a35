pub mod bcache;
pub mod bitmap;
pub mod error;
pub mod format;
pub mod fsck;
pub mod minfs;
pub mod mkfs;
pub mod superblock;

pub use crate::bcache::{Bcache, BlockDevice, FileDevice, MemDevice};
pub use crate::error::{FsckError, Result};
pub use crate::format::{Inode, Superblock, BLOCK_SIZE, ROOT_INO};
pub use crate::fsck::fsck_types::{FsckOptions, FsckReport, FsckStats};
pub use crate::fsck::{fsck, run_fsck, FsckOutcome};
pub use crate::minfs::Minfs;
pub use crate::mkfs::{format, ImageBuilder, MkfsOptions};
pub use crate::superblock::{
    load_superblock, repair_superblock, used_data_size, used_inodes, used_size,
};
