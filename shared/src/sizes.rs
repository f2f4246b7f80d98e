pub const KB: usize = 1024;
pub const MB: usize = KB * KB;
pub const GB: usize = MB * KB;
pub const SECTOR_SIZE: usize = 512;
pub const SWAP_SECTORS: usize = 8192;
