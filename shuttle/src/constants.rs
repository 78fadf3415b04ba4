/// Maximum number of parts in one segmented upload.
pub const MAXIMUM_MULTIPART_NUMBER: u64 = 10_000;

/// Maximum size of a single part, 5 GiB.
pub const MAXIMUM_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum size of one object.
pub const MAXIMUM_OBJECT_SIZE: u64 = MAXIMUM_MULTIPART_NUMBER * MAXIMUM_PART_SIZE;

/// Objects at or above this size are copied as segmented uploads.
pub const MAXIMUM_AUTO_MULTIPART_SIZE: u64 = MAXIMUM_PART_SIZE / 5;

/// Default part size, 128 MiB.
pub const DEFAULT_PART_SIZE: u64 = 128 * 1024 * 1024;
