//! Application constants

/// Hard character limit of a single published post
pub const MAX_POST_CHARS: usize = 280;

/// Usable characters per thread segment before numbering/hashtag suffixes
pub const SEGMENT_BUDGET: usize = 270;

/// Maximum number of segments a generated thread may have
pub const MAX_THREAD_SEGMENTS: usize = 15;

/// Marker prepended to the first segment of a thread
pub const THREAD_MARKER: &str = "🧵";

/// Default page size for paginated list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum page size for paginated list endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

/// Publish claim lease (15 minutes); a claim older than this may be taken over
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 15 * 60;
