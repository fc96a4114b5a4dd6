//! Random identifiers for volumes and buckets

/// Prefix for generated mountpoint directory names
pub const VOLUME_PREFIX: &str = "miniovol-";

/// Prefix for generated bucket names
pub const BUCKET_PREFIX: &str = "miniobucket-";

/// Generate `prefix` followed by eight lowercase hex digits.
///
/// The suffix comes from a uniformly random `u32`, so two draws collide with
/// probability 1 in 2^32. Callers that need uniqueness must still check.
pub fn generate_name(prefix: &str) -> String {
    format!("{}{:08x}", prefix, rand::random::<u32>())
}
