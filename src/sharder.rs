//! Deterministic bucketing of identities for multi-variant rules.

/// Number of buckets a distribution is spread across.
pub const TOTAL_SHARDS: u64 = 10_000;

pub trait Sharder: std::fmt::Debug + Send + Sync {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64;
}

/// The default sharder. Takes the first four bytes of the MD5 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (value as u64) % total_shards
    }
}

/// Sharding input for an identity under a rule. The same owner, path, and salt always land in the
/// same bucket.
pub(crate) fn bucket_input(owner_id: &str, path: &str, salt: &str) -> String {
    format!("{owner_id}.{path}.{salt}")
}

/// Position of `input` in `[0, 1)`.
pub(crate) fn bucket_fraction(sharder: &dyn Sharder, input: &str) -> f64 {
    sharder.get_shard(input, TOTAL_SHARDS) as f64 / TOTAL_SHARDS as f64
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct DeterministicSharder(pub std::collections::HashMap<String, u64>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_shard(&self, input: &str, total_shards: u64) -> u64 {
        self.0.get(input).copied().unwrap_or(0) % total_shards
    }
}
