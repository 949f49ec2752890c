//! Stable percentage hashing.
//!
//! Percentage splits and multivariate variants need every identity to land in the same bucket
//! on every evaluation and in every SDK. This module maps an ordered list of identifiers to a
//! number in `[0, 100)` using MD5.

/// Strategy mapping an ordered list of object ids to a stable percentage in `[0, 100)`.
///
/// Order of `object_ids` matters. Callers pass `[object_id, subject_id]`, e.g. `[segment_key,
/// identity_key]` or `[feature_key, identity_key]`.
pub trait PercentageHasher {
    /// Return a percentage in `[0, 100)` for the given ids.
    fn hashed_percentage(&self, object_ids: &[&str]) -> f64;
}

/// The default hasher. Produces the same values as the other engine implementations.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Hasher;

impl PercentageHasher for Md5Hasher {
    fn hashed_percentage(&self, object_ids: &[&str]) -> f64 {
        hashed_percentage_for_object_ids(object_ids, 1)
    }
}

impl<T: Fn(&[&str]) -> f64> PercentageHasher for T {
    fn hashed_percentage(&self, object_ids: &[&str]) -> f64 {
        self(object_ids)
    }
}

/// Compute the stable percentage for `object_ids`.
///
/// Ids are repeated `iterations` times and joined with `,`. The first 8 bytes of the MD5 digest
/// are read as a big-endian integer `v`, and the result is `(v mod 9999) / 9998 * 100`. That
/// formula yields exactly 100 for one residue, in which case the computation is repeated with one
/// more iteration, so the result is always below 100.
pub fn hashed_percentage_for_object_ids(object_ids: &[&str], iterations: usize) -> f64 {
    let mut iterations = iterations.max(1);
    loop {
        let to_hash = object_ids.repeat(iterations).join(",");
        let hash = md5::compute(to_hash.as_bytes());
        let value = u64::from_be_bytes([
            hash[0], hash[1], hash[2], hash[3], hash[4], hash[5], hash[6], hash[7],
        ]);
        let percentage = (value % 9999) as f64 / 9998.0 * 100.0;
        if percentage < 100.0 {
            return percentage;
        }
        iterations += 1;
    }
}

/// Hasher returning the same percentage for any input.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedHasher(pub f64);

#[cfg(test)]
impl PercentageHasher for FixedHasher {
    fn hashed_percentage(&self, _object_ids: &[&str]) -> f64 {
        self.0
    }
}
