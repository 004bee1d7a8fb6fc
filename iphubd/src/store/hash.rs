use sha2::{Digest, Sha256};
use shared::types::DeviceRecord;

/// Only the mapping is hashed. `last_updated` moves on every report even when
/// the address is unchanged.
struct DigestView<'a> {
    hostname: &'a str,
    address: &'a str,
}

/// Computes a SHA-256 digest of the registry contents.
/// Records are sorted by hostname for deterministic output.
pub fn compute_digest(records: &[DeviceRecord]) -> String {
    let mut views: Vec<DigestView<'_>> = records
        .iter()
        .map(|r| DigestView {
            hostname: &r.hostname,
            address: &r.address,
        })
        .collect();
    views.sort_by(|a, b| a.hostname.cmp(b.hostname));

    let mut hasher = Sha256::new();
    for view in &views {
        // Length-prefix each field so ("ab", "c") and ("a", "bc") differ
        for field in [view.hostname, view.address] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
    }

    hex::encode(hasher.finalize())
}
