use sha2::{Digest, Sha256};

/// Deterministic pseudo-random payload so failures are reproducible.
#[allow(dead_code)]
pub fn seeded_data(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Hex SHA-256 of a payload, for comparing large buffers in assertions.
#[allow(dead_code)]
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
