pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{seeded_data, sha256_hex};
#[allow(unused_imports)]
pub use chunkd_storage::testing::{Fault, FaultyBackend};
