//! Common test utilities and fixtures.

pub mod fixtures;
pub mod server;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use chunkd_storage::testing::{Fault, FaultyBackend};
#[allow(unused_imports)]
pub use server::*;
