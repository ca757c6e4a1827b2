//! Content-addressed deduplication

mod checksum;
mod service;

pub use checksum::{Checksum, InvalidChecksum};
pub use service::{DeduplicationService, DuplicateCheck};
