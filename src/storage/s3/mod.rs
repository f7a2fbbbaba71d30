//! S3-compatible object storage backend.

mod client;
mod provider;
mod signer;

pub use provider::S3Backend;
