//! Remote object-store clients.
//!
//! The [`client::RemoteStoreClient`] trait abstracts over where committed
//! objects live.  Implementations include the AWS SDK client and an
//! in-process memory store.

pub mod aws;
pub mod client;
pub mod memory;

#[cfg(test)]
pub mod testing;
