//! Multipart upload: part splitting and upload coordination.

pub mod multipart;
pub mod splitter;
