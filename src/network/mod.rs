// file: src/network/mod.rs
// version: 2.0.0
// guid: s9t0u1v2-w3x4-5678-9012-345678stuvwx

//! Network operations module

pub mod client;
pub mod transfer;

pub use client::{check_delete, check_status, http_client, read_json};
pub use transfer::{fetch_json, file_body, FileBody};

#[cfg(test)]
pub(crate) mod test_server;
