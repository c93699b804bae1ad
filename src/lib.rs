// file: src/lib.rs
// version: 3.0.0
// guid: d82472d1-7f0f-4eb4-b0a3-6e1547103eb4

//! # TMOS Image Sync
//!
//! Patches TMOS disk images and keeps their published copies in IBM Cloud
//! Object Storage, IBM Cloud VPC and OpenStack Glance in line with the
//! local image tree.

pub mod catalog;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod monitor;
pub mod network;
pub mod sync;
pub mod utils;

pub use error::{ImageSyncError, Result};

/// Version information for the tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
