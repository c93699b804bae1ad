// file: src/cloud/mod.rs
// version: 1.0.0
// guid: 6b2e9f41-7c3a-4d85-a1f0-3e8c5d7b2a96

//! Cloud provider clients and their image stores

pub mod cos;
pub mod glance;
pub mod iam;
pub mod resource_controller;
pub mod vpc;

pub use cos::{CosBucketStore, CosClient};
pub use glance::{GlanceClient, GlanceImage, GlanceImageStore};
pub use iam::IamTokenProvider;
pub use resource_controller::{ResourceController, TransientCos};
pub use vpc::{CosImageSource, VpcClient, VpcImage, VpcImageStore};
