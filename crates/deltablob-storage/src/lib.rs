//! deltablob-storage: OpenDAL backends and the create-only blob version store
//!
//! # Overview
//! - `operator`: builds memory, fs, S3, and Azure Blob operators from config
//! - `backend`: the narrow `BlobBackend` capability and its OpenDAL implementation
//! - `health`: reachability check for a configured backend
//! - `store`: `BlobVersionStore`, delta encoding over create-only blob I/O

pub mod backend;
pub mod health;
pub mod operator;
pub mod store;

pub use backend::{map_opendal_error, BlobBackend, OpendalBackend};
pub use health::{check_health, is_healthy};
pub use operator::{build_operator, build_operator_with, Credentials};
pub use store::BlobVersionStore;
