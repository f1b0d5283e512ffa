//! # FTRepo Common Library
//!
//! Shared code for the FTRepo crates:
//! - Common error type
//! - Bootstrap configuration loading (TOML + environment)
//! - Atomic JSON document persistence
//! - Content fingerprinting

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod json_store;

pub use error::{Error, Result};
