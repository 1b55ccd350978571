//! # Gazlink Common Library
//!
//! Shared code for the gazlink workspace:
//! - Error type used by every crate
//! - Bootstrap configuration (root folder, TOML loading, logging)
//! - SQLite pool initialization

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
