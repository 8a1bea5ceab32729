//! Core building blocks for Cocoon: the key data model, the envelope cipher,
//! configuration and the durable per-user key store.

pub mod config;
pub mod crypto;
pub mod error;
pub mod store;
pub mod types;

pub use error::{CocoonError, Result};
