//! Key lifecycle, backup and key-provider selection on top of `cocoon-core`.

pub mod backup;
pub mod factory;
pub mod kms;
pub mod lifecycle;
pub mod local;
mod locks;
pub mod provider;
