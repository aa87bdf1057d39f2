//! Core types and shared functionality for fullpage.
//!
//! This crate provides:
//! - Layered configuration (network-wide or per-site)
//! - Unified error types
//! - Cache key generation and page records
//! - The storage backend facade and its engines
//! - The site directory used by invalidation and precache

pub mod backend;
pub mod config;
pub mod error;
pub mod keys;
pub mod record;
pub mod site;

pub use backend::{Backend, Expiry, StorageEngine};
pub use config::{AppConfig, BackendKind, CacheConfig, ConfigError, InvalidationMethod, PrecacheConfig};
pub use error::Error;
pub use keys::{KeyBuilder, KeyContext, KeyPair};
pub use record::{CacheEntry, ContentType, MetaRecord};
pub use site::{LinkSet, ManifestDirectory, SiteDirectory, SiteInfo};
