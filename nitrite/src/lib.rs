//! # Nitrite storage core
//!
//! The storage layer of the Nitrite embedded database: ordered maps and
//! spatial indexes over pluggable storage engines.
//!
//! ## Module Organization
//!
//! - [`common`] - value model, record ids, events, plugin registry
//! - [`errors`] - error taxonomy shared by every backend
//! - [`store`] - `NitriteMap`, `NitriteStore` and `NitriteRTree` contracts
//! - [`nitrite`], [`nitrite_builder`], [`nitrite_config`] - the database
//!   facade that opens a store and runs the credential gate
//!
//! Backends live in their own crates and are loaded as modules:
//!
//! ```rust,ignore
//! let db = Nitrite::builder()
//!     .load_module(MVStoreModule::with_config().file_path("/tmp/test.db").build()?)
//!     .open_or_create(None, None)?;
//! ```
//!
//! Public types follow the PIMPL pattern: a thin handle around
//! `Arc<...Inner>`, so clones are cheap and share state.

pub mod common;
pub mod errors;
pub mod nitrite;
pub mod nitrite_builder;
pub mod nitrite_config;
pub mod store;

pub use crate::nitrite::Nitrite;
pub use crate::nitrite_builder::NitriteBuilder;
pub use crate::nitrite_config::NitriteConfig;
