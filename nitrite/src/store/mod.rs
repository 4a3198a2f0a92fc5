//! Storage abstractions.
//!
//! A store is a pluggable backend loaded through a [StoreModule]. It hands
//! out named [NitriteMap]s (ordered key-value maps) and named
//! [NitriteRTree](rtree::NitriteRTree)s (spatial indexes). Backends for
//! engines without a native spatial structure can build their indexes on
//! [MapBackedRTree](rtree::MapBackedRTree).

mod event;
mod iters;
mod nitrite_map;
mod nitrite_store;
pub mod rtree;
mod store_config;
mod store_module;

#[cfg(test)]
pub(crate) mod test_util;

pub use event::*;
pub use iters::*;
pub use nitrite_map::*;
pub use nitrite_store::*;
pub use store_config::*;
pub use store_module::*;
