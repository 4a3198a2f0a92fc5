//! Fjall backend for Nitrite.
//!
//! Every Nitrite map is one partition of a fjall keyspace. Keys are kept in
//! an order-preserving byte encoding so the LSM tree's byte order matches
//! the ordering of [nitrite::common::Value].

mod config;
mod key_codec;
mod map;
mod module;
mod store;
mod version;
mod wrapper;

pub use config::*;
pub use module::*;
pub use store::FjallStore;
pub use wrapper::{FjallValueError, FjallValueResult};

#[cfg(test)]
mod tests {
    #[ctor::ctor]
    fn init() {
        colog::init();
    }
}
