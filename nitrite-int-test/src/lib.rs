//! Shared fixtures for the cross-backend integration tests.

pub mod test_util;
