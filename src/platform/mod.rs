//! Platform capabilities selected at build time.

pub mod lock;
