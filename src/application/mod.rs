//! Application layer: the two role engines.
//!
//! Each engine is a single-threaded reactor over its role's durable
//! store and the broadcast bus. Handlers never run concurrently within
//! a role, and every handler re-reads the records it mutates.

pub mod customer;
pub mod merchant;
