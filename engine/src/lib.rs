// Kolo Engine Library
// Exposes internal modules for integration tests and the daemon binary

#[macro_use]
extern crate log;

pub mod config;
pub mod core;
