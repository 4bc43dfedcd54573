//! CLI command implementations.

pub mod client;
pub mod keygen;
pub mod menu;
pub mod serve;
