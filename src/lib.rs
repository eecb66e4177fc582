//! Character trees: characters, typed relationships between them, automatic
//! relationship-based grouping with grid layout, and pluggable persistence.

pub mod config;
pub mod error;
pub mod grouping;
pub mod layout;
pub mod logging;
pub mod manager;
pub mod session;
pub mod storage;
pub mod tree;
