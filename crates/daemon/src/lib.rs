// gitbroker-daemon: git-backed record storage and synchronization for the
// service broker.

pub mod config;
pub mod git;
pub mod runtime;
pub mod security;
pub mod store;
