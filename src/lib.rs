pub mod automation;
pub mod config;
pub mod shared;
pub mod tickets;
