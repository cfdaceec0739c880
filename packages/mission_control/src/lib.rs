//! Mission Control - operator surface for live topics
//!
//! - `config`: figment-layered settings shared by every command
//! - `hub`: development push hub serving the live socket
//! - `watch`: tail topics through a shared `live_mux` client
//! - `publish`: push a frame through the hub's HTTP route

pub mod config;
pub mod hub;
pub mod publish;
pub mod watch;

pub use config::{ConfigError, FileConfig, load_config};
pub use hub::Hub;
