// src/lib.rs - Control-channel bridge between an orchestrator and local printers
pub mod config;
pub mod error;
pub mod file_manager;
pub mod hardware;
pub mod print_job;
pub mod protocol;
pub mod router;
pub mod slicer;
pub mod web;

pub use config::Config;
pub use error::CommandError;
pub use router::Router;
