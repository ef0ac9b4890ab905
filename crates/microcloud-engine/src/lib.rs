//! Simulation Engine — owns ground-truth node/service state, runs the tick
//! loop, and applies approved commands.

#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod rpc;
pub mod seed;
pub mod service;

pub use config::EngineConfig;
pub use core::{EngineCore, EngineState};
pub use error::EngineError;
pub use service::{EngineService, EngineStateView};
