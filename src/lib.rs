//! Infrastructure for the photomosaic application, expressed as
//! cloudformation templates synthesized from `photomosaic.toml`.
//!
//! [`photomosaic::instantiate`] declares one environment's stack, [`app::App`]
//! writes every selected stack's artifacts, and [`deploy::Deployer`] pushes
//! them to AWS.

pub mod app;
pub mod config;
pub mod deploy;
pub mod error;
pub mod packaging;
pub mod photomosaic;
pub mod regions;
pub mod resources;
pub mod stack;

pub use error::{Error, Result};
