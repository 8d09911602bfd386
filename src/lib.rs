//! Library interface for taproom, a Homebrew-style formula installer.
//!
//! The binary is a thin CLI over these modules; integration tests and benches
//! drive them directly.

pub mod bottle;
pub mod build;
pub mod cellar;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod expand;
pub mod extract;
pub mod formula;
pub mod formulary;
pub mod install;
pub mod interrupt;
pub mod keg;
pub mod lock;
pub mod options;
pub mod platform;
pub mod relocate;
pub mod requirement;
pub mod tab;
pub mod ui;
pub mod worker;

pub use config::Config;
pub use error::{Result, TaproomError};
pub use keg::{normalize_path, relative_path};
