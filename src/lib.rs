//! bundlecache - launch selection and asset cache for over-the-air updates
//!
//! Keeps a catalog of downloaded updates and a content-addressed store of
//! their files, picks the newest update that is safe to boot, and falls back
//! to the update embedded in the host when none is.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod launch;
pub mod lock;
pub mod model;
pub mod retention;
pub mod store;

pub use controller::UpdatesController;
pub use error::{BundleCacheError, BundleCacheResult};
pub use launch::LaunchSelection;
