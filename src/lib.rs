//! fnf-launcher-store - local persistence and sync core for an FNF mod launcher
//!
//! This crate provides:
//! - A SQLite store for mods, folders and engine-mod profiles
//! - FIFO-serialized access with lock retry and nested transactions
//! - Additive schema upgrades and ordered startup migrations
//! - Full mod list sync to an external consumer after every write

pub const APP_VERSION: &str = "0.3.2";

pub mod app;
pub mod config;
pub mod db;
pub mod settings;
pub mod sync;

pub use app::App;
pub use config::Config;
pub use db::{Database, StoreError};
