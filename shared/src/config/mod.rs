//! Configuration module for Lantern.
//!
//! This module contains runtime settings shared by all fetchers.

pub mod settings;

pub use settings::{FetcherSettings, SettingsError};
