//! # provd Testkit
//!
//! Test utilities for provd.
//!
//! This crate provides:
//! - `ScriptedAdapter`, an in-memory backend whose sync-in and sync-out
//!   can complete immediately, fail, be rejected, or be held until the test
//!   releases them
//! - Property-based generators for keys and settings
//! - Fixtures for building settings maps and registries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use provd_testkit::prelude::*;
//!
//! let tel = ScriptHandle::new("/telephony/");
//! let registry = registry_of(&[("tel", &tel)]);
//! tel.set_sync_out(Behavior::Hold);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scripted;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::{registry_of, settings, temp_data_dir};
    pub use crate::generators::{context_strategy, key_strategy, settings_strategy};
    pub use crate::scripted::{Behavior, ScriptHandle, ScriptedAdapter};
}
