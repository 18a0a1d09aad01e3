// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Data formats shared between the suitesync engine, external test runners and the settings
//! layer.
//!
//! Everything in this crate is plain data with serde support. The runner speaks these formats as
//! JSON: listing reports, streamed reporter events and the persisted workspace settings.

mod list;
mod reporter;
mod settings;
mod suite;

pub use list::*;
pub use reporter::*;
pub use settings::*;
pub use suite::*;
