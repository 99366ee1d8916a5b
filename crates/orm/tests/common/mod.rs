//! Test infrastructure for the mapping layer.
//!
//! - [`fixtures`] - model schemas and records
//! - [`scenarios`] - behavior shared by every query-capable backend

#![allow(dead_code)]

pub mod fixtures;
pub mod scenarios;

pub use fixtures::*;
