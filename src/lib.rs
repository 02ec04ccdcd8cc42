//! WAGER: bet construction, validation and settlement engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod odds;
pub mod limits;
pub mod rules;
pub mod payout;
pub mod lifecycle;
pub mod storage;
pub mod engine;
