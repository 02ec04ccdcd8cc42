//! End-to-end tests for the betting engine against both ledger stores.

mod concurrency;
mod harness;
mod settlement;
