//! Compensation engine for a binary-placement MLM network.
//!
//! Two event handlers write an append-only compensation ledger:
//! - a member placement pays binary pairing bonuses up the placement tree
//! - a confirmed purchase pays unilevel commissions up the sponsor chain and
//!   accrues monthly maintenance spend
//!
//! [`engine::CompensationEngine`] is the entry point; storage backends live
//! under [`storage`].

pub mod config;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod model;
pub mod storage;
pub mod utils;

pub use engine::CompensationEngine;
pub use error::EngineError;
