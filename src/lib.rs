//! careroute - cost-aware AI request routing with a crisis override
//!
//! Classifies each query into a tier ceiling, answers it from the cheapest
//! adequate provider within quota, caches the result, and records the spend.
//! Queries showing signs of crisis bypass all of that and go straight to a
//! designated safety provider.

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod middleware;
pub mod persistence;
pub mod providers;
pub mod quota;
pub mod router;
pub mod safety;
pub mod telemetry;
