// Battlewatch - ingestion and rating core
//
// This crate ingests battle records and kill events from the upstream game
// API, persists them, and maintains per-season guild ratings plus prime-time
// mass statistics. Architecture follows domain-driven design: infrastructure
// lives in kernel/, business logic in domains/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
