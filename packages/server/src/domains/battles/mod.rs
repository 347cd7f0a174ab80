//! Battle ingestion: crawler, gap recovery, kill fetching, notifications.

pub mod crawler;
pub mod gap_recovery;
pub mod jobs;
pub mod models;

pub use crawler::Crawler;
pub use gap_recovery::GapRecovery;
