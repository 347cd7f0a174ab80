//! Guild ratings: the MMR engine, its worker, and the rating store.

pub mod analysis;
pub mod engine;
pub mod jobs;
pub mod models;
