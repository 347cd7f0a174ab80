// Common types and utilities shared across the application

pub mod types;

pub use types::{de_u64_as_i64, id_to_u64, ser_i64_as_u64, u64_to_id};
