//! Season lifecycle and prime-time windows.

pub mod models;
pub mod service;
