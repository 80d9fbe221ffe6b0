//! Phase-based deployment pipeline

pub mod context;
pub mod engine;
pub mod phase;
pub mod prerequisites;
pub mod summary;
