//! Spatial Platform deployment orchestrator
//!
//! Brings the platform from nothing running to validated and healthy through
//! a resumable phase pipeline, and keeps it safe afterwards with rollback
//! points and resource safeguards.

pub mod app;
pub mod audit;
pub mod build;
pub mod commands;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod logs;
pub mod registry;
pub mod rollback;
pub mod runtime;
pub mod safeguards;
pub mod storage;
pub mod telemetry;
pub mod utils;
