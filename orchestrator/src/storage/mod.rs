//! Persisted orchestrator state

pub mod audit;
pub mod checkpoint;
pub mod layout;
pub mod lock;
pub mod settings;
