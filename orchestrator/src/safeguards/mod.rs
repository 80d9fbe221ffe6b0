//! Post-deployment resource safeguards

pub mod monitor;
