//! Readiness, health probing and deployment grading

pub mod probe;
pub mod readiness;
pub mod retry;
pub mod validator;
pub mod verdict;
