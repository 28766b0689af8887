//! API handlers module

pub mod health;
pub mod study_sets;
