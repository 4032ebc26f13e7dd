pub mod cohort;
pub mod core;
pub mod reports;
pub mod setup;
