pub mod api;
pub mod audit;
pub mod canonical;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod reporting;
pub mod workflow;

pub use error::OversightError;
