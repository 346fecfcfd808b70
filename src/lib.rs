//! Grade storage, scale conversion, aggregation, and per-course grade
//! calculation for a personal gradebook.

pub mod aggregate;
pub mod calc;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod report;
pub mod scale;
