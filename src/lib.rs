//! lmsflow - rate-limited LMS data collection pipeline
//!
//! lmsflow pulls unit data from a rate-limited LMS REST API through an
//! adaptive request scheduler, hands the collected documents to an external
//! transformer, and reports per-stage timing and failures for every run.

pub mod api;
pub mod error;
pub mod id;
pub mod monitor;
pub mod pipeline;
pub mod scheduler;

pub use error::{LmsflowError, Result};
