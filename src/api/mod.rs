//! Remote LMS API layer.
//!
//! This module provides:
//! - **RateGate**: hourly request ceiling; blocks instead of failing.
//! - **HttpCaller**: one request with timeout and bounded exponential retry.
//! - **Transport**: the network seam (`ReqwestTransport` for HTTPS, `MockTransport` for tests).
//! - **ApiError**: typed classification of every failure the network can produce.

pub mod caller;
pub mod gate;
pub mod mock;
pub mod transport;
pub mod types;

pub use caller::{HttpCaller, RetryPolicy};
pub use gate::{DEFAULT_WINDOW, GateSnapshot, RateGate};
pub use mock::{MockTransport, Reply, SentRequest};
pub use transport::{DEFAULT_API_PATH, ReqwestTransport, Transport, TransportError};
pub use types::{ApiError, ApiRequest, ApiResponse, error_message};
