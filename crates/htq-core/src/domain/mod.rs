//! Domain model (ids, statuses, requests, responses, errors).

pub mod errors;
pub mod ids;
pub mod request;
pub mod response;
pub mod state;

use std::collections::BTreeMap;

/// Flat header mapping. Order is irrelevant; a BTreeMap keeps the encoded
/// form deterministic.
pub type Headers = BTreeMap<String, String>;

pub use errors::HtqError;
pub use ids::RequestId;
pub use request::{DEFAULT_TIMEOUT_MS, Request, SendRequest};
pub use response::{Response, ResponseOutcome};
pub use state::{RequestStatus, UnknownStatus};
