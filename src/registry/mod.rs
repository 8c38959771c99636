//! Target registry
//!
//! The registry (`groups.json`) lists every tracked target and its endpoints.
//! It is shared with external consumers, so decoding is strict about the
//! fields the harvester relies on and lossless about everything else.

mod model;
mod store;
pub mod timestamp;

pub use model::{
    endpoint_key, Endpoint, FetchStrategy, Fingerprint, HttpRecord, RedirectHop, Target,
};
pub use store::{read_json, write_json_atomic, Registry};
