//! Client configuration
//!
//! `schema` holds the serde types, `store` persists them to a JSON file.

pub mod schema;
pub mod store;

pub use schema::{
    parse_resolution, ClientConfig, CodecChoice, DataChannelMode, NegotiationDeadlines,
    SessionOptions, VideoConstraints, VideoTransform, DEFAULT_SIGNALING_URL, DEFAULT_STUN_SERVER,
};
pub use store::ConfigStore;
