//! rtc-session - WebRTC offer/answer session client
//!
//! This crate negotiates a single WebRTC session with a remote peer over an
//! HTTP signaling endpoint, with codec filtering, camera switching and a
//! keep-alive on an auxiliary data channel.

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod utils;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
