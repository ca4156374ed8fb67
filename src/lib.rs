//! Match-result recognition for post-match scoreboard screenshots.
//!
//! A batch of uploaded frames is decoded, the owner's highlighted row is
//! located on a worker thread, and text regions are read through an OCR
//! server until the banner, match id and stat line parse.

pub mod cancel;
pub mod error;
pub mod models;
pub mod services;

pub use cancel::CancelToken;
pub use error::{BatchError, ConfigError, RecognitionError, SinkError, UpstreamError};
