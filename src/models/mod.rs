pub mod batch;
pub mod bitmap;
pub mod config;
pub mod observation;
pub mod roi;

// Re-export main types
pub use batch::{BatchItem, BatchItemId, BatchStatus, ManualDecision};
pub use bitmap::{ImagePayload, RawImage};
pub use config::RecognizerConfig;
pub use observation::{MatchObservation, MatchResult, PlayerStats};
pub use roi::{BoundingBox, CropFraction, CropVariant};
