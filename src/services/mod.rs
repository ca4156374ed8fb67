pub mod bitmap_loader;
pub mod config;
pub mod ocr;
pub mod player_directory;
pub mod recognition;
pub mod request_cache;
pub mod row_localizer;
pub mod row_worker;
pub mod sink;

pub use config::ConfigManager;
pub use player_directory::{HttpPlayerDirectory, PlayerDirectory, StaticPlayerDirectory};
pub use recognition::{AttemptPlan, RecognitionService};
pub use request_cache::RequestCache;
pub use row_worker::RowWorker;
pub use sink::{JsonLinesSink, MemorySink, ObservationSink};
