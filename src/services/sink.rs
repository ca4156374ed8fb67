use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::SinkError;
use crate::models::observation::MatchObservation;

/// Receives finalized observations for persistence
pub trait ObservationSink: Send + Sync {
    fn submit(&self, owner_uid: &str, observation: &MatchObservation) -> Result<(), SinkError>;
}

#[derive(Serialize)]
struct SubmittedObservation<'a> {
    owner_uid: &'a str,
    #[serde(flatten)]
    observation: &'a MatchObservation,
}

/// Appends one JSON object per observation to a file
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObservationSink for JsonLinesSink {
    fn submit(&self, owner_uid: &str, observation: &MatchObservation) -> Result<(), SinkError> {
        let line = serde_json::to_string(&SubmittedObservation {
            owner_uid,
            observation,
        })?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps submissions in memory
#[derive(Default)]
pub struct MemorySink {
    submitted: Mutex<Vec<(String, MatchObservation)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<(String, MatchObservation)> {
        self.submitted.lock().clone()
    }
}

impl ObservationSink for MemorySink {
    fn submit(&self, owner_uid: &str, observation: &MatchObservation) -> Result<(), SinkError> {
        self.submitted
            .lock()
            .push((owner_uid.to_string(), observation.clone()));
        Ok(())
    }
}

impl<S: ObservationSink + ?Sized> ObservationSink for std::sync::Arc<S> {
    fn submit(&self, owner_uid: &str, observation: &MatchObservation) -> Result<(), SinkError> {
        (**self).submit(owner_uid, observation)
    }
}
