//! Dedicated thread for row localization.
//!
//! Frames cross the boundary as `ImagePayload` messages and every request
//! gets exactly one `WorkerResponse` on its own reply channel. Nothing is
//! shared with the worker besides those messages.

use std::io::Cursor;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::Duration;

use image::{imageops, DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

use crate::cancel::CancelToken;
use crate::error::RecognitionError;
use crate::models::bitmap::{ImagePayload, RawImage};
use crate::models::config::{LocalizerConfig, WorkerConfig};
use crate::services::row_localizer::RowLocalizer;

/// Geometry of a located row, for diagnostics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowDebug {
    #[serde(rename = "rowY")]
    pub row_y: u32,
    #[serde(rename = "rowH")]
    pub row_h: u32,
    #[serde(rename = "W")]
    pub frame_width: u32,
    #[serde(rename = "H")]
    pub frame_height: u32,
}

/// Reply to one locate request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WorkerResponse {
    /// PNG of the full-width row slice
    Row { blob: Vec<u8>, debug: RowDebug },
    NotFound { not_found: bool },
    Error { error: String },
}

impl WorkerResponse {
    pub fn not_found() -> Self {
        Self::NotFound { not_found: true }
    }
}

struct WorkerRequest {
    image: ImagePayload,
    reply: oneshot::Sender<WorkerResponse>,
}

#[derive(Debug, Clone, PartialEq)]
enum Readiness {
    Starting,
    Ready,
    Failed(String),
}

/// Located row cut out of the frame
#[derive(Debug, Clone)]
pub struct RowLocation {
    pub image: RawImage,
    pub debug: RowDebug,
}

/// Handle to the row localization thread. The thread exits once every
/// handle is dropped.
pub struct RowWorker {
    requests: Sender<WorkerRequest>,
    readiness: watch::Receiver<Readiness>,
    init_timeout: Duration,
    response_timeout: Duration,
}

impl RowWorker {
    /// Start a worker running the row localizer
    pub fn spawn(localizer: LocalizerConfig, config: &WorkerConfig) -> Result<Self, RecognitionError> {
        Self::spawn_with(config, move || {
            let localizer = RowLocalizer::new(localizer);
            Ok(move |payload: ImagePayload| handle_locate(&localizer, payload))
        })
    }

    /// Start a worker whose handler is built by `init` on the worker thread
    pub(crate) fn spawn_with<I, H>(config: &WorkerConfig, init: I) -> Result<Self, RecognitionError>
    where
        I: FnOnce() -> Result<H, String> + Send + 'static,
        H: FnMut(ImagePayload) -> WorkerResponse + 'static,
    {
        let (requests, inbox) = channel::<WorkerRequest>();
        let (ready_tx, readiness) = watch::channel(Readiness::Starting);

        thread::Builder::new()
            .name("row-localizer".to_string())
            .spawn(move || {
                let handler = match init() {
                    Ok(handler) => handler,
                    Err(e) => {
                        error!(error = %e, "Row worker failed to initialize");
                        ready_tx.send_replace(Readiness::Failed(e));
                        return;
                    }
                };
                ready_tx.send_replace(Readiness::Ready);
                run_worker(inbox, handler);
            })
            .map_err(|e| RecognitionError::Worker(format!("Failed to spawn worker thread: {}", e)))?;

        Ok(Self {
            requests,
            readiness,
            init_timeout: Duration::from_millis(config.init_timeout_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
        })
    }

    /// Send a frame to the worker and wait for its answer.
    ///
    /// `Ok(None)` means no row was found. Cancellation drops the pending
    /// reply; the worker's late answer is discarded.
    pub async fn locate(
        &self,
        image: &RawImage,
        cancel: &CancelToken,
    ) -> Result<Option<RowLocation>, RecognitionError> {
        cancel.check()?;
        self.wait_ready(cancel).await?;

        let (reply, response) = oneshot::channel();
        self.requests
            .send(WorkerRequest {
                image: image.to_payload(),
                reply,
            })
            .map_err(|_| RecognitionError::Worker("worker thread has exited".to_string()))?;

        let response = cancel
            .run(tokio::time::timeout(self.response_timeout, response))
            .await?
            .map_err(|_| RecognitionError::WorkerTimeout(self.response_timeout))?
            .map_err(|_| RecognitionError::Worker("worker dropped the request".to_string()))?;

        match response {
            WorkerResponse::Row { blob, debug } => {
                let row = image::load_from_memory_with_format(&blob, ImageFormat::Png)
                    .map_err(|e| RecognitionError::Worker(format!("Invalid row image: {}", e)))?;
                Ok(Some(RowLocation {
                    image: RawImage::new(row.to_rgba8()),
                    debug,
                }))
            }
            WorkerResponse::NotFound { .. } => Ok(None),
            WorkerResponse::Error { error } => Err(RecognitionError::Worker(error)),
        }
    }

    async fn wait_ready(&self, cancel: &CancelToken) -> Result<(), RecognitionError> {
        let mut readiness = self.readiness.clone();

        let state = cancel
            .run(tokio::time::timeout(
                self.init_timeout,
                readiness.wait_for(|state| *state != Readiness::Starting),
            ))
            .await?
            .map_err(|_| RecognitionError::CvInitTimeout(self.init_timeout))?
            .map_err(|_| RecognitionError::Worker("worker thread has exited".to_string()))?
            .clone();

        match state {
            Readiness::Failed(e) => Err(RecognitionError::Worker(e)),
            _ => Ok(()),
        }
    }
}

/// Serve requests until every sender is dropped
fn run_worker<H>(inbox: Receiver<WorkerRequest>, mut handler: H)
where
    H: FnMut(ImagePayload) -> WorkerResponse,
{
    info!("Row worker started");

    while let Ok(request) = inbox.recv() {
        let response = handler(request.image);
        if request.reply.send(response).is_err() {
            debug!("Row request abandoned by caller");
        }
    }

    info!("Row worker finished");
}

/// Default handler: localize, cut the row out and encode it as PNG
fn handle_locate(localizer: &RowLocalizer, payload: ImagePayload) -> WorkerResponse {
    let (frame_width, frame_height) = (payload.width, payload.height);
    let Some(frame) = payload.into_rgba() else {
        return WorkerResponse::Error {
            error: format!(
                "pixel buffer does not match {}x{} RGBA",
                frame_width, frame_height
            ),
        };
    };

    let Some(row) = localizer.locate(&frame) else {
        debug!(frame_width, frame_height, "No highlighted row");
        return WorkerResponse::not_found();
    };

    let crop = row.crop;
    let slice = imageops::crop_imm(&frame, crop.x, crop.y, crop.width, crop.height).to_image();

    let mut blob = Vec::new();
    if let Err(e) = DynamicImage::ImageRgba8(slice).write_to(&mut Cursor::new(&mut blob), ImageFormat::Png) {
        return WorkerResponse::Error {
            error: format!("Failed to encode row: {}", e),
        };
    }

    debug!(row_y = crop.y, row_h = crop.height, score = row.score, "Row located");

    WorkerResponse::Row {
        blob,
        debug: RowDebug {
            row_y: crop.y,
            row_h: crop.height,
            frame_width,
            frame_height,
        },
    }
}
