use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::error::{BatchError, RecognitionError};
use crate::models::batch::{BatchItem, BatchItemId, BatchStatus, ManualDecision};
use crate::models::bitmap::RawImage;
use crate::models::config::RecognizerConfig;
use crate::models::observation::{MatchObservation, MatchResult, PlayerStats, RecognitionAttempt};
use crate::models::roi::{CropFraction, CropVariant};
use crate::services::bitmap_loader::load_bitmap_async;
use crate::services::ocr::{
    extract_match_id, parse_match_result, parse_stat_line, PreprocessingService, RecognitionSettings,
    TextRecognizer, UpscalePass,
};
use crate::services::player_directory::{resolve_display_name, PlayerDirectory};
use crate::services::request_cache::RequestCache;
use crate::services::row_worker::RowWorker;
use crate::services::sink::ObservationSink;

/// Candidate crops in search order: regions outer, thresholds inner
#[derive(Debug, Clone)]
pub struct AttemptPlan<'a> {
    regions: &'a [CropFraction],
    thresholds: &'a [u8],
    next: usize,
}

impl<'a> AttemptPlan<'a> {
    pub fn new(regions: &'a [CropFraction], thresholds: &'a [u8]) -> Self {
        Self {
            regions,
            thresholds,
            next: 0,
        }
    }

    /// Upper bound on recognition calls for this plan
    pub fn ceiling(&self) -> usize {
        self.regions.len() * self.thresholds.len()
    }
}

impl Iterator for AttemptPlan<'_> {
    type Item = CropVariant;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.ceiling() {
            return None;
        }

        let region = self.regions[self.next / self.thresholds.len()];
        let threshold = self.thresholds[self.next % self.thresholds.len()];
        self.next += 1;

        Some(CropVariant { region, threshold })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ceiling().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

/// Mutable batch bookkeeping, behind one lock
#[derive(Default)]
struct BatchState {
    next_id: BatchItemId,
    items: Vec<BatchItem>,
    // Raw upload, kept until the item settles so an aborted run can restart
    uploads: HashMap<BatchItemId, Arc<Vec<u8>>>,
    owners: HashMap<BatchItemId, String>,
    in_progress: HashSet<BatchItemId>,
}

impl BatchState {
    fn item_mut(&mut self, id: BatchItemId) -> Result<&mut BatchItem, BatchError> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(BatchError::UnknownItem(id))
    }
}

/// Marks an item as running; dropped unreleased, it puts the item back in
/// the queue so an abandoned `process` future never strands it.
struct RunningGuard<'a> {
    state: &'a Mutex<BatchState>,
    id: BatchItemId,
    armed: bool,
}

impl RunningGuard<'_> {
    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.state.lock();
        state.in_progress.remove(&self.id);
        state.owners.remove(&self.id);
        if let Ok(item) = state.item_mut(self.id) {
            if item.status == BatchStatus::Running {
                item.status = BatchStatus::Queued;
            }
        }
        info!(item_id = self.id, "Item abandoned mid-run, back in queue");
    }
}

/// Drives screenshots through recognition and tracks the batch.
pub struct RecognitionService<R, D> {
    config: RecognizerConfig,
    recognizer: Arc<R>,
    worker: Arc<RowWorker>,
    directory: Arc<D>,
    names: Arc<RequestCache<String, String>>,
    sink: Arc<dyn ObservationSink>,
    preprocessing: PreprocessingService,
    state: Mutex<BatchState>,
}

impl<R, D> RecognitionService<R, D>
where
    R: TextRecognizer,
    D: PlayerDirectory,
{
    pub fn new(
        config: RecognizerConfig,
        recognizer: Arc<R>,
        worker: Arc<RowWorker>,
        directory: Arc<D>,
        names: Arc<RequestCache<String, String>>,
        sink: Arc<dyn ObservationSink>,
    ) -> Self {
        let preprocessing = PreprocessingService::new(config.preprocessing.clone());
        Self {
            config,
            recognizer,
            worker,
            directory,
            names,
            sink,
            preprocessing,
            state: Mutex::new(BatchState::default()),
        }
    }

    // ============================================================
    // Batch API
    // ============================================================

    /// Add an uploaded file to the batch
    pub fn enqueue(&self, file_label: impl Into<String>, bytes: Vec<u8>) -> BatchItemId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let item = BatchItem::new(id, file_label);
        info!(item_id = id, file_label = %item.file_label, "Item queued");

        state.items.push(item);
        state.uploads.insert(id, Arc::new(bytes));
        id
    }

    /// Snapshot of every item, in enqueue order
    pub fn items(&self) -> Vec<BatchItem> {
        self.state.lock().items.clone()
    }

    pub fn item(&self, id: BatchItemId) -> Option<BatchItem> {
        self.state.lock().items.iter().find(|item| item.id == id).cloned()
    }

    /// First item waiting for a Victory/Defeat/Skip decision
    pub fn pending_manual(&self) -> Option<BatchItem> {
        self.state
            .lock()
            .items
            .iter()
            .find(|item| item.status == BatchStatus::NeedsManualResult)
            .cloned()
    }

    /// Drop the whole batch
    pub fn clear(&self) {
        let mut state = self.state.lock();
        info!(items = state.items.len(), "Batch cleared");
        state.items.clear();
        state.uploads.clear();
        state.owners.clear();
    }

    /// Run one queued item through recognition.
    ///
    /// On cancellation nothing is committed: the item goes back to
    /// `Queued` and `BatchError::Aborted` is returned.
    pub async fn process(
        &self,
        id: BatchItemId,
        owner_uid: &str,
        cancel: &CancelToken,
    ) -> Result<BatchStatus, BatchError> {
        let (bytes, file_label) = {
            let mut state = self.state.lock();
            if state.in_progress.contains(&id) {
                return Err(BatchError::Busy(id));
            }

            let item = state.item_mut(id)?;
            if item.status.is_settled() {
                return Err(BatchError::Finished {
                    id,
                    status: item.status,
                });
            }
            cancel.check().map_err(|_| BatchError::Aborted)?;

            let bytes = state
                .uploads
                .get(&id)
                .cloned()
                .ok_or(BatchError::UnknownItem(id))?;

            let item = state.item_mut(id)?;
            item.status = BatchStatus::Running;
            let file_label = item.file_label.clone();
            state.in_progress.insert(id);
            state.owners.insert(id, owner_uid.to_string());
            (bytes, file_label)
        };
        let guard = RunningGuard {
            state: &self.state,
            id,
            armed: true,
        };

        info!(item_id = id, file_label = %file_label, "Item running");

        let outcome = self.recognize_upload(&bytes, &file_label, owner_uid, cancel).await;
        guard.release();
        self.commit(id, owner_uid, outcome)
    }

    /// Process every queued item in enqueue order
    pub async fn process_all(
        &self,
        owner_uid: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<(BatchItemId, BatchStatus)>, BatchError> {
        let queued: Vec<BatchItemId> = self
            .state
            .lock()
            .items
            .iter()
            .filter(|item| item.status == BatchStatus::Queued)
            .map(|item| item.id)
            .collect();

        let mut statuses = Vec::with_capacity(queued.len());
        for id in queued {
            match self.process(id, owner_uid, cancel).await {
                Ok(status) => statuses.push((id, status)),
                Err(BatchError::Busy(_)) | Err(BatchError::Finished { .. }) | Err(BatchError::UnknownItem(_)) => {
                    debug!(item_id = id, "Item no longer queued, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(statuses)
    }

    /// Apply the user's decision to an item awaiting one.
    ///
    /// Re-sending the decision already applied is a no-op.
    pub fn resolve_manually(&self, id: BatchItemId, decision: ManualDecision) -> Result<BatchItem, BatchError> {
        let (item, owner_uid) = {
            let mut state = self.state.lock();
            let item = state.item_mut(id)?;

            match (item.status, item.manual_decision) {
                (BatchStatus::Done, Some(previous)) if previous == decision => return Ok(item.clone()),
                (BatchStatus::Done, Some(previous)) => {
                    return Err(BatchError::ConflictingDecision { id, previous })
                }
                (BatchStatus::NeedsManualResult, _) => {}
                (status, _) => return Err(BatchError::NotAwaitingDecision { id, status }),
            }

            item.manual_decision = Some(decision);
            item.observation.get_or_insert_with(MatchObservation::default).result = decision.result();
            item.finish(BatchStatus::Done);
            let item = item.clone();

            state.uploads.remove(&id);
            let owner_uid = state.owners.remove(&id).unwrap_or_default();
            (item, owner_uid)
        };

        info!(item_id = id, %decision, "Item resolved manually");

        if let (Some(_), Some(observation)) = (decision.result(), &item.observation) {
            self.submit(id, &owner_uid, observation);
        }
        Ok(item)
    }

    fn commit(
        &self,
        id: BatchItemId,
        owner_uid: &str,
        outcome: Result<MatchObservation, RecognitionError>,
    ) -> Result<BatchStatus, BatchError> {
        let (status, submission) = {
            let mut state = self.state.lock();
            state.in_progress.remove(&id);
            let item = state.item_mut(id)?;

            let (status, submission) = match outcome {
                Err(RecognitionError::Aborted) => {
                    item.status = BatchStatus::Queued;
                    info!(item_id = id, "Item aborted, back in queue");
                    state.owners.remove(&id);
                    return Err(BatchError::Aborted);
                }
                Err(e) => {
                    error!(item_id = id, file_label = %item.file_label, error = %e, "Item failed");
                    item.error_message = Some(e.to_string());
                    item.finish(BatchStatus::Error);
                    (BatchStatus::Error, None)
                }
                Ok(observation) if observation.result.is_some() => {
                    item.observation = Some(observation.clone());
                    item.finish(BatchStatus::Done);
                    (BatchStatus::Done, Some(observation))
                }
                Ok(observation) => {
                    item.observation = Some(observation);
                    item.finish(BatchStatus::NeedsManualResult);
                    (BatchStatus::NeedsManualResult, None)
                }
            };

            info!(item_id = id, file_label = %item.file_label, %status, "Item settled");
            if status != BatchStatus::NeedsManualResult {
                state.uploads.remove(&id);
                state.owners.remove(&id);
            }
            (status, submission)
        };

        if let Some(observation) = submission {
            self.submit(id, owner_uid, &observation);
        }
        Ok(status)
    }

    fn submit(&self, id: BatchItemId, owner_uid: &str, observation: &MatchObservation) {
        if let Err(e) = self.sink.submit(owner_uid, observation) {
            warn!(item_id = id, error = %e, "Failed to hand over observation");
        }
    }

    // ============================================================
    // Recognition
    // ============================================================

    /// Full pipeline for one upload. Only decode failures and
    /// cancellation surface as errors.
    async fn recognize_upload(
        &self,
        bytes: &Arc<Vec<u8>>,
        file_label: &str,
        owner_uid: &str,
        cancel: &CancelToken,
    ) -> Result<MatchObservation, RecognitionError> {
        let image = load_bitmap_async(bytes.to_vec(), file_label.to_string(), cancel).await?;

        // Row localization runs on the worker while the banner is read here
        let (row, result) = tokio::join!(
            self.worker.locate(&image, cancel),
            self.detect_match_result(&image, cancel)
        );
        let result = result?;
        let row = match row {
            Ok(row) => row,
            Err(RecognitionError::Aborted) => return Err(RecognitionError::Aborted),
            Err(e) => {
                warn!(file_label, error = %e, "Row localization failed, using whole-frame regions");
                None
            }
        };

        let match_id = self.detect_match_id(&image, cancel).await?;

        let ttl = Duration::from_millis(self.config.cache.profile_ttl_ms);
        let name = resolve_display_name(self.directory.as_ref(), &self.names, owner_uid, ttl, cancel).await?;

        let stats = self
            .detect_stats(&image, row.as_ref().map(|r| &r.image), owner_uid, &name, cancel)
            .await?;

        let mut observation = MatchObservation {
            match_id,
            result,
            ..MatchObservation::default()
        };
        if let Some(stats) = &stats {
            observation = observation.with_stats(stats);
        }
        Ok(observation)
    }

    /// Read the VICTORY/DEFEAT banner, tightest region first
    pub async fn detect_match_result(
        &self,
        image: &RawImage,
        cancel: &CancelToken,
    ) -> Result<Option<MatchResult>, RecognitionError> {
        let regions = &self.config.regions;
        let settings = RecognitionSettings::new(
            self.config.ocr.banner_whitelist.clone(),
            self.config.ocr.preserve_interword_spaces,
        );

        self.search(
            image.as_rgba(),
            AttemptPlan::new(&regions.result_regions, &regions.result_thresholds),
            UpscalePass::ResultText,
            &settings,
            cancel,
            |text| parse_match_result(text),
        )
        .await
    }

    async fn detect_match_id(&self, image: &RawImage, cancel: &CancelToken) -> Result<Option<String>, RecognitionError> {
        let regions = &self.config.regions;
        let settings = RecognitionSettings::new(
            self.config.ocr.match_id_whitelist.clone(),
            self.config.ocr.preserve_interword_spaces,
        );

        self.search(
            image.as_rgba(),
            AttemptPlan::new(&regions.match_id_regions, &regions.match_id_thresholds),
            UpscalePass::MatchId,
            &settings,
            cancel,
            |text| extract_match_id(text),
        )
        .await
    }

    /// Stat line from the located row, else from the whole-frame stat regions
    async fn detect_stats(
        &self,
        image: &RawImage,
        row: Option<&RawImage>,
        owner_uid: &str,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<Option<PlayerStats>, RecognitionError> {
        let regions = &self.config.regions;
        let settings = RecognitionSettings::new(
            self.config.ocr.stat_whitelist.clone(),
            self.config.ocr.preserve_interword_spaces,
        );
        let parse = |text: &str| parse_stat_line(text, owner_uid, name);

        if let Some(row) = row {
            let full = [CropFraction::FULL];
            let stats = self
                .search(
                    row.as_rgba(),
                    AttemptPlan::new(&full, &regions.row_thresholds),
                    UpscalePass::ResultText,
                    &settings,
                    cancel,
                    parse,
                )
                .await?;
            if stats.is_some() {
                return Ok(stats);
            }
        }

        self.search(
            image.as_rgba(),
            AttemptPlan::new(&regions.stat_regions, &regions.row_thresholds),
            UpscalePass::ResultText,
            &settings,
            cancel,
            parse,
        )
        .await
    }

    /// Preprocess, recognize and parse each candidate in order; stop at the
    /// first parse. OCR failures advance to the next candidate.
    async fn search<T>(
        &self,
        image: &RgbaImage,
        plan: AttemptPlan<'_>,
        pass: UpscalePass,
        settings: &RecognitionSettings,
        cancel: &CancelToken,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>, RecognitionError> {
        let ceiling = plan.ceiling();

        for (index, variant) in plan.enumerate() {
            cancel.check()?;

            let binary = self
                .preprocessing
                .preprocess(image, &variant.region, variant.threshold, pass);

            let text = match cancel.run(self.recognizer.recognize(&binary, settings)).await? {
                Ok(text) => text,
                Err(RecognitionError::Aborted) => return Err(RecognitionError::Aborted),
                Err(e) => {
                    warn!(attempt = index, ?pass, threshold = variant.threshold, error = %e, "Recognition attempt failed");
                    continue;
                }
            };

            let attempt = RecognitionAttempt { index, variant, text };
            if let Some(parsed) = parse(&attempt.text) {
                debug!(attempt = index, ?pass, threshold = variant.threshold, "Attempt parsed");
                return Ok(Some(parsed));
            }
            debug!(attempt = index, ?pass, threshold = variant.threshold, text = %attempt.text, "Parse mismatch");
        }

        debug!(?pass, attempts = ceiling, "No attempt parsed");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::models::bitmap::ImagePayload;
    use crate::models::config::{OcrConfig, WorkerConfig};
    use crate::services::player_directory::StaticPlayerDirectory;
    use crate::services::row_localizer::tests::scoreboard_frame;
    use crate::services::row_worker::WorkerResponse;
    use crate::services::sink::MemorySink;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use tracing_test::traced_test;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Pass {
        Banner,
        MatchId,
        Stats,
    }

    type Script = Mutex<VecDeque<Result<String, RecognitionError>>>;

    /// OCR double: answers from a per-pass script, then with empty text
    #[derive(Default)]
    struct ScriptedRecognizer {
        ocr: OcrConfig,
        banner: Script,
        match_id: Script,
        stats: Script,
        calls: Mutex<Vec<Pass>>,
    }

    impl ScriptedRecognizer {
        fn banner(self, texts: &[&str]) -> Self {
            self.banner.lock().extend(texts.iter().map(|t| Ok(t.to_string())));
            self
        }

        fn match_id(self, texts: &[&str]) -> Self {
            self.match_id.lock().extend(texts.iter().map(|t| Ok(t.to_string())));
            self
        }

        fn stats(self, texts: &[&str]) -> Self {
            self.stats.lock().extend(texts.iter().map(|t| Ok(t.to_string())));
            self
        }

        fn calls(&self, pass: Pass) -> usize {
            self.calls.lock().iter().filter(|p| **p == pass).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        async fn recognize(
            &self,
            _image: &GrayImage,
            settings: &RecognitionSettings,
        ) -> Result<String, RecognitionError> {
            let whitelist = &settings.character_whitelist;
            let (pass, script) = if *whitelist == self.ocr.banner_whitelist {
                (Pass::Banner, &self.banner)
            } else if *whitelist == self.ocr.match_id_whitelist {
                (Pass::MatchId, &self.match_id)
            } else {
                (Pass::Stats, &self.stats)
            };

            self.calls.lock().push(pass);
            let next = script.lock().pop_front();
            next.unwrap_or_else(|| Ok(String::new()))
        }
    }

    struct FailingSink;

    impl ObservationSink for FailingSink {
        fn submit(&self, _owner_uid: &str, _observation: &MatchObservation) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        }
    }

    struct Harness {
        service: RecognitionService<ScriptedRecognizer, StaticPlayerDirectory>,
        recognizer: Arc<ScriptedRecognizer>,
        sink: Arc<MemorySink>,
    }

    fn harness_with_worker(recognizer: ScriptedRecognizer, worker: RowWorker) -> Harness {
        let config = RecognizerConfig::default();
        let recognizer = Arc::new(recognizer);
        let sink = Arc::new(MemorySink::new());
        let service = RecognitionService::new(
            config.clone(),
            recognizer.clone(),
            Arc::new(worker),
            Arc::new(StaticPlayerDirectory::new().with_player("uid-1", "Nova")),
            Arc::new(RequestCache::new(config.cache.clone())),
            sink.clone(),
        );
        Harness {
            service,
            recognizer,
            sink,
        }
    }

    fn harness(recognizer: ScriptedRecognizer) -> Harness {
        let config = RecognizerConfig::default();
        let worker = RowWorker::spawn(config.localizer.clone(), &config.worker).unwrap();
        harness_with_worker(recognizer, worker)
    }

    /// Worker whose every request outlives `response_timeout_ms`
    fn stalled_worker(response_timeout_ms: u64, stall: Duration) -> RowWorker {
        let config = WorkerConfig {
            init_timeout_ms: 1_000,
            response_timeout_ms,
        };
        RowWorker::spawn_with(&config, move || {
            Ok(move |_: ImagePayload| {
                std::thread::sleep(stall);
                WorkerResponse::not_found()
            })
        })
        .unwrap()
    }

    fn screenshot_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(scoreboard_frame())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    const SCENARIO_STATS: &str = "1234\n12/8/3\n4567\n33.5%";

    #[test]
    fn test_attempt_plan_is_crop_major() {
        let regions = [CropFraction::new(0.0, 0.0, 0.5, 0.5), CropFraction::FULL];
        let plan = AttemptPlan::new(&regions, &[10, 20, 30]);
        assert_eq!(plan.ceiling(), 6);

        let order: Vec<(f64, u8)> = plan.map(|v| (v.region.w, v.threshold)).collect();
        assert_eq!(
            order,
            vec![(0.5, 10), (0.5, 20), (0.5, 30), (1.0, 10), (1.0, 20), (1.0, 30)]
        );
    }

    #[test]
    fn test_attempt_plan_empty() {
        assert_eq!(AttemptPlan::new(&[CropFraction::FULL], &[]).count(), 0);
        assert_eq!(AttemptPlan::new(&[], &[1, 2]).count(), 0);
    }

    #[tokio::test]
    async fn test_scenario_victory_with_stats() {
        let h = harness(
            ScriptedRecognizer::default()
                .banner(&["", "noise", "VICTORY"])
                .match_id(&["Match ID: A1B2C3"])
                .stats(&[SCENARIO_STATS]),
        );

        let id = h.service.enqueue("shot.png", screenshot_bytes());
        let status = h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();
        assert_eq!(status, BatchStatus::Done);

        let item = h.service.item(id).unwrap();
        let observation = item.observation.unwrap();
        assert_eq!(observation.result, Some(MatchResult::Victory));
        assert_eq!(observation.match_id.as_deref(), Some("A1B2C3"));
        assert_eq!(observation.score, Some(1234));
        assert_eq!(observation.kills, Some(12));
        assert_eq!(observation.deaths, Some(8));
        assert_eq!(observation.assists, Some(3));
        assert_eq!(observation.damage, Some(4567));
        assert_eq!(observation.damage_share, Some(33.5));
        assert!(item.completed_at.is_some());

        // Stopped at the first parse, well under the 12-call ceiling
        assert_eq!(h.recognizer.calls(Pass::Banner), 3);

        let submitted = h.sink.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, "uid-1");
        assert_eq!(submitted[0].1, observation);
    }

    #[tokio::test]
    async fn test_unreadable_banner_needs_manual_result() {
        let h = harness(ScriptedRecognizer::default().stats(&[SCENARIO_STATS]));

        let id = h.service.enqueue("blurry.png", screenshot_bytes());
        let status = h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        assert_eq!(status, BatchStatus::NeedsManualResult);
        // Every region x threshold pairing tried exactly once
        assert_eq!(h.recognizer.calls(Pass::Banner), 12);

        let pending = h.service.pending_manual().unwrap();
        assert_eq!(pending.id, id);
        assert_eq!(pending.file_label, "blurry.png");
        // Partial observation is kept for the decision
        assert_eq!(pending.observation.unwrap().score, Some(1234));
        assert!(h.sink.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_manual_decision_is_idempotent() {
        let h = harness(ScriptedRecognizer::default());
        let id = h.service.enqueue("blurry.png", screenshot_bytes());
        h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        let item = h.service.resolve_manually(id, ManualDecision::Defeat).unwrap();
        assert_eq!(item.status, BatchStatus::Done);
        assert_eq!(item.observation.as_ref().unwrap().result, Some(MatchResult::Defeat));
        assert_eq!(h.sink.submitted().len(), 1);

        // Same decision again: no-op
        let again = h.service.resolve_manually(id, ManualDecision::Defeat).unwrap();
        assert_eq!(again, item);
        assert_eq!(h.sink.submitted().len(), 1);

        // Different decision: rejected
        assert_eq!(
            h.service.resolve_manually(id, ManualDecision::Victory),
            Err(BatchError::ConflictingDecision {
                id,
                previous: ManualDecision::Defeat
            })
        );
        assert!(h.service.pending_manual().is_none());
    }

    #[tokio::test]
    async fn test_skip_is_done_without_result() {
        let h = harness(ScriptedRecognizer::default());
        let id = h.service.enqueue("blurry.png", screenshot_bytes());
        h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        let item = h.service.resolve_manually(id, ManualDecision::Skip).unwrap();
        assert_eq!(item.status, BatchStatus::Done);
        assert!(item.error_message.is_none());
        assert_eq!(item.observation.unwrap().result, None);
        assert!(h.sink.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_manual_decision_requires_waiting_item() {
        let h = harness(ScriptedRecognizer::default());
        let id = h.service.enqueue("shot.png", screenshot_bytes());

        assert_eq!(
            h.service.resolve_manually(id, ManualDecision::Victory),
            Err(BatchError::NotAwaitingDecision {
                id,
                status: BatchStatus::Queued
            })
        );
        assert_eq!(
            h.service.resolve_manually(99, ManualDecision::Victory),
            Err(BatchError::UnknownItem(99))
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_worker_timeout_falls_back_to_whole_frame() {
        let h = harness_with_worker(
            ScriptedRecognizer::default()
                .banner(&["DEFEAT"])
                .stats(&[SCENARIO_STATS]),
            stalled_worker(50, Duration::from_millis(500)),
        );

        let id = h.service.enqueue("slow.png", screenshot_bytes());
        let status = h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        assert_eq!(status, BatchStatus::Done);
        let observation = h.service.item(id).unwrap().observation.unwrap();
        assert_eq!(observation.result, Some(MatchResult::Defeat));
        assert_eq!(observation.kills, Some(12));
        assert!(logs_contain("Row localization failed"));
    }

    #[tokio::test]
    async fn test_worker_timeout_without_banner_needs_manual() {
        let h = harness_with_worker(
            ScriptedRecognizer::default(),
            stalled_worker(50, Duration::from_millis(500)),
        );

        let id = h.service.enqueue("slow.png", screenshot_bytes());
        let status = h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        assert_eq!(status, BatchStatus::NeedsManualResult);
        assert!(h.service.item(id).unwrap().error_message.is_none());
    }

    #[tokio::test]
    async fn test_cancel_right_after_submit() {
        let h = harness(ScriptedRecognizer::default().banner(&["VICTORY"]));
        let id = h.service.enqueue("shot.png", screenshot_bytes());

        let cancel = CancelToken::new();
        cancel.cancel();

        let result = h.service.process(id, "uid-1", &cancel).await;
        assert_eq!(result, Err(BatchError::Aborted));

        let item = h.service.item(id).unwrap();
        assert_eq!(item.status, BatchStatus::Queued);
        assert!(item.observation.is_none());
        assert_eq!(h.recognizer.total_calls(), 0);
        assert!(h.sink.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_worker_round_trip() {
        let h = harness_with_worker(
            ScriptedRecognizer::default().banner(&["VICTORY", "VICTORY"]),
            stalled_worker(5_000, Duration::from_millis(300)),
        );
        let id = h.service.enqueue("shot.png", screenshot_bytes());

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = h.service.process(id, "uid-1", &cancel).await;
        assert_eq!(result, Err(BatchError::Aborted));

        let item = h.service.item(id).unwrap();
        assert!(matches!(item.status, BatchStatus::Queued | BatchStatus::Running));
        assert!(item.observation.is_none());
        assert!(h.sink.submitted().is_empty());

        // The item can be run again afterwards
        let status = h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();
        assert_eq!(status, BatchStatus::Done);
    }

    #[tokio::test]
    async fn test_dropped_run_returns_item_to_queue() {
        let h = harness_with_worker(
            ScriptedRecognizer::default().banner(&["VICTORY", "VICTORY"]),
            stalled_worker(5_000, Duration::from_millis(300)),
        );
        let id = h.service.enqueue("shot.png", screenshot_bytes());

        let cancel = CancelToken::new();
        let run = h.service.process(id, "uid-1", &cancel);
        assert!(tokio::time::timeout(Duration::from_millis(50), run).await.is_err());

        let item = h.service.item(id).unwrap();
        assert_eq!(item.status, BatchStatus::Queued);
        assert!(item.observation.is_none());
        assert!(h.service.state.lock().in_progress.is_empty());

        // Not stuck as busy: the batch picks it up again
        let statuses = h.service.process_all("uid-1", &CancelToken::new()).await.unwrap();
        assert_eq!(statuses, vec![(id, BatchStatus::Done)]);
    }

    #[tokio::test]
    async fn test_settled_items_release_owner() {
        let h = harness(ScriptedRecognizer::default().banner(&["VICTORY"]));
        let done = h.service.enqueue("a.png", screenshot_bytes());
        let manual = h.service.enqueue("b.png", screenshot_bytes());
        let broken = h.service.enqueue("c.png", Vec::new());

        h.service.process_all("uid-1", &CancelToken::new()).await.unwrap();
        {
            let state = h.service.state.lock();
            assert!(!state.owners.contains_key(&done));
            assert!(!state.owners.contains_key(&broken));
            // Still needed for the sink once the decision arrives
            assert_eq!(state.owners.get(&manual).map(String::as_str), Some("uid-1"));
        }

        h.service.resolve_manually(manual, ManualDecision::Victory).unwrap();
        assert!(h.service.state.lock().owners.is_empty());
        assert_eq!(h.sink.submitted()[1].0, "uid-1");
    }

    #[tokio::test]
    async fn test_ocr_failure_advances_attempt() {
        let recognizer = ScriptedRecognizer::default();
        recognizer
            .banner
            .lock()
            .extend([Err(RecognitionError::Ocr("engine busy".to_string())), Ok("victory".to_string())]);
        let h = harness(recognizer);

        let id = h.service.enqueue("shot.png", screenshot_bytes());
        let status = h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        assert_eq!(status, BatchStatus::Done);
        assert_eq!(h.recognizer.calls(Pass::Banner), 2);
    }

    #[tokio::test]
    async fn test_decode_failure_is_error_state() {
        let h = harness(ScriptedRecognizer::default());
        let id = h.service.enqueue("broken.png", b"not an image".to_vec());

        let status = h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();
        assert_eq!(status, BatchStatus::Error);

        let item = h.service.item(id).unwrap();
        assert!(item.error_message.unwrap().contains("broken.png"));
        assert!(item.observation.is_none());
        assert_eq!(h.recognizer.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_settled_item_cannot_rerun() {
        let h = harness(ScriptedRecognizer::default().banner(&["VICTORY"]));
        let id = h.service.enqueue("shot.png", screenshot_bytes());
        h.service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        assert_eq!(
            h.service.process(id, "uid-1", &CancelToken::new()).await,
            Err(BatchError::Finished {
                id,
                status: BatchStatus::Done
            })
        );
        assert_eq!(
            h.service.process(42, "uid-1", &CancelToken::new()).await,
            Err(BatchError::UnknownItem(42))
        );
    }

    #[tokio::test]
    async fn test_process_all_in_enqueue_order() {
        let h = harness(ScriptedRecognizer::default().banner(&["VICTORY", "DEFEAT"]));
        let first = h.service.enqueue("a.png", screenshot_bytes());
        let second = h.service.enqueue("b.png", screenshot_bytes());
        let broken = h.service.enqueue("c.png", Vec::new());

        let statuses = h.service.process_all("uid-1", &CancelToken::new()).await.unwrap();
        assert_eq!(
            statuses,
            vec![
                (first, BatchStatus::Done),
                (second, BatchStatus::Done),
                (broken, BatchStatus::Error)
            ]
        );

        let items = h.service.items();
        assert_eq!(items[0].observation.as_ref().unwrap().result, Some(MatchResult::Victory));
        assert_eq!(items[1].observation.as_ref().unwrap().result, Some(MatchResult::Defeat));
        assert_eq!(h.sink.submitted().len(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sink_failure_keeps_status() {
        let config = RecognizerConfig::default();
        let worker = RowWorker::spawn(config.localizer.clone(), &config.worker).unwrap();
        let service = RecognitionService::new(
            config.clone(),
            Arc::new(ScriptedRecognizer::default().banner(&["VICTORY"])),
            Arc::new(worker),
            Arc::new(StaticPlayerDirectory::new()),
            Arc::new(RequestCache::new(config.cache.clone())),
            Arc::new(FailingSink),
        );

        let id = service.enqueue("shot.png", screenshot_bytes());
        let status = service.process(id, "uid-1", &CancelToken::new()).await.unwrap();

        assert_eq!(status, BatchStatus::Done);
        assert!(logs_contain("Failed to hand over observation"));
    }

    #[tokio::test]
    async fn test_clear_drops_batch() {
        let h = harness(ScriptedRecognizer::default());
        h.service.enqueue("a.png", screenshot_bytes());
        h.service.enqueue("b.png", screenshot_bytes());
        assert_eq!(h.service.items().len(), 2);

        h.service.clear();
        assert!(h.service.items().is_empty());

        // Ids keep increasing after a clear
        let id = h.service.enqueue("c.png", screenshot_bytes());
        assert_eq!(id, 3);
    }
}
