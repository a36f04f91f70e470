//! Run orchestration: one reader thread per run feeding a bounded pool of
//! chunk workers, fanned back in through the merger into a sink.

mod reader;
pub mod summary;
pub mod worker;

pub use summary::{FailureReason, RunCounts, RunStatus, RunSummary, SourceSummary};
pub use worker::{ChunkOutcome, ChunkProcessor, FAILED_TAG, ProcessedChunk};

use crate::config::EngineConfig;
use crate::error::{FieldlineError, IngestError, MappingError, ValidationError};
use crate::ingest::{ChunkStream, DetectionCache, MemoryProbe, SourceInput};
use crate::lineage::LineageStore;
use crate::mapping::{AutoMapper, HeuristicScorer, MappingPlan, source_nodes, target_nodes};
use crate::merge::{MergeMode, MergeReport, Merger, ordered_pool};
use crate::rules::{
    CustomFunction, LookupRegistry, LookupSource, RuleContext, RuleEngine, RuleSet, TransformRule,
};
use crate::sink::{LineageSink, RunSink};
use crate::types::{Chunk, OutputBatch};
use crate::validate::{RunQuality, ValidationResult, Validator, summarize};
use chrono::Utc;
use futures::StreamExt;
use reader::{ReaderEvent, SourceReader};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

/// A configured engine. Reusable across runs; lineage accumulates in one
/// store so identical inputs reconcile with earlier runs.
pub struct Pipeline {
    config: EngineConfig,
    context: RuleContext,
    heuristic: Option<Arc<dyn HeuristicScorer>>,
    lineage: Arc<LineageStore>,
    cache: Arc<DetectionCache>,
    cancel: CancellationToken,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("context", &self.context)
            .field("lineage", &self.lineage)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline with built-in functions and the lookup tables declared in
    /// configuration.
    pub fn new(config: EngineConfig) -> Self {
        let lookups = LookupRegistry::from_tables(&config.lookups);
        let lineage = Arc::new(LineageStore::new(&config.lineage));
        Self {
            context: RuleContext::with_lookups(lookups),
            heuristic: Some(Arc::new(crate::mapping::SynonymHeuristic::default())),
            lineage,
            cache: Arc::new(DetectionCache::new()),
            cancel: CancellationToken::new(),
            memory_probe: None,
            config,
        }
    }

    /// Register a custom function callable from `custom` rules.
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        function: impl CustomFunction + 'static,
    ) -> Self {
        self.context.functions.register(name, function);
        self
    }

    /// Register a reference table for `lookup` rules and referential checks.
    pub fn with_lookup(mut self, name: impl Into<String>, source: Arc<dyn LookupSource>) -> Self {
        self.context.lookups.register(name, source);
        self
    }

    /// Replace the auto mapper's heuristic signal; `None` disables it.
    pub fn with_heuristic(mut self, heuristic: Option<Arc<dyn HeuristicScorer>>) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lineage(&self) -> &Arc<LineageStore> {
        &self.lineage
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn auto_mapper(&self) -> AutoMapper {
        let mapper = AutoMapper::new(self.config.mapping.threshold);
        match &self.heuristic {
            Some(heuristic) => mapper.with_heuristic(Arc::clone(heuristic)),
            None => mapper.without_heuristic(),
        }
    }

    /// Propose a mapping for a chunk against the configured targets.
    pub fn plan_for_chunk(&self, chunk: &Chunk) -> MappingPlan {
        let sources = source_nodes(chunk, self.config.mapping.sample_rows);
        let targets = target_nodes(&self.config.mapping.targets);
        self.auto_mapper().propose(&sources, &targets)
    }

    /// Read the first chunk of `source` and propose a mapping for it.
    /// Blocking.
    pub fn propose_mapping(&self, source: SourceInput) -> Result<MappingPlan, FieldlineError> {
        let mut stream = ChunkStream::open(
            &source.name,
            source.reader,
            &self.config.stream,
            &self.cache,
        )?;
        let chunk = match stream.next() {
            Some(chunk) => chunk?,
            None => empty_chunk(&source.name, Arc::clone(stream.header())),
        };
        Ok(self.plan_for_chunk(&chunk))
    }

    /// Process `sources` end to end into `sink`.
    ///
    /// Configuration errors return `Err` before anything is read. Every
    /// other outcome, fatal ones included, is reported through the
    /// returned summary, which is also written to the sink.
    pub async fn run(
        &self,
        sources: Vec<SourceInput>,
        sink: &mut dyn RunSink,
    ) -> Result<RunSummary, FieldlineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);
        self.run_inner(run_id, sources, sink).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        sources: Vec<SourceInput>,
        sink: &mut dyn RunSink,
    ) -> Result<RunSummary, FieldlineError> {
        let started_at = Utc::now();

        // Configuration errors surface before any source is touched.
        self.config.validate()?;
        RuleSet::compile(&self.config.rules, &self.context)?;
        let validator = Arc::new(Validator::new(
            &self.config.validation,
            self.context.lookups.clone(),
        )?);

        let mode = MergeMode::from_config(&self.config.merge);
        let names: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();
        let mut state = RunState::new(&names, mode.clone(), self.lineage.next_sequence());
        info!(sources = names.len(), mode = ?mode, "Starting run");

        let run_token = self.cancel.child_token();
        let pool = self.config.stream.worker_pool_size.max(1);
        let (tx, mut rx) = mpsc::channel(pool);
        let reader = SourceReader {
            sources,
            config: self.config.stream.clone(),
            cache: Arc::clone(&self.cache),
            cancel: run_token.clone(),
            memory_probe: self.memory_probe.clone(),
        };
        let reader_task = tokio::task::spawn_blocking(move || reader.run(tx));

        // The mapping plan is settled from the first chunk before any
        // worker starts.
        let mut prelude = Vec::new();
        let mut rules = self.config.rules.clone();
        if self.config.mapping.auto {
            while let Some(event) = rx.recv().await {
                let settled = matches!(
                    event,
                    ReaderEvent::Chunk { .. } | ReaderEvent::Failed { .. } | ReaderEvent::Closed { .. }
                );
                prelude.push(event);
                if settled {
                    break;
                }
            }
            if let Some(chunk) = first_chunk(&prelude) {
                let plan = self.plan_for_chunk(&chunk);
                state.unmapped_targets = plan.unmapped.clone();
                if let Err(MappingError::Ambiguous { targets }) =
                    plan.require_mandatory(&self.config.mapping.targets)
                {
                    error!(targets = ?targets, "Mandatory targets left unmapped");
                    state.fail(FailureReason::MappingAmbiguous { targets });
                    run_token.cancel();
                }
                // Explicit rules own their targets.
                let stubs: Vec<TransformRule> = plan
                    .rule_stubs(self.config.mapping.activate_stubs)
                    .into_iter()
                    .filter(|stub| !rules.iter().any(|r| r.target == stub.target))
                    .collect();
                info!(
                    candidates = plan.candidates.len(),
                    unmapped = plan.unmapped.len(),
                    stubs = stubs.len(),
                    active = self.config.mapping.activate_stubs,
                    "Auto mapping settled"
                );
                rules.extend(stubs);
            }
        }

        let rule_set = match RuleSet::compile(&rules, &self.context) {
            Ok(set) => set,
            Err(e) => {
                run_token.cancel();
                drop(rx);
                let _ = reader_task.await;
                return Err(e.into());
            }
        };
        let join_mode = state.join_mode;
        let processor = ChunkProcessor {
            engine: Arc::new(RuleEngine::new(
                Arc::new(rule_set),
                self.config.rule_engine.max_rule_failures,
            )),
            validator: (!join_mode).then(|| Arc::clone(&validator)),
            lineage: self
                .config
                .lineage
                .enabled
                .then(|| Arc::clone(&self.lineage)),
            systems: self.config.lineage.systems.clone(),
            cancel: run_token.clone(),
        };

        let work = Arc::new(move |event: ReaderEvent| match event {
            ReaderEvent::Chunk {
                source_index,
                chunk,
            } => WorkerEvent::Chunk {
                source_index,
                outcome: processor.process(chunk),
            },
            other => WorkerEvent::Reader(other),
        });
        let events = futures::stream::iter(prelude).chain(ReceiverStream::new(rx));
        let mut results = std::pin::pin!(ordered_pool(events, pool, work));

        while let Some(joined) = results.next().await {
            match joined {
                Ok(event) => self.handle(event, &mut state, sink, &run_token),
                Err(e) => {
                    error!(error = %e, "Worker task failed");
                    state.fail(FailureReason::Worker {
                        message: e.to_string(),
                    });
                    run_token.cancel();
                }
            }
            if let Err(e) = self.maybe_compact(&mut state, sink) {
                state.fail(FailureReason::Sink {
                    message: e.to_string(),
                });
                run_token.cancel();
            }
        }
        if let Err(e) = reader_task.await {
            state.fail(FailureReason::Worker {
                message: e.to_string(),
            });
        }

        self.finish(state, validator.as_ref(), sink, run_id, started_at)
    }

    fn handle(
        &self,
        event: WorkerEvent,
        state: &mut RunState,
        sink: &mut dyn RunSink,
        run_token: &CancellationToken,
    ) {
        // In-flight work drains after a failure, but nothing more is emitted.
        if state.failure.is_some() {
            return;
        }
        let result = match event {
            WorkerEvent::Reader(ReaderEvent::Opened {
                source_index,
                header,
                detection,
                compression,
            }) => {
                if let Some(source) = state.sources.get_mut(source_index) {
                    source.header = header.as_ref().clone();
                    source.detection = Some(detection);
                    source.compression = Some(compression);
                    if detection.degraded {
                        state
                            .warnings
                            .push(format!("degraded encoding detection for '{}'", source.name));
                    }
                }
                Ok(())
            }
            WorkerEvent::Reader(ReaderEvent::Chunk { .. }) => Ok(()),
            WorkerEvent::Reader(ReaderEvent::Closed {
                source_index,
                stats,
            }) => {
                state.counts.malformed_rows += stats.malformed_rows;
                if let Some(source) = state.sources.get_mut(source_index) {
                    source.stats = stats;
                }
                let ready = state.merger.close_source(source_index);
                state.emit(ready, sink)
            }
            WorkerEvent::Reader(ReaderEvent::Failed {
                source_index,
                error,
            }) => {
                let source = state
                    .sources
                    .get(source_index)
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                error!(source = %source, error = %error, "Source failed");
                state.fail(ingest_failure(source, error));
                run_token.cancel();
                Ok(())
            }
            WorkerEvent::Chunk {
                source_index,
                outcome,
            } => match outcome {
                ChunkOutcome::Discarded => {
                    state.counts.discarded_chunks += 1;
                    Ok(())
                }
                ChunkOutcome::Invalid(e) => {
                    error!(error = %e, "Strict validation failed");
                    state.fail(validation_failure(e));
                    run_token.cancel();
                    Ok(())
                }
                ChunkOutcome::Processed(processed) => {
                    state.absorb(source_index, *processed, sink)
                }
            },
        };
        if let Err(e) = result {
            error!(error = %e, "Sink failed");
            state.fail(FailureReason::Sink {
                message: e.to_string(),
            });
            run_token.cancel();
        }
    }

    fn maybe_compact(
        &self,
        state: &mut RunState,
        sink: &mut dyn RunSink,
    ) -> Result<(), crate::error::SinkError> {
        if !self.config.lineage.enabled
            || self.lineage.len() <= self.config.lineage.compact_after_edges
        {
            return Ok(());
        }
        let compacted = self
            .lineage
            .compact(Utc::now(), &mut LineageSink(&mut *sink))?;
        state.counts.lineage_compacted += compacted as u64;
        Ok(())
    }

    fn finish(
        &self,
        mut state: RunState,
        validator: &Validator,
        sink: &mut dyn RunSink,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<RunSummary, FieldlineError> {
        let lineage = self
            .config
            .lineage
            .enabled
            .then_some(self.lineage.as_ref());

        let merger = std::mem::replace(
            &mut state.merger,
            Merger::new(MergeMode::Concatenate, Vec::new()),
        );
        if state.failure.is_none() {
            let (rest, report) = merger.finish(lineage);
            let rest = if state.join_mode {
                self.validate_joined(&mut state, validator, rest)
            } else {
                rest
            };
            if let Err(e) = state.emit(rest, sink) {
                state.fail(FailureReason::Sink {
                    message: e.to_string(),
                });
            }
            if !report.unmatched_keys.is_empty() {
                state.warnings.push(format!(
                    "{} join keys missing from at least one source",
                    report.unmatched_keys.len()
                ));
            }
            state.merge = report;
        }

        let quality = summarize(&state.validations, validator.weights());
        if state.failure.is_none() {
            if let Some(threshold) = self.config.validation.min_quality_score {
                if quality.metrics.quality_score < threshold {
                    warn!(
                        score = quality.metrics.quality_score,
                        threshold, "Quality below threshold"
                    );
                    state.fail(FailureReason::QualityBelowThreshold {
                        score: quality.metrics.quality_score,
                        threshold,
                    });
                }
            }
        }

        if let Some(store) = lineage {
            match store.export_from(state.first_sequence, &mut LineageSink(&mut *sink)) {
                Ok(exported) => debug!(exported, "Exported lineage"),
                Err(e) => state.fail(FailureReason::Sink {
                    message: e.to_string(),
                }),
            }
            state.counts.lineage_edges = store.next_sequence() - state.first_sequence;
        }

        let cancelled = self.cancel.is_cancelled();
        let warnings = state.collect_warnings(&quality, cancelled);
        let status = match state.failure.take() {
            Some(reason) => RunStatus::Failed(reason),
            None if warnings.is_empty() => RunStatus::Success,
            None => RunStatus::SuccessWithWarnings,
        };

        let finished_at = Utc::now();
        let mut summary = RunSummary {
            run_id,
            status,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            sources: state.sources,
            counts: state.counts,
            quality,
            merge: state.merge,
            unmapped_targets: state.unmapped_targets,
            cancelled,
            warnings,
        };
        if let Err(e) = sink.write_summary(&summary).and_then(|()| sink.flush()) {
            error!(error = %e, "Failed to write run summary");
            summary.status = RunStatus::Failed(FailureReason::Sink {
                message: e.to_string(),
            });
        }
        match &summary.status {
            RunStatus::Failed(reason) => error!(%reason, "Run failed"),
            status => info!(
                status = ?status,
                rows_in = summary.counts.rows_in,
                rows_out = summary.counts.rows_out,
                quality = summary.quality.metrics.quality_score,
                duration_ms = summary.duration_ms,
                "Run finished"
            ),
        }
        Ok(summary)
    }

    /// Validation of joined rows happens after the merge, on the driver.
    fn validate_joined(
        &self,
        state: &mut RunState,
        validator: &Validator,
        batches: Vec<OutputBatch>,
    ) -> Vec<OutputBatch> {
        let mut kept = Vec::with_capacity(batches.len());
        for batch in batches {
            match validator.validate(&batch.rows) {
                Ok(result) => {
                    state.validations.push(result);
                    kept.push(batch);
                }
                Err(e) => {
                    state.fail(validation_failure(e));
                    return Vec::new();
                }
            }
        }
        kept
    }
}

fn empty_chunk(source: &str, header: Arc<Vec<String>>) -> Chunk {
    Chunk {
        source: source.to_string(),
        index: 0,
        header,
        rows: Vec::new(),
        error_rows: Vec::new(),
    }
}

/// First chunk in the prelude, or an empty one carrying the header when
/// the source has no rows.
fn first_chunk(prelude: &[ReaderEvent]) -> Option<Chunk> {
    let mut header = None;
    for event in prelude {
        match event {
            ReaderEvent::Chunk { chunk, .. } => return Some(chunk.clone()),
            ReaderEvent::Opened {
                source_index: 0,
                header: h,
                ..
            } => header = Some(Arc::clone(h)),
            _ => {}
        }
    }
    header.map(|h| empty_chunk("", h))
}

fn ingest_failure(source: String, error: IngestError) -> FailureReason {
    match error {
        IngestError::MalformedInput { ordinal, .. } => FailureReason::MalformedInput {
            message: error.to_string(),
            source,
            ordinal,
        },
        IngestError::EncodingDetection { .. } => FailureReason::EncodingDetection { source },
        other => FailureReason::SourceUnreadable {
            source,
            message: other.to_string(),
        },
    }
}

fn validation_failure(error: ValidationError) -> FailureReason {
    match error {
        ValidationError::Strict {
            row,
            field,
            message,
        } => FailureReason::ValidationFailure {
            row,
            field,
            message,
        },
        ValidationError::QualityBelowThreshold { score, threshold } => {
            FailureReason::QualityBelowThreshold { score, threshold }
        }
    }
}

/// What leaves the worker pool, in input order.
enum WorkerEvent {
    Reader(ReaderEvent),
    Chunk {
        source_index: usize,
        outcome: ChunkOutcome,
    },
}

/// Driver-side state; only the driver task touches it.
struct RunState {
    sources: Vec<SourceSummary>,
    counts: RunCounts,
    validations: Vec<ValidationResult>,
    merger: Merger,
    /// Validation waits for the merged rows instead of running in workers.
    join_mode: bool,
    merge: MergeReport,
    unmapped_targets: Vec<String>,
    warnings: Vec<String>,
    failure: Option<FailureReason>,
    first_sequence: u64,
}

impl RunState {
    fn new(names: &[String], mode: MergeMode, first_sequence: u64) -> Self {
        let merger = Merger::new(mode, names.to_vec());
        Self {
            sources: names.iter().map(SourceSummary::new).collect(),
            counts: RunCounts::default(),
            validations: Vec::new(),
            join_mode: matches!(merger.mode(), MergeMode::Join { .. }),
            merger,
            merge: MergeReport::default(),
            unmapped_targets: Vec::new(),
            warnings: Vec::new(),
            failure: None,
            first_sequence,
        }
    }

    /// Keep the first fatal reason.
    fn fail(&mut self, reason: FailureReason) {
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    fn absorb(
        &mut self,
        source_index: usize,
        processed: ProcessedChunk,
        sink: &mut dyn RunSink,
    ) -> Result<(), crate::error::SinkError> {
        self.counts.chunks += 1;
        self.counts.rows_in += processed.rows_in;
        self.counts.rejected_rows += processed.rejected;
        self.counts.rule_failures += processed.rule_failures;
        if !processed.error_rows.is_empty() {
            sink.write_error_rows(&processed.error_rows)?;
        }
        if let Some(validation) = processed.validation {
            self.validations.push(validation);
        }
        let ready = self.merger.push(source_index, processed.batch);
        self.emit(ready, sink)
    }

    fn emit(
        &mut self,
        batches: Vec<OutputBatch>,
        sink: &mut dyn RunSink,
    ) -> Result<(), crate::error::SinkError> {
        for batch in batches {
            self.counts.rows_out += batch.rows.len() as u64;
            sink.write_batch(&batch)?;
        }
        Ok(())
    }

    fn collect_warnings(&mut self, quality: &RunQuality, cancelled: bool) -> Vec<String> {
        let mut warnings = std::mem::take(&mut self.warnings);
        let counts = &self.counts;
        if counts.malformed_rows > 0 {
            warnings.push(format!("{} malformed rows diverted", counts.malformed_rows));
        }
        if counts.rejected_rows > 0 {
            warnings.push(format!("{} records rejected", counts.rejected_rows));
        }
        if counts.rule_failures > 0 {
            warnings.push(format!("{} rule failures", counts.rule_failures));
        }
        if quality.errors > 0 {
            warnings.push(format!("{} validation errors", quality.errors));
        }
        if quality.warnings > 0 {
            warnings.push(format!("{} validation warnings", quality.warnings));
        }
        if !self.unmapped_targets.is_empty() {
            warnings.push(format!(
                "unmapped targets: {}",
                self.unmapped_targets.join(", ")
            ));
        }
        if cancelled {
            warnings.push(format!(
                "run cancelled, {} chunks discarded",
                counts.discarded_chunks
            ));
        }
        warnings
    }
}
