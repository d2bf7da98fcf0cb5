use std::sync::Arc;
use std::time::Duration;

use chibi_contracts::events::{EventPayload, EventWriter};
use chibi_contracts::roster::{ChibiAsset, Person};
use chibi_contracts::runs::summary::{now_utc_iso, PipelineSummary};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::invoker::FallbackInvoker;
use crate::model::ModelService;
use crate::policy::{thread_pacer, BackoffPolicy, Pacer, PacingPolicy};
use crate::scanner::PersonScanner;
use crate::synthesizer::ChibiSynthesizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonFailure {
    pub label: String,
    pub person_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub run_id: String,
    pub record_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub photos: Vec<String>,
    pub roster: Vec<Person>,
    pub assets: Vec<ChibiAsset>,
    pub failures: Vec<PersonFailure>,
}

impl PipelineRun {
    pub fn paths(&self) -> Vec<String> {
        self.assets.iter().map(|asset| asset.path.clone()).collect()
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            run_id: self.run_id.clone(),
            record_id: self.record_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            photos: self.photos.clone(),
            roster: self.roster.clone(),
            assets: self.assets.clone(),
        }
    }
}

/// Scan → synthesize per person → collect paths, strictly in sequence.
pub struct ChibiPipeline {
    scanner: PersonScanner,
    synthesizer: ChibiSynthesizer,
    between_persons: Duration,
    pacer: Arc<dyn Pacer>,
    events: Option<EventWriter>,
}

impl ChibiPipeline {
    pub fn new(
        scanner: PersonScanner,
        synthesizer: ChibiSynthesizer,
        pacing: PacingPolicy,
    ) -> Self {
        Self {
            scanner,
            synthesizer,
            between_persons: pacing.between_persons,
            pacer: thread_pacer(),
            events: None,
        }
    }

    pub fn from_config(config: &EngineConfig, service: Arc<dyn ModelService>) -> Self {
        let pacing = PacingPolicy::default();
        let scan_invoker = FallbackInvoker::new(
            Arc::clone(&service),
            config.scan_tiers.clone(),
            BackoffPolicy::default(),
        );
        let image_invoker = FallbackInvoker::new(
            service,
            config.image_tiers.clone(),
            BackoffPolicy::default(),
        );
        Self::new(
            PersonScanner::new(
                Arc::new(scan_invoker),
                &config.media_root,
                pacing.between_photos,
            ),
            ChibiSynthesizer::new(
                Arc::new(image_invoker),
                &config.media_root,
                &config.output_dir,
                &config.public_prefix,
                pacing,
            ),
            pacing,
        )
    }

    /// Paces gaps between persons only; scanner and synthesizer keep their own.
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Ordered public paths of the chibis produced for `record_id`.
    pub fn run(&self, photos: &[String], record_id: &str) -> Vec<String> {
        self.run_detailed(photos, record_id).paths()
    }

    pub fn run_assets(&self, photos: &[String], record_id: &str) -> Vec<ChibiAsset> {
        self.run_detailed(photos, record_id).assets
    }

    pub fn run_detailed(&self, photos: &[String], record_id: &str) -> PipelineRun {
        let events = self.events.as_ref().map(|writer| writer.for_record(record_id));
        let run_id = events
            .as_ref()
            .map(|writer| writer.run_id().to_string())
            .unwrap_or_else(|| format!("run-{}", Uuid::new_v4().simple()));
        let started_at = now_utc_iso();
        emit(
            events.as_ref(),
            "pipeline_started",
            json!({ "photos": photos }),
        );

        let roster = self.scanner.scan(photos);
        info!(record_id, persons = roster.len(), "roster ready");
        emit(
            events.as_ref(),
            "roster_ready",
            json!({ "persons": roster.len() }),
        );

        let mut assets = Vec::new();
        let mut failures = Vec::new();
        for (idx, person) in roster.iter().enumerate() {
            let person_index = idx + 1;
            if idx > 0 {
                self.pacer.pause(self.between_persons);
            }
            emit(
                events.as_ref(),
                "person_detected",
                json!({
                    "label": person.label,
                    "person_index": person_index,
                    "source_photo": person.source_photo_path,
                }),
            );
            match self.synthesizer.synthesize_detailed(
                &person.source_photo_path,
                &person.description,
                record_id,
                person_index,
            ) {
                Ok(done) => {
                    if !done.segmented {
                        emit(
                            events.as_ref(),
                            "segmentation_fallback",
                            json!({ "person_index": person_index, "path": done.asset.path }),
                        );
                    }
                    emit(
                        events.as_ref(),
                        "chibi_generated",
                        json!({
                            "person_index": person_index,
                            "path": done.asset.path,
                            "attempts": done.attempts,
                            "segmented": done.segmented,
                        }),
                    );
                    assets.push(done.asset);
                }
                Err(failure) => {
                    emit(
                        events.as_ref(),
                        "chibi_failed",
                        json!({
                            "person_index": person_index,
                            "reason": failure.reason,
                            "attempts": failure.attempts,
                        }),
                    );
                    failures.push(PersonFailure {
                        label: person.label.clone(),
                        person_index,
                        reason: failure.reason,
                    });
                }
            }
        }

        let finished_at = now_utc_iso();
        emit(
            events.as_ref(),
            "pipeline_finished",
            json!({
                "persons": roster.len(),
                "assets": assets
                    .iter()
                    .map(|asset| asset.path.clone())
                    .collect::<Vec<String>>(),
            }),
        );
        PipelineRun {
            run_id,
            record_id: record_id.to_string(),
            started_at,
            finished_at,
            photos: photos.to_vec(),
            roster,
            assets,
            failures,
        }
    }
}

fn emit(events: Option<&EventWriter>, event_type: &str, payload: Value) {
    let Some(writer) = events else {
        return;
    };
    let payload = match payload {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    };
    if let Err(err) = writer.emit(event_type, payload) {
        let error = format!("{err:#}");
        warn!(event_type, error = %error, "event write failed");
    }
}
