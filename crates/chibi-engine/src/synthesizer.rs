use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chibi_contracts::roster::{chibi_file_name, ChibiAsset};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::invoker::FallbackInvoker;
use crate::media::load_photo;
use crate::model::{ContentPart, ModelRequest};
use crate::policy::{thread_pacer, Pacer, PacingPolicy};
use crate::segmenter::{remove_background, Segmentation};

/// Extra attempts after the first one.
pub const MAX_RETRIES: usize = 2;
/// Generated images below this size are degenerate (blank or truncated).
pub const MIN_IMAGE_BYTES: usize = 5 * 1024;

pub const POSES: [&str; 6] = [
    "waving cheerfully with one hand raised high",
    "jumping in the air with both arms spread wide",
    "giving a confident thumbs up with a big grin",
    "making a peace sign next to one eye and winking",
    "hugging a small plush toy with both arms",
    "striding forward mid-step with a happy swagger",
];

/// Rotates poses by person ordinal and record so the same person drawn
/// for different records does not always get the same pose.
pub fn pose_index(record_id: &str, person_index: usize, pose_count: usize) -> usize {
    if pose_count == 0 {
        return 0;
    }
    let record_offset = (record_seed(record_id) % pose_count as u64) as usize;
    (person_index.saturating_sub(1) + record_offset) % pose_count
}

fn record_seed(record_id: &str) -> u64 {
    if let Ok(numeric) = record_id.trim().parse::<u64>() {
        return numeric;
    }
    let digest = Sha256::digest(record_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

pub fn build_prompt(description: &str, pose: &str) -> String {
    format!(
        "Create a cute chibi character illustration of this person, based on the attached photo.\n\
         Person: {description}\n\
         Pose: {pose}\n\
         Requirements:\n\
         - Pure solid white background (#FFFFFF), completely uniform, no shadows, no floor, no scenery.\n\
         - Soft painterly rendering with gentle shading and clean outlines.\n\
         - Chibi proportions: the head is about half of the total body height (1:2 head-to-body).\n\
         - Exactly one character in the image, no other people, text or props beyond the pose.\n\
         - Full body visible from head to feet, centered, with margin on every side."
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesized {
    pub asset: ChibiAsset,
    /// False when the background could not be removed and the raw image was kept.
    pub segmented: bool,
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisFailure {
    pub reason: String,
    pub attempts: usize,
}

pub struct ChibiSynthesizer {
    invoker: Arc<FallbackInvoker>,
    media_root: PathBuf,
    output_dir: PathBuf,
    public_prefix: String,
    pacing: PacingPolicy,
    pacer: Arc<dyn Pacer>,
}

impl ChibiSynthesizer {
    pub fn new(
        invoker: Arc<FallbackInvoker>,
        media_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        public_prefix: impl Into<String>,
        pacing: PacingPolicy,
    ) -> Self {
        Self {
            invoker,
            media_root: media_root.into(),
            output_dir: output_dir.into(),
            public_prefix: public_prefix.into(),
            pacing,
            pacer: thread_pacer(),
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn synthesize(
        &self,
        photo_path: &str,
        description: &str,
        record_id: &str,
        person_index: usize,
    ) -> Option<ChibiAsset> {
        self.synthesize_detailed(photo_path, description, record_id, person_index)
            .ok()
            .map(|done| done.asset)
    }

    pub fn synthesize_detailed(
        &self,
        photo_path: &str,
        description: &str,
        record_id: &str,
        person_index: usize,
    ) -> Result<Synthesized, SynthesisFailure> {
        let Some(photo) = load_photo(&self.media_root, 0, photo_path) else {
            warn!(photo = %photo_path, "source photo missing; cannot synthesize");
            return Err(SynthesisFailure {
                reason: format!("source photo {photo_path} missing"),
                attempts: 0,
            });
        };
        let pose = POSES[pose_index(record_id, person_index, POSES.len())];
        let request = ModelRequest::text_and_image(vec![
            ContentPart::InlineData {
                mime_type: photo.mime_type.clone(),
                bytes: photo.bytes.clone(),
            },
            ContentPart::Text(build_prompt(description, pose)),
        ]);

        let mut last_reason = String::from("no attempt made");
        for attempt in 1..=MAX_RETRIES + 1 {
            if attempt > 1 {
                self.pacer.pause(self.pacing.between_synthesis_attempts);
            }
            let response = match self.invoker.invoke(&request) {
                Ok(response) => response,
                Err(err) => {
                    warn!(
                        record_id,
                        person_index,
                        attempt,
                        error = %err,
                        "chibi generation failed"
                    );
                    // The penalty only delays a next attempt.
                    if err.is_rate_limited() && attempt <= MAX_RETRIES {
                        self.pacer.pause(self.pacing.rate_limit_penalty);
                    }
                    last_reason = err.to_string();
                    continue;
                }
            };
            let Some(image) = response.first_image() else {
                debug!(record_id, person_index, attempt, "model returned no image");
                last_reason = "model returned no image".to_string();
                continue;
            };
            if image.bytes.len() < MIN_IMAGE_BYTES {
                debug!(
                    record_id,
                    person_index,
                    attempt,
                    bytes = image.bytes.len(),
                    "image below size floor"
                );
                last_reason = format!("image of {} bytes below size floor", image.bytes.len());
                continue;
            }

            let segmentation = remove_background(&image.bytes);
            let segmented = segmentation.is_segmented();
            if let Segmentation::Fallback { reason, .. } = &segmentation {
                warn!(record_id, person_index, reason = %reason, "keeping unsegmented image");
            }
            return match self.write_asset(record_id, person_index, segmentation.bytes()) {
                Ok(asset) => {
                    info!(record_id, person_index, path = %asset.path, "chibi generated");
                    Ok(Synthesized {
                        asset,
                        segmented,
                        attempts: attempt,
                    })
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    warn!(record_id, person_index, error = %reason, "chibi write failed");
                    Err(SynthesisFailure {
                        reason,
                        attempts: attempt,
                    })
                }
            };
        }

        Err(SynthesisFailure {
            reason: last_reason,
            attempts: MAX_RETRIES + 1,
        })
    }

    fn write_asset(
        &self,
        record_id: &str,
        person_index: usize,
        bytes: &[u8],
    ) -> anyhow::Result<ChibiAsset> {
        let file_name = chibi_file_name(record_id, person_index);
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let target = self.output_dir.join(&file_name);
        fs::write(&target, bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(ChibiAsset {
            record_id: record_id.to_string(),
            person_index,
            path: format!("{}/{}", self.public_prefix.trim_end_matches('/'), file_name),
        })
    }
}
