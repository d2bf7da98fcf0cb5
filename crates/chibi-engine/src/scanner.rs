use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chibi_contracts::roster::{Person, PhotoAsset, MAX_PERSONS};
use tracing::{debug, info, warn};

use crate::invoker::FallbackInvoker;
use crate::media::load_photo;
use crate::model::{ContentPart, ModelRequest};
use crate::policy::{thread_pacer, Pacer};

pub const NO_PERSON_SENTINEL: &str = "NO_PERSON";
pub const PERSON_DELIMITER: &str = "---PERSON---";
/// Fragments shorter than this are noise rather than a description.
pub const MIN_DESCRIPTION_CHARS: usize = 20;

/// Decides whether a new description names a person already on the roster.
pub trait DescriptionSimilarity: Send + Sync {
    fn is_duplicate(&self, candidate: &str, accepted: &str) -> bool;
}

impl<F> DescriptionSimilarity for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn is_duplicate(&self, candidate: &str, accepted: &str) -> bool {
        self(candidate, accepted)
    }
}

/// Cheap lexical overlap on the opening of two descriptions.
///
/// Both are cut to `prefix_chars` and lower-cased; the candidate prefix is
/// split on spaces and every token found inside the accepted prefix counts.
/// More than `max_shared_tokens` hits marks a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenOverlap {
    pub prefix_chars: usize,
    pub max_shared_tokens: usize,
}

impl Default for TokenOverlap {
    fn default() -> Self {
        Self {
            prefix_chars: 60,
            max_shared_tokens: 5,
        }
    }
}

impl TokenOverlap {
    pub fn shared_tokens(&self, candidate: &str, accepted: &str) -> usize {
        let candidate = prefix_lower(candidate, self.prefix_chars);
        let accepted = prefix_lower(accepted, self.prefix_chars);
        candidate
            .split(' ')
            .filter(|token| !token.is_empty())
            .filter(|token| accepted.contains(token))
            .count()
    }
}

impl DescriptionSimilarity for TokenOverlap {
    fn is_duplicate(&self, candidate: &str, accepted: &str) -> bool {
        self.shared_tokens(candidate, accepted) > self.max_shared_tokens
    }
}

fn prefix_lower(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().to_lowercase()
}

pub fn analysis_prompt() -> String {
    format!(
        "Look at this photo and describe every person you can see.\n\
         If there is no person in the photo, reply with exactly {NO_PERSON_SENTINEL}.\n\
         Otherwise write one paragraph per person (at most {MAX_PERSONS} people) covering \
         hair style and colour, clothing, skin tone, distinguishing features such as glasses, \
         hats or accessories, and where they stand in the frame.\n\
         Separate the paragraphs with a line containing only {PERSON_DELIMITER}.\n\
         Do not add any introduction or closing remarks."
    )
}

/// Splits a model reply into per-person descriptions.
pub fn parse_descriptions(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains(NO_PERSON_SENTINEL) {
        return Vec::new();
    }
    let mut descriptions = trimmed
        .split(PERSON_DELIMITER)
        .map(str::trim)
        .filter(|fragment| fragment.chars().count() >= MIN_DESCRIPTION_CHARS)
        .map(str::to_string)
        .collect::<Vec<String>>();
    if descriptions.is_empty() && trimmed.chars().count() > MIN_DESCRIPTION_CHARS {
        descriptions.push(trimmed.to_string());
    }
    descriptions.truncate(MAX_PERSONS);
    descriptions
}

pub struct PersonScanner {
    invoker: Arc<FallbackInvoker>,
    media_root: PathBuf,
    between_photos: Duration,
    similarity: Box<dyn DescriptionSimilarity>,
    pacer: Arc<dyn Pacer>,
}

impl PersonScanner {
    pub fn new(
        invoker: Arc<FallbackInvoker>,
        media_root: impl Into<PathBuf>,
        between_photos: Duration,
    ) -> Self {
        Self {
            invoker,
            media_root: media_root.into(),
            between_photos,
            similarity: Box::new(TokenOverlap::default()),
            pacer: thread_pacer(),
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_similarity(mut self, similarity: impl DescriptionSimilarity + 'static) -> Self {
        self.similarity = Box::new(similarity);
        self
    }

    /// Builds the roster for one run. Never fails: unreadable photos and
    /// failed model calls just contribute nobody.
    pub fn scan(&self, photo_paths: &[String]) -> Vec<Person> {
        if let [only] = photo_paths {
            return self.scan_single(only);
        }

        let mut roster: Vec<Person> = Vec::new();
        let mut described_any = false;
        for (index, reference) in photo_paths.iter().enumerate() {
            if roster.len() >= MAX_PERSONS {
                debug!(remaining = photo_paths.len() - index, "roster full; skipping photos");
                break;
            }
            let Some(photo) = load_photo(&self.media_root, index, reference) else {
                warn!(photo = %reference, "photo missing; skipped");
                continue;
            };
            // Persons from the first photo that reaches the model are taken as is.
            let first_described = !described_any;
            if described_any {
                self.pacer.pause(self.between_photos);
            }
            described_any = true;

            for description in self.describe(&photo) {
                if roster.len() >= MAX_PERSONS {
                    break;
                }
                if !first_described && self.is_known(&description, &roster) {
                    info!(photo = %reference, "description matches an existing person; dropped");
                    continue;
                }
                roster.push(Person {
                    source_photo_index: index,
                    source_photo_path: reference.clone(),
                    label: Person::label_for(roster.len() + 1),
                    description,
                });
            }
        }
        roster
    }

    fn is_known(&self, description: &str, roster: &[Person]) -> bool {
        roster
            .iter()
            .any(|person| self.similarity.is_duplicate(description, &person.description))
    }

    fn scan_single(&self, reference: &str) -> Vec<Person> {
        let Some(photo) = load_photo(&self.media_root, 0, reference) else {
            warn!(photo = %reference, "photo missing; skipped");
            return Vec::new();
        };
        self.describe(&photo)
            .into_iter()
            .take(MAX_PERSONS)
            .enumerate()
            .map(|(idx, description)| Person {
                source_photo_index: 0,
                source_photo_path: reference.to_string(),
                label: Person::label_for(idx + 1),
                description,
            })
            .collect()
    }

    fn describe(&self, photo: &PhotoAsset) -> Vec<String> {
        let request = ModelRequest::text_only(vec![
            ContentPart::InlineData {
                mime_type: photo.mime_type.clone(),
                bytes: photo.bytes.clone(),
            },
            ContentPart::Text(analysis_prompt()),
        ]);
        match self.invoker.invoke(&request) {
            Ok(response) => {
                let descriptions = parse_descriptions(&response.text);
                info!(photo = %photo.path, persons = descriptions.len(), "photo described");
                descriptions
            }
            Err(err) => {
                warn!(photo = %photo.path, error = %err, "photo description failed");
                Vec::new()
            }
        }
    }
}
