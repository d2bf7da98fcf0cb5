use serde::{Deserialize, Serialize};

/// Upper bound on distinct people carried through one pipeline run.
pub const MAX_PERSONS: usize = 3;

/// A source photo loaded for the duration of a single scan call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoAsset {
    pub index: usize,
    pub path: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub source_photo_index: usize,
    pub source_photo_path: String,
    pub label: String,
    pub description: String,
}

impl Person {
    pub fn label_for(ordinal: usize) -> String {
        format!("person{ordinal}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChibiAsset {
    pub record_id: String,
    pub person_index: usize,
    pub path: String,
}

/// `chibi-{record_id}-{person_index}.png`, `person_index` 1-based.
///
/// Path separators and other characters that cannot appear in a file name
/// are replaced with `_`; ordinary ids pass through untouched.
pub fn chibi_file_name(record_id: &str, person_index: usize) -> String {
    let safe = record_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("chibi-{safe}-{person_index}.png")
}
