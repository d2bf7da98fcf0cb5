use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

pub const CHIBI_IMAGES_FIELD: &str = "chibi_images";
/// Single-path field kept for readers that predate multi-person output.
pub const LEGACY_CHIBI_IMAGE_FIELD: &str = "chibi_image";
pub const PHOTOS_FIELD: &str = "photos";

/// Where the pipeline's output paths end up.
pub trait RecordStore {
    fn photos(&mut self, record_id: &str) -> Vec<String>;
    fn attach_chibis(&mut self, record_id: &str, paths: &[String]) -> anyhow::Result<()>;
}

/// Records kept as one JSON object keyed by record id.
///
/// Writes touch only the fields this store changed: on flush the file is
/// re-read and the dirty fields are merged into whatever another writer
/// left there.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: PathBuf,
    payload: Map<String, Value>,
    dirty: Vec<(String, String)>,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: Map::new(),
            dirty: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, record_id: &str) -> Option<Map<String, Value>> {
        self.refresh();
        self.payload
            .get(record_id)
            .and_then(Value::as_object)
            .cloned()
    }

    pub fn set_field(&mut self, record_id: &str, field: &str, value: Value) -> anyhow::Result<()> {
        self.refresh();
        let record = self
            .payload
            .entry(record_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !record.is_object() {
            *record = Value::Object(Map::new());
        }
        if let Some(fields) = record.as_object_mut() {
            fields.insert(field.to_string(), value);
        }
        let key = (record_id.to_string(), field.to_string());
        if !self.dirty.contains(&key) {
            self.dirty.push(key);
        }
        self.flush()
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        for (record_id, field) in &self.dirty {
            let Some(value) = self
                .payload
                .get(record_id)
                .and_then(Value::as_object)
                .and_then(|fields| fields.get(field))
            else {
                continue;
            };
            let record = on_disk
                .entry(record_id.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !record.is_object() {
                *record = Value::Object(Map::new());
            }
            if let Some(fields) = record.as_object_mut() {
                fields.insert(field.clone(), value.clone());
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = on_disk;
        self.dirty.clear();
        Ok(())
    }

    fn refresh(&mut self) {
        if self.dirty.is_empty() {
            self.payload = read_json_object(&self.path).unwrap_or_default();
        }
    }
}

impl RecordStore for JsonRecordStore {
    fn photos(&mut self, record_id: &str) -> Vec<String> {
        self.get(record_id)
            .and_then(|record| record.get(PHOTOS_FIELD).cloned())
            .and_then(|value| value.as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .filter(|path| !path.trim().is_empty())
            .collect()
    }

    fn attach_chibis(&mut self, record_id: &str, paths: &[String]) -> anyhow::Result<()> {
        let list = Value::Array(paths.iter().cloned().map(Value::String).collect());
        let legacy = paths
            .first()
            .cloned()
            .map(Value::String)
            .unwrap_or(Value::Null);
        self.set_field(record_id, CHIBI_IMAGES_FIELD, list)?;
        self.set_field(record_id, LEGACY_CHIBI_IMAGE_FIELD, legacy)
            .with_context(|| format!("failed to persist chibis for record {record_id}"))
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
