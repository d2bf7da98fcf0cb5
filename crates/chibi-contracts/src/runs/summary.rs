use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::roster::{ChibiAsset, Person};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub record_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub photos: Vec<String>,
    pub roster: Vec<Person>,
    pub assets: Vec<ChibiAsset>,
}

impl PipelineSummary {
    /// Persons that produced no asset.
    pub fn failed_labels(&self) -> Vec<String> {
        self.roster
            .iter()
            .enumerate()
            .filter(|(idx, _)| {
                !self
                    .assets
                    .iter()
                    .any(|asset| asset.person_index == idx + 1)
            })
            .map(|(_, person)| person.label.clone())
            .collect()
    }
}

pub fn write_summary(
    path: &Path,
    summary: &PipelineSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert(
        "roster_size".to_string(),
        Value::Number(summary.roster.len().into()),
    );
    payload.insert(
        "asset_count".to_string(),
        Value::Number(summary.assets.len().into()),
    );
    payload.insert(
        "failed".to_string(),
        Value::Array(
            summary
                .failed_labels()
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
    );
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
