use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::cli::CommonArgs;
use crate::engine::reference::MarketShareReference;
use crate::model::InputFingerprint;
use crate::store::{DEFAULT_DB_FILENAME, ReportStore, RunKind, RunRecord, SqliteStore};
use crate::util::{read_json, rfc3339_string, sha256_file, utc_compact_string, write_json_pretty};

pub const MANIFEST_VERSION: u32 = 1;

pub struct RunContext {
    pub kind: RunKind,
    pub run_id: String,
    pub generated_at: String,
    pub analysis_date: NaiveDate,
    pub inputs: Vec<InputFingerprint>,
}

impl RunContext {
    pub fn new(kind: RunKind, common: &CommonArgs, inputs: Vec<InputFingerprint>) -> Self {
        let now = Utc::now();
        let input_sha256 = combined_input_sha256(&inputs);
        Self {
            kind,
            run_id: format!(
                "{}-{}-{}",
                kind.as_str(),
                utc_compact_string(now),
                &input_sha256[..12]
            ),
            generated_at: rfc3339_string(now),
            analysis_date: common.analysis_date.unwrap_or_else(|| now.date_naive()),
            inputs,
        }
    }

    pub fn input_sha256(&self) -> String {
        combined_input_sha256(&self.inputs)
    }
}

pub fn fingerprint(path: &Path) -> Result<InputFingerprint> {
    Ok(InputFingerprint {
        path: path.display().to_string(),
        sha256: sha256_file(path)?,
    })
}

fn combined_input_sha256(inputs: &[InputFingerprint]) -> String {
    if let [single] = inputs {
        return single.sha256.clone();
    }

    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(input.sha256.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn load_reference(path: &Path) -> Result<MarketShareReference> {
    let raw: Value = read_json(path)?;
    let reference = MarketShareReference::from_json(&raw)
        .with_context(|| format!("invalid market-share reference {}", path.display()))?;
    info!(
        path = %path.display(),
        categories = reference.categories.len(),
        "loaded market-share reference"
    );
    Ok(reference)
}

pub fn resolve_db_path(common: &CommonArgs) -> PathBuf {
    common
        .db_path
        .clone()
        .unwrap_or_else(|| common.cache_root.join(DEFAULT_DB_FILENAME))
}

pub fn publish<T: Serialize>(
    common: &CommonArgs,
    context: &RunContext,
    report_count: usize,
    manifest: &T,
) -> Result<PathBuf> {
    let output_path = common.output.clone().unwrap_or_else(|| {
        common
            .cache_root
            .join("reports")
            .join(format!("{}.json", context.run_id))
    });
    write_json_pretty(&output_path, manifest)?;
    info!(
        run_id = %context.run_id,
        path = %output_path.display(),
        reports = report_count,
        "wrote report manifest"
    );

    if !common.no_store {
        let db_path = resolve_db_path(common);
        let store = SqliteStore::open(&db_path)?;
        let payload_json =
            serde_json::to_string(manifest).context("failed to serialize report manifest")?;
        store.record_run(&RunRecord {
            run_id: context.run_id.clone(),
            kind: context.kind,
            generated_at: context.generated_at.clone(),
            input_sha256: context.input_sha256(),
            report_count,
            payload_json,
        })?;
        info!(path = %store.path().display(), "recorded analysis run");
    }

    if common.json {
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, manifest)
            .context("failed to serialize report json output")?;
        writeln!(output)?;
        output.flush()?;
    }

    Ok(output_path)
}

pub fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.3}"),
        None => "n/a".to_string(),
    }
}
