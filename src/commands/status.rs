use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::store::{DEFAULT_DB_FILENAME, ReportStore, SqliteStore};

pub fn run(args: StatusArgs) -> Result<()> {
    let reports_dir = args.cache_root.join("reports");
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join(DEFAULT_DB_FILENAME));

    info!(cache_root = %args.cache_root.display(), "status requested");

    if reports_dir.exists() {
        let manifest_count = fs::read_dir(&reports_dir)
            .with_context(|| format!("failed to read {}", reports_dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|extension| extension == "json")
            })
            .count();
        info!(
            path = %reports_dir.display(),
            manifests = manifest_count,
            "report manifests"
        );
    } else {
        warn!(path = %reports_dir.display(), "report directory missing");
    }

    if db_path.exists() {
        let store = SqliteStore::open(&db_path)?;
        let total = store.count_runs().unwrap_or(0);
        info!(path = %db_path.display(), runs = total, "database status");

        for record in store.list_runs(args.limit)? {
            info!(
                run_id = %record.run_id,
                kind = record.kind.as_str(),
                generated_at = %record.generated_at,
                input_sha256 = %record.input_sha256,
                reports = record.report_count,
                "recorded run"
            );
        }
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    Ok(())
}
