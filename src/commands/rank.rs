use std::io::{self, Write};

use anyhow::Result;
use tracing::{info, warn};

use super::common::{MANIFEST_VERSION, RunContext, fingerprint, format_metric, load_reference, publish};
use crate::cli::{RankArgs, WeightingArg};
use crate::config::{ExposureWeighting, load_config};
use crate::engine::ranking::{RankingReport, build_ranking_report};
use crate::model::{RankedRunSet, RankingRunManifest};
use crate::store::RunKind;
use crate::util::read_json;

pub fn run(args: RankArgs) -> Result<()> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(weighting) = args.weighting {
        config.exposure_weighting = match weighting {
            WeightingArg::Linear => ExposureWeighting::Linear,
            WeightingArg::Reciprocal => ExposureWeighting::Reciprocal,
            WeightingArg::Logarithmic => ExposureWeighting::Logarithmic,
        };
    }

    let mut inputs = vec![fingerprint(&args.runs)?];
    let sets: Vec<RankedRunSet> = read_json(&args.runs)?;
    let reference = match args.reference.as_deref() {
        Some(path) => {
            inputs.push(fingerprint(path)?);
            Some(load_reference(path)?)
        }
        None => None,
    };
    info!(
        path = %args.runs.display(),
        sets = sets.len(),
        weighting = config.exposure_weighting.label(),
        "loaded ranked run sets"
    );

    let context = RunContext::new(RunKind::Rank, &args.common, inputs);
    let mut reports = Vec::with_capacity(sets.len());
    let mut warnings = Vec::new();
    for set in &sets {
        let shares = reference
            .as_ref()
            .and_then(|reference| reference.category(&set.category));
        if reference.is_some() && shares.is_none() {
            warnings.push(format!(
                "{}/{}: no market-share reference for category",
                set.category, set.subcategory
            ));
        }

        match build_ranking_report(set, shares, &config, context.analysis_date) {
            Ok(report) => {
                for alert in &report.alerts {
                    warn!(
                        category = %report.category,
                        subcategory = %report.subcategory,
                        metric = alert.metric,
                        value = alert.value,
                        threshold = alert.threshold,
                        "fairness alert"
                    );
                }
                reports.push(report);
            }
            Err(err) => {
                warn!(
                    category = %set.category,
                    subcategory = %set.subcategory,
                    error = %err,
                    "skipping ranked run set"
                );
                warnings.push(format!("{}/{}: {err}", set.category, set.subcategory));
            }
        }
    }

    let manifest = RankingRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: context.run_id.clone(),
        generated_at: context.generated_at.clone(),
        analysis_date: context.analysis_date.to_string(),
        exposure_weighting: config.exposure_weighting.label().to_string(),
        inputs: context.inputs.clone(),
        reports,
        warnings,
    };

    let path = publish(&args.common, &context, manifest.reports.len(), &manifest)?;
    if !args.common.json {
        write_text_summary(&manifest, &path.display().to_string())?;
    }
    Ok(())
}

fn write_text_summary(manifest: &RankingRunManifest, path: &str) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(
        output,
        "Run {} ({} ranking reports, weighting {})",
        manifest.run_id,
        manifest.reports.len(),
        manifest.exposure_weighting
    )?;
    for report in &manifest.reports {
        write_report(&mut output, report)?;
    }
    for warning in &manifest.warnings {
        writeln!(output, "warning: {warning}")?;
    }
    writeln!(output, "Manifest: {path}")?;
    output.flush()?;
    Ok(())
}

fn write_report(output: &mut impl Write, report: &RankingReport) -> Result<()> {
    let parity = report
        .parity
        .iter()
        .map(|summary| format!("k{}={}", summary.k, format_metric(summary.parity_gap.get())))
        .collect::<Vec<String>>()
        .join(",");
    writeln!(
        output,
        "{}/{}\truns={}\tcandidates={}\tparity[{}]\teo_gap={}\ttau={}\tgini={}\thhi={}\tstability={}",
        report.category,
        report.subcategory,
        report.run_count,
        report.candidate_count,
        parity,
        format_metric(report.eo_gap.get()),
        format_metric(report.kendall_tau_vs_reference.get()),
        format_metric(report.gini.get()),
        format_metric(report.hhi_exposure.get()),
        format_metric(report.ranking_stability.get()),
    )?;
    for row in &report.entities {
        writeln!(
            output,
            "\t{}\texposure={}\tmean_rank={}\tappearance={:.3}\teo_ratio={}",
            row.entity,
            format_metric(row.exposure_index.get()),
            format_metric(row.mean_rank.get()),
            row.appearance_rate,
            format_metric(row.eo_ratio.get()),
        )?;
    }
    for alert in &report.alerts {
        writeln!(
            output,
            "\talert {} = {:.3} (threshold {:.3})",
            alert.metric, alert.value, alert.threshold
        )?;
    }
    Ok(())
}
