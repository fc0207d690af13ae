use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::common::{MANIFEST_VERSION, RunContext, fingerprint, format_metric, publish};
use crate::cli::AnalyzeArgs;
use crate::config::load_config;
use crate::engine::report::{CategoryBiasReport, build_bias_reports};
use crate::model::{BiasRunManifest, Run};
use crate::store::RunKind;
use crate::util::read_json;

pub fn run(args: AnalyzeArgs) -> Result<()> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.bootstrap.seed = seed;
    }
    if let Some(iterations) = args.bootstrap_iterations {
        config.bootstrap.iterations = iterations;
    }
    config.validate()?;

    let input = fingerprint(&args.runs)?;
    let runs: Vec<Run> = read_json(&args.runs)?;
    info!(
        path = %args.runs.display(),
        runs = runs.len(),
        seed = config.bootstrap.seed,
        "loaded run records"
    );

    let context = RunContext::new(RunKind::Analyze, &args.common, vec![input]);
    let categories = build_bias_reports(&runs, &config, context.analysis_date)
        .context("failed to build bias reports")?;

    let mut warnings = Vec::new();
    if runs.is_empty() {
        warnings.push("input contained no run records".to_string());
    }
    for report in categories.iter().flat_map(|category| &category.entities) {
        if !report.reliability_tier.available {
            warnings.push(format!(
                "{}/{}/{}: {} run(s), below the smallest reliability tier",
                report.category, report.subcategory, report.entity, report.run_count
            ));
        }
    }
    for warning in &warnings {
        warn!(warning = %warning, "analysis warning");
    }

    let entity_count = categories
        .iter()
        .map(|category| category.entities.len())
        .sum::<usize>();
    let manifest = BiasRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: context.run_id.clone(),
        generated_at: context.generated_at.clone(),
        analysis_date: context.analysis_date.to_string(),
        bootstrap_seed: config.bootstrap.seed,
        bootstrap_iterations: config.bootstrap.iterations,
        inputs: context.inputs.clone(),
        run_count: runs.len(),
        entity_count,
        categories,
        warnings,
    };

    let path = publish(&args.common, &context, entity_count, &manifest)?;
    if !args.common.json {
        write_text_summary(&manifest, &path.display().to_string())?;
    }
    Ok(())
}

fn write_text_summary(manifest: &BiasRunManifest, path: &str) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(
        output,
        "Run {} ({} records, {} entities, date {})",
        manifest.run_id, manifest.run_count, manifest.entity_count, manifest.analysis_date
    )?;
    for category in &manifest.categories {
        write_category(&mut output, category)?;
    }
    writeln!(output, "Manifest: {path}")?;
    output.flush()?;
    Ok(())
}

fn write_category(output: &mut impl Write, category: &CategoryBiasReport) -> Result<()> {
    writeln!(
        output,
        "{}\tdelta_scale={}",
        category.category,
        format_metric(category.delta_scale.get())
    )?;
    for report in &category.entities {
        let tier = report
            .reliability_tier
            .get()
            .map(|tier| tier.as_str())
            .unwrap_or("insufficient");
        writeln!(
            output,
            "\t{}/{}\tn={}\ttier={}\tdelta={}\tbi={}\tcliffs={}\tp={}\tstability={}\tintegrated={}",
            report.subcategory,
            report.entity,
            report.run_count,
            tier,
            format_metric(report.raw_delta.get()),
            format_metric(report.bias_index.get()),
            format_metric(report.cliffs_delta.get()),
            format_metric(report.sign_test_p_value.get()),
            format_metric(report.stability.as_ref().map(|breakdown| breakdown.score)),
            format_metric(report.integrated_index.get()),
        )?;
    }
    Ok(())
}
