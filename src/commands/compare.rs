use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

use anyhow::Result;
use tracing::{info, warn};

use super::common::{MANIFEST_VERSION, RunContext, fingerprint, format_metric, load_reference, publish};
use crate::cli::CompareArgs;
use crate::config::load_config;
use crate::engine::cross_source::{ComparisonInputs, ComparisonReport, build_comparison_report};
use crate::engine::ranking::consensus_ordering;
use crate::model::{CitationLabel, ComparisonInput, ComparisonRunManifest, RankedRunSet};
use crate::store::RunKind;
use crate::util::{DomainNormalizer, read_json};

pub fn run(args: CompareArgs) -> Result<()> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(persistence) = args.rbo_persistence {
        config.rbo_persistence = persistence;
        config.validate()?;
    }

    let mut inputs = vec![fingerprint(&args.input)?];
    let comparisons: Vec<ComparisonInput> = read_json(&args.input)?;
    let reference = match args.reference.as_deref() {
        Some(path) => {
            inputs.push(fingerprint(path)?);
            Some(load_reference(path)?)
        }
        None => None,
    };

    let normalizer = DomainNormalizer::new()?;
    let labels = match args.domain_labels.as_deref() {
        Some(path) => {
            inputs.push(fingerprint(path)?);
            let labels: Vec<CitationLabel> = read_json(path)?;
            index_labels(&normalizer, labels)
        }
        None => BTreeMap::new(),
    };
    info!(
        path = %args.input.display(),
        comparisons = comparisons.len(),
        labelled_domains = labels.len(),
        "loaded comparison inputs"
    );

    let context = RunContext::new(RunKind::Compare, &args.common, inputs);
    let mut reports = Vec::with_capacity(comparisons.len());
    let mut warnings = Vec::new();
    for comparison in comparisons {
        let scope = format!("{}/{}", comparison.category, comparison.subcategory);
        let ai_ranking = match (comparison.ai_ranking, comparison.ai_runs) {
            (Some(ranking), _) => ranking,
            (None, Some(runs)) => {
                let set = RankedRunSet {
                    category: comparison.category.clone(),
                    subcategory: comparison.subcategory.clone(),
                    runs,
                    candidates: Vec::new(),
                };
                match consensus_ordering(&set, &config.exposure_weighting) {
                    Ok(ordering) => ordering,
                    Err(err) => {
                        warn!(scope = %scope, error = %err, "skipping comparison");
                        warnings.push(format!("{scope}: {err}"));
                        continue;
                    }
                }
            }
            (None, None) => {
                warn!(scope = %scope, "comparison has neither ai_ranking nor ai_runs");
                warnings.push(format!("{scope}: no AI ranking supplied"));
                continue;
            }
        };

        let mut unlabeled = BTreeSet::new();
        let ai_citations =
            resolve_labels(&normalizer, &labels, &comparison.ai_citations, &mut unlabeled);
        let reference_citations = resolve_labels(
            &normalizer,
            &labels,
            &comparison.reference_citations,
            &mut unlabeled,
        );
        if !labels.is_empty() && !unlabeled.is_empty() {
            warnings.push(format!(
                "{scope}: {} cited domain(s) without labels: {}",
                unlabeled.len(),
                unlabeled.into_iter().collect::<Vec<String>>().join(", ")
            ));
        }

        let shares = reference
            .as_ref()
            .and_then(|reference| reference.category(&comparison.category));
        match build_comparison_report(
            ComparisonInputs {
                category: &comparison.category,
                subcategory: &comparison.subcategory,
                ai_ranking,
                reference_ranking: comparison.reference_ranking,
                ai_citations,
                reference_citations,
            },
            shares,
            &config,
            context.analysis_date,
        ) {
            Ok(report) => reports.push(report),
            Err(err) => {
                warn!(scope = %scope, error = %err, "skipping comparison");
                warnings.push(format!("{scope}: {err}"));
            }
        }
    }

    let manifest = ComparisonRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: context.run_id.clone(),
        generated_at: context.generated_at.clone(),
        analysis_date: context.analysis_date.to_string(),
        rbo_persistence: config.rbo_persistence,
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

fn index_labels(
    normalizer: &DomainNormalizer,
    labels: Vec<CitationLabel>,
) -> BTreeMap<String, CitationLabel> {
    let mut index = BTreeMap::new();
    for mut label in labels {
        let Some(domain) = normalizer.normalize(&label.domain) else {
            warn!(domain = %label.domain, "ignoring label with unusable domain");
            continue;
        };
        label.domain = domain.clone();
        index.insert(domain, label);
    }
    index
}

fn resolve_labels(
    normalizer: &DomainNormalizer,
    labels: &BTreeMap<String, CitationLabel>,
    citations: &[String],
    unlabeled: &mut BTreeSet<String>,
) -> Vec<CitationLabel> {
    citations
        .iter()
        .filter_map(|citation| normalizer.normalize(citation))
        .map(|domain| match labels.get(&domain) {
            Some(label) => label.clone(),
            None => {
                unlabeled.insert(domain.clone());
                CitationLabel {
                    domain,
                    official: false,
                    sentiment: None,
                }
            }
        })
        .collect()
}

fn write_text_summary(manifest: &ComparisonRunManifest, path: &str) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(
        output,
        "Run {} ({} comparisons, rbo p={})",
        manifest.run_id,
        manifest.reports.len(),
        manifest.rbo_persistence
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

fn write_report(output: &mut impl Write, report: &ComparisonReport) -> Result<()> {
    let impact = report.market_impact.as_ref();
    writeln!(
        output,
        "{}/{}\trbo={}\ttau={}\tofficial_diff={}\tnegative_diff={}\thhi_change={}",
        report.category,
        report.subcategory,
        format_metric(report.rbo.get()),
        format_metric(report.kendall_tau_common.get()),
        format_metric(report.composition.official_ratio_difference.get()),
        format_metric(report.composition.negative_ratio_difference.get()),
        format_metric(impact.map(|impact| impact.hhi_change)),
    )?;
    for entry in &report.delta_rank.entries {
        writeln!(
            output,
            "\t{}\tai={}\treference={}\tdelta={:+}",
            entry.entity, entry.ai_rank, entry.reference_rank, entry.delta_rank
        )?;
    }
    if !report.delta_rank.only_in_ai.is_empty() {
        writeln!(output, "\tonly in AI: {}", report.delta_rank.only_in_ai.join(", "))?;
    }
    if !report.delta_rank.only_in_reference.is_empty() {
        writeln!(
            output,
            "\tonly in reference: {}",
            report.delta_rank.only_in_reference.join(", ")
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cli::CommonArgs;
    use crate::model::SourceSentiment;
    use crate::store::{DEFAULT_DB_FILENAME, ReportStore, SqliteStore};
    use crate::util::write_json_pretty;

    #[test]
    fn citations_resolve_through_normalized_labels() {
        let normalizer = DomainNormalizer::new().expect("regex should compile");
        let labels = index_labels(
            &normalizer,
            vec![
                CitationLabel {
                    domain: "https://www.Vendor.com".to_string(),
                    official: true,
                    sentiment: None,
                },
                CitationLabel {
                    domain: "reviews.example.org".to_string(),
                    official: false,
                    sentiment: Some(SourceSentiment::Negative),
                },
            ],
        );
        assert!(labels.contains_key("vendor.com"));

        let mut unlabeled = BTreeSet::new();
        let resolved = resolve_labels(
            &normalizer,
            &labels,
            &[
                "https://vendor.com/pricing".to_string(),
                "http://reviews.example.org/a".to_string(),
                "blog.other.net".to_string(),
                "".to_string(),
            ],
            &mut unlabeled,
        );
        assert_eq!(resolved.len(), 3);
        assert!(resolved[0].official);
        assert_eq!(resolved[1].sentiment, Some(SourceSentiment::Negative));
        assert!(!resolved[2].official);
        assert_eq!(unlabeled.into_iter().collect::<Vec<String>>(), vec!["blog.other.net"]);
    }

    #[test]
    fn compare_orders_ai_runs_and_skips_repeated_entities() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let input_path = dir.path().join("comparisons.json");
        write_json_pretty(
            &input_path,
            &json!([
                {
                    "category": "cloud",
                    "subcategory": "storage",
                    "ai_runs": [["B", "A", "C"], ["B", "C", "A"], ["A", "B", "C"]],
                    "reference_ranking": ["A", "B", "C"],
                    "ai_citations": ["https://vendor.com/pricing", "blog.other.net"],
                    "reference_citations": ["reviews.example.org/post"]
                },
                {
                    "category": "crm",
                    "subcategory": "sales",
                    "ai_runs": [["X", "Y", "X"]],
                    "reference_ranking": ["X", "Y"]
                },
                { "category": "search", "subcategory": "web", "reference_ranking": ["P"] }
            ]),
        )
        .expect("comparisons should be written");
        let labels_path = dir.path().join("labels.json");
        write_json_pretty(
            &labels_path,
            &json!([
                { "domain": "vendor.com", "official": true },
                { "domain": "reviews.example.org", "official": false, "sentiment": "negative" }
            ]),
        )
        .expect("labels should be written");

        let output = dir.path().join("comparison.json");
        run(CompareArgs {
            common: CommonArgs {
                cache_root: dir.path().join("cache"),
                config: None,
                db_path: None,
                output: Some(output.clone()),
                analysis_date: chrono::NaiveDate::from_ymd_opt(2026, 10, 16),
                no_store: false,
                json: false,
            },
            input: input_path,
            reference: None,
            domain_labels: Some(labels_path),
            rbo_persistence: None,
        })
        .expect("compare should succeed");

        let manifest: serde_json::Value = read_json(&output).expect("manifest should parse");
        let reports = manifest["reports"].as_array().expect("reports array");
        assert_eq!(reports.len(), 1);

        // linear exposure: B 8/3, A 2, C 4/3
        let cloud = &reports[0];
        assert_eq!(cloud["ai_ranking"], json!(["B", "A", "C"]));
        let entries = cloud["delta_rank"]["entries"].as_array().expect("entries");
        let delta_b = entries
            .iter()
            .find(|entry| entry["entity"] == "B")
            .expect("B should be ranked by both sources");
        assert_eq!(delta_b["delta_rank"], 1);
        assert_eq!(cloud["composition"]["ai"]["value"]["official_ratio"], 0.5);
        assert_eq!(cloud["composition"]["reference"]["value"]["negative_ratio"], 1.0);
        assert_eq!(cloud["market_impact"]["reason"], "missing_reference");

        let warnings = manifest["warnings"]
            .as_array()
            .expect("warnings array")
            .iter()
            .filter_map(|warning| warning.as_str())
            .collect::<Vec<&str>>();
        assert!(warnings.iter().any(|warning| warning.starts_with("crm/sales: duplicate entity X")));
        assert!(warnings.contains(&"search/web: no AI ranking supplied"));
        assert!(warnings.contains(&"cloud/storage: 1 cited domain(s) without labels: blog.other.net"));

        let store = SqliteStore::open(&dir.path().join("cache").join(DEFAULT_DB_FILENAME))
            .expect("store should open");
        let recorded = store.list_runs(5).expect("runs should be listed");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].report_count, 1);
    }
}
