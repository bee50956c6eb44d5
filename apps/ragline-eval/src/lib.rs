//! Offline answer-quality report: runs a dataset of questions through the pipeline and
//! prints groundedness, citation recall, and latency as JSON.

use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
	time::Instant,
};

use clap::Parser;
use color_eyre::eyre;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ragline_domain::{AnswerOutcome, AnswerResult, Scope};
use ragline_service::RaglineService;

#[derive(Debug, Parser)]
#[command(
	version = ragline_cli::VERSION,
	rename_all = "kebab",
	styles = ragline_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, short = 'd', value_name = "FILE")]
	pub dataset: PathBuf,
}

#[derive(Debug, Deserialize)]
struct EvalDataset {
	name: Option<String>,
	defaults: Option<EvalDefaults>,
	queries: Vec<EvalQuery>,
}

#[derive(Debug, Deserialize, Clone)]
struct EvalDefaults {
	scope: Option<Scope>,
}

#[derive(Debug, Deserialize)]
struct EvalQuery {
	id: Option<String>,
	query: String,
	scope: Option<Scope>,
	#[serde(default)]
	expected_document_ids: Vec<String>,
	/// Whether the knowledge base should be able to answer at all.
	#[serde(default = "default_expect_grounded")]
	expect_grounded: bool,
}

#[derive(Debug, Serialize)]
struct EvalOutput {
	dataset: EvalDatasetInfo,
	summary: EvalSummary,
	queries: Vec<QueryReport>,
}

#[derive(Debug, Serialize)]
struct EvalDatasetInfo {
	name: String,
	query_count: usize,
	config_path: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct EvalSummary {
	grounded_rate: f64,
	groundedness_agreement: f64,
	avg_citation_recall: f64,
	avg_citation_precision: f64,
	degraded_rate: f64,
	failure_count: usize,
	latency_ms_p50: f64,
	latency_ms_p95: f64,
}

#[derive(Debug, Serialize)]
struct QueryReport {
	id: String,
	query: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	request_id: Option<Uuid>,
	#[serde(skip_serializing_if = "Option::is_none")]
	outcome: Option<AnswerOutcome>,
	grounded: bool,
	expect_grounded: bool,
	degraded: bool,
	confidence: f32,
	citation_recall: f64,
	citation_precision: f64,
	latency_ms: f64,
	expected_document_ids: Vec<String>,
	cited_document_ids: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
}

#[derive(Debug, PartialEq)]
struct CitationMetrics {
	recall: f64,
	precision: f64,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = ragline_config::load(&args.config)?;

	ragline_cli::init_tracing(&config.service.log_level);

	let dataset = load_dataset(&args.dataset)?;
	let service = RaglineService::from_config(config)?;
	let output = evaluate(&service, &dataset, &args.config).await?;
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}

fn load_dataset(path: &Path) -> color_eyre::Result<EvalDataset> {
	let raw = fs::read_to_string(path)?;
	let dataset: EvalDataset = serde_json::from_str(&raw)?;

	if dataset.queries.is_empty() {
		return Err(eyre::eyre!("Dataset {path:?} has no queries."));
	}

	Ok(dataset)
}

async fn evaluate(
	service: &RaglineService,
	dataset: &EvalDataset,
	config_path: &Path,
) -> color_eyre::Result<EvalOutput> {
	let default_scope = dataset.defaults.as_ref().and_then(|defaults| defaults.scope.clone());
	let mut reports = Vec::with_capacity(dataset.queries.len());

	for (idx, query) in dataset.queries.iter().enumerate() {
		let id = query.id.clone().unwrap_or_else(|| format!("q{}", idx + 1));
		let scope = query.scope.clone().or_else(|| default_scope.clone()).ok_or_else(|| {
			eyre::eyre!("Query {id} has no scope and the dataset sets no default scope.")
		})?;
		let started = Instant::now();
		let result = service.answer(&query.query, &scope).await;
		let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

		if let Err(err) = &result {
			tracing::warn!(query_id = %id, error = %err, "Evaluation query failed.");
		}

		reports.push(build_report(id, query, result.map_err(|err| err.to_string()), latency_ms));
	}

	let summary = summarize(&reports);

	Ok(EvalOutput {
		dataset: EvalDatasetInfo {
			name: dataset.name.clone().unwrap_or_else(|| "unnamed".to_string()),
			query_count: dataset.queries.len(),
			config_path: config_path.display().to_string(),
		},
		summary,
		queries: reports,
	})
}

fn build_report(
	id: String,
	query: &EvalQuery,
	result: Result<AnswerResult, String>,
	latency_ms: f64,
) -> QueryReport {
	let expected: HashSet<String> = query.expected_document_ids.iter().cloned().collect();

	match result {
		Ok(answer) => {
			let cited = answer.cited_documents();
			let metrics = citation_metrics(&cited, &expected);

			QueryReport {
				id,
				query: query.query.clone(),
				request_id: Some(answer.request_id),
				outcome: Some(answer.outcome),
				grounded: answer.grounded,
				expect_grounded: query.expect_grounded,
				degraded: answer.degraded,
				confidence: answer.confidence,
				citation_recall: metrics.recall,
				citation_precision: metrics.precision,
				latency_ms,
				expected_document_ids: query.expected_document_ids.clone(),
				cited_document_ids: cited,
				error: None,
			}
		},
		Err(error) => QueryReport {
			id,
			query: query.query.clone(),
			request_id: None,
			outcome: None,
			grounded: false,
			expect_grounded: query.expect_grounded,
			degraded: false,
			confidence: 0.0,
			citation_recall: 0.0,
			citation_precision: 0.0,
			latency_ms,
			expected_document_ids: query.expected_document_ids.clone(),
			cited_document_ids: Vec::new(),
			error: Some(error),
		},
	}
}

/// Document-level recall and precision of the citations. With nothing expected, recall is 1
/// and precision is 1 only when nothing was cited.
fn citation_metrics(cited: &[String], expected: &HashSet<String>) -> CitationMetrics {
	let relevant = cited.iter().filter(|id| expected.contains(*id)).count();
	let recall = if expected.is_empty() { 1.0 } else { relevant as f64 / expected.len() as f64 };
	let precision = if cited.is_empty() {
		if expected.is_empty() { 1.0 } else { 0.0 }
	} else {
		relevant as f64 / cited.len() as f64
	};

	CitationMetrics { recall, precision }
}

fn summarize(reports: &[QueryReport]) -> EvalSummary {
	if reports.is_empty() {
		return EvalSummary {
			grounded_rate: 0.0,
			groundedness_agreement: 0.0,
			avg_citation_recall: 0.0,
			avg_citation_precision: 0.0,
			degraded_rate: 0.0,
			failure_count: 0,
			latency_ms_p50: 0.0,
			latency_ms_p95: 0.0,
		};
	}

	let count = reports.len() as f64;
	let share = |pred: &dyn Fn(&QueryReport) -> bool| {
		reports.iter().filter(|report| pred(report)).count() as f64 / count
	};
	let mut latencies: Vec<f64> = reports.iter().map(|report| report.latency_ms).collect();

	latencies.sort_by(|a, b| a.total_cmp(b));

	EvalSummary {
		grounded_rate: share(&|report| report.grounded),
		groundedness_agreement: share(&|report| report.grounded == report.expect_grounded),
		avg_citation_recall: reports.iter().map(|report| report.citation_recall).sum::<f64>()
			/ count,
		avg_citation_precision: reports.iter().map(|report| report.citation_precision).sum::<f64>()
			/ count,
		degraded_rate: share(&|report| report.degraded),
		failure_count: reports.iter().filter(|report| report.error.is_some()).count(),
		latency_ms_p50: percentile(&latencies, 0.50),
		latency_ms_p95: percentile(&latencies, 0.95),
	}
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
	if values.is_empty() {
		return 0.0;
	}

	let clamped = percentile.clamp(0.0, 1.0);
	let pos = clamped * (values.len() as f64 - 1.0);
	let lower = pos.floor() as usize;
	let upper = pos.ceil() as usize;

	if lower == upper {
		values[lower]
	} else {
		let weight = pos - lower as f64;

		values[lower] * (1.0 - weight) + values[upper] * weight
	}
}

fn default_expect_grounded() -> bool {
	true
}
