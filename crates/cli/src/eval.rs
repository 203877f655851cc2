//! Golden-query eval harness.
//!
//! Runs each query of a golden file against a live API over HTTP, scores the
//! returned files against the expectations, and aggregates per-metric and
//! per-category means plus latency percentiles. Two saved reports can be
//! diffed to spot regressions.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ragd_protocol::api::{GoldenFile, GoldenQuery};

/// A recall delta below this is noise, not an improvement or regression.
const RECALL_DELTA_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub category: Option<String>,
    pub recall: f64,
    pub precision: f64,
    pub mrr: f64,
    pub latency_ms: u64,
    pub returned_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    pub project_name: String,
    pub collection: String,
    pub mode: String,
    pub queries: Vec<QueryResult>,
    pub mean_recall: f64,
    pub mean_precision: f64,
    pub mean_mrr: f64,
    pub by_category: HashMap<String, CategoryMeans>,
    pub latency: LatencyStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMeans {
    pub queries: usize,
    pub recall: f64,
    pub precision: f64,
    pub mrr: f64,
}

/// A returned file matches an expected file when either is a path suffix of
/// the other, so `src/auth.ts` satisfies an expectation of `auth.ts` and
/// vice versa.
fn file_matches(returned: &str, expected: &str) -> bool {
    returned.ends_with(expected) || expected.ends_with(returned)
}

/// Score one query's returned files against the expectations.
pub fn score_query(expected: &[String], returned: &[String], k: usize) -> (f64, f64, f64) {
    let top_k: Vec<&String> = returned.iter().take(k).collect();

    let found = expected
        .iter()
        .filter(|exp| top_k.iter().any(|ret| file_matches(ret, exp)))
        .count();
    let recall = if expected.is_empty() {
        0.0
    } else {
        found as f64 / expected.len() as f64
    };

    let relevant_in_top_k = top_k
        .iter()
        .filter(|ret| expected.iter().any(|exp| file_matches(ret, exp)))
        .count();
    let precision = if k == 0 {
        0.0
    } else {
        relevant_in_top_k as f64 / k as f64
    };

    let mrr = top_k
        .iter()
        .position(|ret| expected.iter().any(|exp| file_matches(ret, exp)))
        .map(|rank| 1.0 / (rank as f64 + 1.0))
        .unwrap_or(0.0);

    (recall, precision, mrr)
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn latency_stats(mut latencies: Vec<u64>) -> LatencyStats {
    latencies.sort_unstable();
    let mean = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
    };
    LatencyStats {
        mean,
        p50: percentile(&latencies, 0.50),
        p95: percentile(&latencies, 0.95),
        p99: percentile(&latencies, 0.99),
    }
}

fn aggregate(golden: &GoldenFile, mode: &str, queries: Vec<QueryResult>) -> EvalReport {
    let count = queries.len().max(1) as f64;
    let mean_recall = queries.iter().map(|q| q.recall).sum::<f64>() / count;
    let mean_precision = queries.iter().map(|q| q.precision).sum::<f64>() / count;
    let mean_mrr = queries.iter().map(|q| q.mrr).sum::<f64>() / count;

    let mut by_category: HashMap<String, Vec<&QueryResult>> = HashMap::new();
    for query in &queries {
        by_category
            .entry(query.category.clone().unwrap_or_else(|| "uncategorized".into()))
            .or_default()
            .push(query);
    }
    let by_category = by_category
        .into_iter()
        .map(|(category, results)| {
            let n = results.len() as f64;
            (
                category,
                CategoryMeans {
                    queries: results.len(),
                    recall: results.iter().map(|q| q.recall).sum::<f64>() / n,
                    precision: results.iter().map(|q| q.precision).sum::<f64>() / n,
                    mrr: results.iter().map(|q| q.mrr).sum::<f64>() / n,
                },
            )
        })
        .collect();

    let latency = latency_stats(queries.iter().map(|q| q.latency_ms).collect());

    EvalReport {
        project_name: golden.project_name.clone(),
        collection: golden.collection.clone(),
        mode: mode.to_string(),
        mean_recall,
        mean_precision,
        mean_mrr,
        by_category,
        latency,
        queries,
    }
}

#[derive(Deserialize)]
struct WireSearchResponse {
    results: Vec<WireResult>,
}

#[derive(Deserialize)]
struct WireResult {
    file: String,
}

/// Run the golden file against a live API.
pub async fn run(golden_path: &Path, hybrid: bool) -> Result<EvalReport> {
    let raw = std::fs::read_to_string(golden_path)
        .with_context(|| format!("cannot read golden file {}", golden_path.display()))?;
    let golden: GoldenFile = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid golden file", golden_path.display()))?;
    anyhow::ensure!(!golden.queries.is_empty(), "golden file has no queries");

    let endpoint = if hybrid { "/api/search-hybrid" } else { "/api/search" };
    let url = format!("{}{endpoint}", golden.api_url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    let progress = indicatif::ProgressBar::new(golden.queries.len() as u64);
    let mut results = Vec::with_capacity(golden.queries.len());

    for query in &golden.queries {
        results.push(run_query(&client, &url, &golden.project_name, query).await?);
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(aggregate(
        &golden,
        if hybrid { "hybrid" } else { "semantic" },
        results,
    ))
}

async fn run_query(
    client: &reqwest::Client,
    url: &str,
    project: &str,
    query: &GoldenQuery,
) -> Result<QueryResult> {
    let started = Instant::now();
    let response = client
        .post(url)
        .header("X-Project-Name", project)
        .json(&serde_json::json!({ "query": query.query, "limit": query.k }))
        .send()
        .await
        .with_context(|| format!("query '{}' failed to send", query.id))?;
    let latency_ms = started.elapsed().as_millis() as u64;

    anyhow::ensure!(
        response.status().is_success(),
        "query '{}' returned {}",
        query.id,
        response.status()
    );
    let body: WireSearchResponse = response
        .json()
        .await
        .with_context(|| format!("query '{}' returned an unexpected body", query.id))?;

    let returned_files: Vec<String> = body.results.into_iter().map(|r| r.file).collect();
    let (recall, precision, mrr) = score_query(&query.expected_files, &returned_files, query.k);

    Ok(QueryResult {
        id: query.id.clone(),
        query: query.query.clone(),
        category: query.category.clone(),
        recall,
        precision,
        mrr,
        latency_ms,
        returned_files,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalComparison {
    pub recall_delta: f64,
    pub precision_delta: f64,
    pub mrr_delta: f64,
    pub latency_mean_delta: f64,
    pub improved: Vec<String>,
    pub degraded: Vec<String>,
}

/// Diff two reports: aggregate deltas plus the query ids whose recall moved
/// by more than the noise floor.
pub fn compare(before: &EvalReport, after: &EvalReport) -> EvalComparison {
    let before_by_id: HashMap<&str, &QueryResult> =
        before.queries.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut improved = Vec::new();
    let mut degraded = Vec::new();
    for query in &after.queries {
        if let Some(previous) = before_by_id.get(query.id.as_str()) {
            let delta = query.recall - previous.recall;
            if delta > RECALL_DELTA_EPSILON {
                improved.push(query.id.clone());
            } else if delta < -RECALL_DELTA_EPSILON {
                degraded.push(query.id.clone());
            }
        }
    }

    EvalComparison {
        recall_delta: after.mean_recall - before.mean_recall,
        precision_delta: after.mean_precision - before.mean_precision,
        mrr_delta: after.mean_mrr - before.mean_mrr,
        latency_mean_delta: after.latency.mean - before.latency.mean,
        improved,
        degraded,
    }
}

pub fn print_report(report: &EvalReport) {
    println!("eval: {} ({} mode)", report.project_name, report.mode);
    println!(
        "  recall {:.3}  precision {:.3}  mrr {:.3}",
        report.mean_recall, report.mean_precision, report.mean_mrr
    );
    println!(
        "  latency mean {:.1}ms  p50 {}ms  p95 {}ms  p99 {}ms",
        report.latency.mean, report.latency.p50, report.latency.p95, report.latency.p99
    );
    let mut categories: Vec<_> = report.by_category.iter().collect();
    categories.sort_by(|a, b| a.0.cmp(b.0));
    for (category, means) in categories {
        println!(
            "  [{category}] n={} recall {:.3} precision {:.3} mrr {:.3}",
            means.queries, means.recall, means.precision, means.mrr
        );
    }
}

pub fn print_comparison(comparison: &EvalComparison) {
    println!(
        "recall {:+.3}  precision {:+.3}  mrr {:+.3}  latency {:+.1}ms",
        comparison.recall_delta,
        comparison.precision_delta,
        comparison.mrr_delta,
        comparison.latency_mean_delta
    );
    if !comparison.improved.is_empty() {
        println!("improved: {}", comparison.improved.join(", "));
    }
    if !comparison.degraded.is_empty() {
        println!("degraded: {}", comparison.degraded.join(", "));
    }
}
