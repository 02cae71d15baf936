//! Run driver: cache short-circuit, per-chunk pipeline, reconciliation, persistence.
//!
//! Per chunk: encode → submit → poll → fetch → extract. Chunk-scoped failures
//! are recorded in the report and the run moves on; local failures such as
//! unwritable workspaces abort the run.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::LabelingContext;
use crate::error::{LabelError, Result};
use crate::extractor::extract_results;
use crate::input::ExpressionUniverse;
use crate::lock::RunLock;
use crate::manifest::{JobManifest, ManifestEntry, ManifestState};
use crate::models::{
    ChunkOutcome, ChunkReport, ExpressionKey, JobId, LabelResult, LabelTask, RunReport, RunSource,
};
use crate::partition::{Chunk, partition};
use crate::poller::CompletionPoller;
use crate::reconcile::{CORRECTION_CHUNK, close_gaps, correction_tasks, missing_keys};
use crate::service::BatchService;
use crate::submitter::{BatchSubmitter, render_request_artifact, request_digest};
use crate::table::{ResultTable, results_from_csv, results_to_csv};
use crate::taxonomy::{Category, Taxonomy};

#[derive(Debug, Clone)]
pub struct LabelingRun {
    pub table: ResultTable,
    pub report: RunReport,
}

struct PlannedChunk {
    name: String,
    category: Option<Category>,
    tasks: Vec<LabelTask>,
}

struct CategoryPlan {
    category: Category,
    chunks: Vec<PlannedChunk>,
}

struct ChunkRun {
    report: ChunkReport,
    results: Vec<LabelResult>,
}

/// Chunks for every category that has a label set, in category order.
pub fn plan_chunks(universe: &ExpressionUniverse, taxonomy: &Taxonomy, target: usize) -> Result<Vec<Chunk>> {
    let mut out = Vec::new();
    for (category, expressions) in universe.iter() {
        if taxonomy.label_set(category).is_none() {
            tracing::debug!(category = %category, "no label set; category skipped");
            continue;
        }
        out.extend(partition(category, expressions, target)?);
    }
    Ok(out)
}

pub fn run_labeling(ctx: &LabelingContext, universe: &ExpressionUniverse) -> Result<LabelingRun> {
    let workspace = ctx.workspace();
    workspace.initialize()?;
    let _lock = RunLock::acquire(&workspace.lock_path())?;

    let cache_path = workspace.cache_path();
    if cache_path.is_file() {
        let table = ResultTable::load(&cache_path)?;
        tracing::info!(
            cache = %cache_path.display(),
            rows = table.len(),
            "cached result table found; skipping labeling"
        );
        let report = RunReport::cached(
            cache_path.display().to_string(),
            table.len(),
            table.labeled_count(),
        );
        return Ok(LabelingRun { table, report });
    }

    // A budget past the clock's range is no deadline at all.
    let deadline = ctx
        .config()
        .run_deadline
        .and_then(|budget| ctx.clock().now().checked_add(budget));
    let plan = plan_categories(ctx, universe)?;
    let mut index = HashMap::<String, ExpressionKey>::new();
    let mut submitted = BTreeSet::<ExpressionKey>::new();
    for task in plan.iter().flat_map(|category| &category.chunks).flat_map(|chunk| &chunk.tasks) {
        index.insert(task.custom_id.clone(), task.key.clone());
        submitted.insert(task.key.clone());
    }
    tracing::info!(
        categories = plan.len(),
        chunks = plan.iter().map(|category| category.chunks.len()).sum::<usize>(),
        expressions = submitted.len(),
        parallel = ctx.config().parallel_categories,
        "labeling run started"
    );

    let manifest = Mutex::new(JobManifest::new());
    let runs = run_plan(ctx, &plan, &manifest, deadline)?;

    let mut accumulator = Accumulator::new(ctx.taxonomy(), &index, &submitted, ctx.config().strict_labels);
    let mut chunks = Vec::with_capacity(runs.len());
    for run in runs {
        accumulator.absorb(&run.results);
        chunks.push(run.report);
    }

    let missing = missing_keys(&submitted, &accumulator.table);
    let mut correction = None;
    if !missing.is_empty() {
        let tasks = correction_tasks(ctx.encoder(), ctx.taxonomy(), &missing);
        tracing::info!(
            missing = missing.len(),
            resubmitted = tasks.len(),
            "reconciliation found unlabeled expressions"
        );
        if !tasks.is_empty() {
            let planned = PlannedChunk {
                name: CORRECTION_CHUNK.to_string(),
                category: None,
                tasks,
            };
            let run = run_chunk(ctx, &planned, &manifest, deadline)?;
            accumulator.absorb(&run.results);
            correction = Some(run.report);
        }
    }

    let Accumulator {
        mut table,
        parse_failures,
        out_of_set_labels,
        unmatched_results,
        ..
    } = accumulator;
    let unlabeled = close_gaps(&submitted, &mut table);

    let attempted = chunks.iter().chain(correction.iter());
    let succeeded_chunks = attempted.clone().filter(|chunk| chunk.succeeded()).count();
    let failed_chunks = attempted.count() - succeeded_chunks;
    let report = RunReport {
        source: RunSource::Fresh,
        cache_path: cache_path.display().to_string(),
        rows: table.len(),
        labeled_rows: table.labeled_count(),
        chunks,
        correction,
        succeeded_chunks,
        failed_chunks,
        parse_failures,
        out_of_set_labels,
        unmatched_results,
        unlabeled,
    };

    if report.is_total_failure() {
        tracing::warn!(
            failed_chunks = report.failed_chunks,
            "no chunk succeeded; result table not cached"
        );
    } else {
        workspace.write_atomic(&cache_path, &table.to_csv()?)?;
        tracing::info!(
            cache = %cache_path.display(),
            rows = report.rows,
            labeled = report.labeled_rows,
            unlabeled = report.unlabeled.len(),
            "result table cached"
        );
    }
    lock_manifest(&manifest).save(workspace)?;

    Ok(LabelingRun { table, report })
}

fn plan_categories(ctx: &LabelingContext, universe: &ExpressionUniverse) -> Result<Vec<CategoryPlan>> {
    let mut plans = Vec::<CategoryPlan>::new();
    for chunk in plan_chunks(universe, ctx.taxonomy(), ctx.config().chunks)? {
        let labels = ctx.taxonomy().label_set(chunk.category).ok_or_else(|| {
            LabelError::Internal(format!("planned chunk without label set: {}", chunk.name()))
        })?;
        let planned = PlannedChunk {
            name: chunk.name(),
            category: Some(chunk.category),
            tasks: ctx.encoder().encode(chunk.category, labels, &chunk.expressions)?,
        };
        match plans.last_mut() {
            Some(plan) if plan.category == chunk.category => plan.chunks.push(planned),
            _ => plans.push(CategoryPlan {
                category: chunk.category,
                chunks: vec![planned],
            }),
        }
    }
    Ok(plans)
}

fn run_plan(
    ctx: &LabelingContext,
    plan: &[CategoryPlan],
    manifest: &Mutex<JobManifest>,
    deadline: Option<Instant>,
) -> Result<Vec<ChunkRun>> {
    if !ctx.config().parallel_categories || plan.len() < 2 {
        let mut runs = Vec::new();
        for category in plan {
            runs.extend(run_category(ctx, category, manifest, deadline)?);
        }
        return Ok(runs);
    }

    // One worker per category; results are merged here, on the calling thread.
    thread::scope(|scope| -> Result<Vec<ChunkRun>> {
        let handles = plan
            .iter()
            .map(|category| scope.spawn(move || run_category(ctx, category, manifest, deadline)))
            .collect::<Vec<_>>();
        let mut runs = Vec::new();
        for handle in handles {
            let category_runs = handle
                .join()
                .map_err(|_| LabelError::Internal("category worker panicked".to_string()))??;
            runs.extend(category_runs);
        }
        Ok(runs)
    })
}

fn run_category(
    ctx: &LabelingContext,
    plan: &CategoryPlan,
    manifest: &Mutex<JobManifest>,
    deadline: Option<Instant>,
) -> Result<Vec<ChunkRun>> {
    plan.chunks
        .iter()
        .map(|chunk| run_chunk(ctx, chunk, manifest, deadline))
        .collect()
}

fn run_chunk(
    ctx: &LabelingContext,
    chunk: &PlannedChunk,
    manifest: &Mutex<JobManifest>,
    deadline: Option<Instant>,
) -> Result<ChunkRun> {
    let artifact = render_request_artifact(&chunk.tasks)?;
    let digest = request_digest(&artifact);
    let mut entry = ManifestEntry::new(&chunk.name, chunk.category, chunk.tasks.len(), &digest);

    if ctx.config().resume
        && let Some(results) = resumable_results(ctx, &chunk.name, &digest)?
    {
        tracing::info!(chunk = %chunk.name, records = results.len(), "reusing results of an earlier run");
        entry.state = ManifestState::Resumed;
        record_entry(ctx, manifest, entry)?;
        return Ok(finished(chunk, None, ChunkOutcome::Resumed, results));
    }

    match execute_chunk(ctx, chunk, &artifact, &mut entry, manifest, deadline) {
        Ok(results) => {
            entry.state = ManifestState::Succeeded;
            let job_id = entry.job_id.clone();
            record_entry(ctx, manifest, entry)?;
            Ok(finished(chunk, job_id, ChunkOutcome::Succeeded, results))
        }
        Err(err) if err.is_chunk_scoped() => {
            tracing::warn!(
                chunk = %chunk.name,
                code = err.code(),
                error = %err,
                "chunk aborted"
            );
            entry.state = ManifestState::Aborted;
            entry.error = Some(err.to_string());
            let job_id = entry.job_id.clone();
            record_entry(ctx, manifest, entry)?;
            let mut report = finished(chunk, job_id, ChunkOutcome::Aborted, Vec::new()).report;
            report.error_code = Some(err.code().to_string());
            report.error = Some(err.to_string());
            Ok(ChunkRun {
                report,
                results: Vec::new(),
            })
        }
        Err(err) => Err(err),
    }
}

fn execute_chunk(
    ctx: &LabelingContext,
    chunk: &PlannedChunk,
    artifact: &str,
    entry: &mut ManifestEntry,
    manifest: &Mutex<JobManifest>,
    deadline: Option<Instant>,
) -> Result<Vec<LabelResult>> {
    let remaining = remaining_time(ctx, deadline, &chunk.name)?;
    let service = ctx.service();
    let workspace = ctx.workspace();
    let config = ctx.config();

    let submitted = BatchSubmitter::new(service, workspace, &config.completion_window)
        .submit(&chunk.name, artifact)?;
    entry.job_id = Some(submitted.job.0.clone());
    record_entry(ctx, manifest, entry.clone())?;

    let budget = config.max_wait.min(remaining);
    let poller = CompletionPoller::new(service, ctx.clock(), config.poll_interval, budget);
    if let Err(err) = poller.wait(&submitted.job) {
        if matches!(err, LabelError::PollTimeout { .. }) {
            cancel_best_effort(service, &submitted.job);
        }
        return Err(err);
    }

    let raw = service.fetch_output(&submitted.job)?;
    workspace.write_atomic(&workspace.output_path(&chunk.name), raw.as_bytes())?;
    let results = extract_results(&raw);
    workspace.write_atomic(
        &workspace.chunk_table_path(&chunk.name),
        &results_to_csv(&results)?,
    )?;
    tracing::info!(
        chunk = %chunk.name,
        job_id = %submitted.job,
        records = results.len(),
        parse_failures = count_parse_failures(&results),
        "chunk completed"
    );
    Ok(results)
}

fn remaining_time(ctx: &LabelingContext, deadline: Option<Instant>, chunk: &str) -> Result<Duration> {
    let Some(deadline) = deadline else {
        return Ok(Duration::MAX);
    };
    let remaining = deadline.saturating_duration_since(ctx.clock().now());
    if remaining.is_zero() {
        return Err(LabelError::DeadlineExceeded(format!(
            "{chunk} was not submitted"
        )));
    }
    Ok(remaining)
}

fn cancel_best_effort(service: &dyn BatchService, job: &JobId) {
    match service.cancel(job) {
        Ok(()) => tracing::info!(job_id = %job, "cancel requested for timed-out job"),
        Err(err) => tracing::warn!(job_id = %job, error = %err, "cancel of timed-out job failed"),
    }
}

/// Results of an earlier run whose request artifact matches `digest` byte for byte.
/// The per-chunk CSV marks completion; the raw output is read when present, the CSV otherwise.
fn resumable_results(ctx: &LabelingContext, chunk: &str, digest: &str) -> Result<Option<Vec<LabelResult>>> {
    let workspace = ctx.workspace();
    let Some(previous) = workspace.read_optional(&workspace.request_path(chunk))? else {
        return Ok(None);
    };
    if request_digest(&previous) != digest {
        return Ok(None);
    }
    let Some(table) = workspace.read_optional(&workspace.chunk_table_path(chunk))? else {
        return Ok(None);
    };
    if let Some(output) = workspace.read_optional(&workspace.output_path(chunk))? {
        return Ok(Some(extract_results(&output)));
    }
    results_from_csv(table.as_bytes()).map(Some)
}

fn record_entry(ctx: &LabelingContext, manifest: &Mutex<JobManifest>, entry: ManifestEntry) -> Result<()> {
    let mut manifest = lock_manifest(manifest);
    manifest.record(entry);
    manifest.save(ctx.workspace())
}

fn lock_manifest(manifest: &Mutex<JobManifest>) -> std::sync::MutexGuard<'_, JobManifest> {
    manifest.lock().unwrap_or_else(PoisonError::into_inner)
}

fn finished(
    chunk: &PlannedChunk,
    job_id: Option<String>,
    outcome: ChunkOutcome,
    results: Vec<LabelResult>,
) -> ChunkRun {
    ChunkRun {
        report: ChunkReport {
            name: chunk.name.clone(),
            category: chunk.category,
            items: chunk.tasks.len(),
            job_id,
            outcome,
            records: results.len(),
            parse_failures: count_parse_failures(&results),
            error_code: None,
            error: None,
        },
        results,
    }
}

fn count_parse_failures(results: &[LabelResult]) -> usize {
    results.iter().filter(|result| is_parse_failure(result)).count()
}

/// Unparseable records, including all-empty rows read back from a three-column chunk CSV.
fn is_parse_failure(result: &LabelResult) -> bool {
    result.is_unparseable()
        || (result.custom_id.is_none()
            && result.cat_title.is_none()
            && result.cat_exp.is_none()
            && result.piv_cat.is_none())
}

/// Folds extracted results into the table, resolving identity through correlation ids.
struct Accumulator<'a> {
    taxonomy: &'a Taxonomy,
    index: &'a HashMap<String, ExpressionKey>,
    submitted: &'a BTreeSet<ExpressionKey>,
    strict_labels: bool,
    table: ResultTable,
    parse_failures: usize,
    out_of_set_labels: usize,
    unmatched_results: usize,
}

impl<'a> Accumulator<'a> {
    fn new(
        taxonomy: &'a Taxonomy,
        index: &'a HashMap<String, ExpressionKey>,
        submitted: &'a BTreeSet<ExpressionKey>,
        strict_labels: bool,
    ) -> Self {
        Self {
            taxonomy,
            index,
            submitted,
            strict_labels,
            table: ResultTable::new(),
            parse_failures: 0,
            out_of_set_labels: 0,
            unmatched_results: 0,
        }
    }

    fn absorb(&mut self, results: &[LabelResult]) {
        for result in results {
            if is_parse_failure(result) {
                self.parse_failures += 1;
                continue;
            }
            let Some(key) = self.resolve(result) else {
                self.unmatched_results += 1;
                tracing::debug!(
                    cat_title = result.cat_title.as_deref().unwrap_or(""),
                    cat_exp = result.cat_exp.as_deref().unwrap_or(""),
                    "result does not match any submitted expression"
                );
                continue;
            };
            let label = self.validate_label(&key, result.piv_cat.as_deref());
            self.table.insert(key, label);
        }
    }

    fn resolve(&self, result: &LabelResult) -> Option<ExpressionKey> {
        if let Some(key) = result
            .custom_id
            .as_ref()
            .and_then(|custom_id| self.index.get(custom_id))
        {
            return Some(key.clone());
        }
        ExpressionKey::from_echo(result.cat_title.as_deref(), result.cat_exp.as_deref())
            .filter(|key| self.submitted.contains(key))
    }

    fn validate_label(&mut self, key: &ExpressionKey, raw: Option<&str>) -> Option<String> {
        let raw = raw?;
        if let Some(label) = self
            .taxonomy
            .label_set(key.category)
            .and_then(|labels| labels.canonical(raw))
        {
            return Some(label.to_string());
        }
        self.out_of_set_labels += 1;
        tracing::warn!(key = %key, label = raw, strict = self.strict_labels, "label outside label set");
        (!self.strict_labels).then(|| raw.to_string())
    }
}
