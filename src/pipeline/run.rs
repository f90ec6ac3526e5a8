//! Run orchestration: loads the manifest and the input, drives every sheet
//! and table through the stages, and reports the outcome as a [`RunResult`].
use crate::error::ConfigError;
use crate::error::EngineError;
use crate::error::HookError;
use crate::error::InputError;
use crate::error::PipelineError;
use crate::manifest::ManifestContext;
use crate::model::ColumnMapping;
use crate::model::ColumnMappingPatch;
use crate::model::ExtractedTable;
use crate::model::NormalizedTable;
use crate::model::ValidationIssue;
use crate::pipeline::classifier::classify_rows;
use crate::pipeline::hooks::stage_of;
use crate::pipeline::hooks::FailurePolicy;
use crate::pipeline::hooks::HookInvoker;
use crate::pipeline::mapper::map_columns;
use crate::pipeline::normalize::normalize_table;
use crate::pipeline::output::OutputWriter;
use crate::pipeline::output::WrittenTable;
use crate::pipeline::segmenter::segment_tables;
use crate::pipeline::Stage;
use crate::plugins::builtin_package;
use crate::registry::ConfigPackage;
use crate::registry::HookContext;
use crate::registry::HookKind;
use crate::registry::Registry;
use crate::registry::RunInfo;
use crate::registry::RunState;
use crate::registry::SheetInfo;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::open_spreadsheet;
use crate::spreadsheet::ResultMessage;
use crate::spreadsheet::Workbook;
use crate::telemetry::Event;
use crate::telemetry::EventEmitter;
use crate::telemetry::EventLevel;
use crate::telemetry::EventLog;
use crate::telemetry::NoopEmitter;
use chrono::DateTime;
use chrono::Local;
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::cell::Cell;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Run summary file written next to the event log
pub const RESULT_FILE_NAME: &str = "result.json";

/// Where the manifest of a run comes from.
#[derive(Clone, Debug)]
pub enum ManifestSource {
    Path(PathBuf),
    Inline(ManifestContext),
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub input: PathBuf,
    /// Sheet names or glob patterns; `None` processes every sheet
    pub sheets: Option<Vec<String>>,
    pub output: PathBuf,
    /// Directory receiving `events.ndjson` and `result.json`; no artifacts when `None`
    pub logs_dir: Option<PathBuf>,
    pub manifest: ManifestSource,
}

impl RunRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, manifest: ManifestSource) -> Self {
        Self {
            input: input.into(),
            sheets: None,
            output: output.into(),
            logs_dir: None,
            manifest,
        }
    }

    pub fn with_sheets(mut self, sheets: &[&str]) -> Self {
        self.sheets = Some(sheets.iter().map(|sheet| sheet.to_string()).collect());
        self
    }

    pub fn with_logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(logs_dir.into());
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunError {
    pub code: String,
    pub stage: Option<Stage>,
    pub message: String,
}

impl RunError {
    fn from_engine(error: &EngineError, stage: Stage) -> Self {
        let stage = match error {
            EngineError::Hook(hook) => hook.stage,
            _ => stage,
        };
        Self {
            code: error.code().to_owned(),
            stage: Some(stage),
            message: error.to_string(),
        }
    }

    fn from_hook(error: &HookError) -> Self {
        Self {
            code: "hook_error".to_owned(),
            stage: Some(error.stage),
            message: error.to_string(),
        }
    }
}

/// What happened to one written table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableSummary {
    pub sheet: String,
    pub table_index: usize,
    /// Source range in A1 notation
    pub region: String,
    pub rows: usize,
    pub mapped_fields: Vec<String>,
    pub unmapped_fields: Vec<String>,
    pub passthrough: usize,
    pub issues: Vec<ValidationIssue>,
    pub written: WrittenTable,
}

impl TableSummary {
    fn new(mapping: &ColumnMapping, normalized: &NormalizedTable, written: WrittenTable) -> Self {
        let (mapped, unmapped): (Vec<_>, Vec<_>) = mapping.fields.iter().partition(|assignment| assignment.column.is_some());
        Self {
            sheet: normalized.origin.sheet_name.to_owned(),
            table_index: normalized.origin.table_index,
            region: normalized.region.to_string(),
            rows: normalized.row_count,
            mapped_fields: mapped.iter().map(|assignment| assignment.field.to_owned()).collect(),
            unmapped_fields: unmapped.iter().map(|assignment| assignment.field.to_owned()).collect(),
            passthrough: mapping.passthrough.len(),
            issues: normalized.issues.to_owned(),
            written,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    /// The error that failed the run
    pub error: Option<RunError>,
    /// Output workbook, set only once it has been saved
    pub output: Option<PathBuf>,
    pub events_log: Option<PathBuf>,
    pub result_log: Option<PathBuf>,
    pub tables: Vec<TableSummary>,
    /// Hook failures the run recovered from
    pub errors: Vec<RunError>,
    /// State left by the hooks
    pub state: RunState,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl RunResult {
    fn start(request: &RunRequest) -> Self {
        let started_at = Local::now();
        Self {
            run_id: format!("{}-{}", started_at.format("%Y%m%dT%H%M%S%.3f"), std::process::id()),
            status: RunStatus::Running,
            error: None,
            output: None,
            events_log: None,
            result_log: request.logs_dir.as_ref().map(|dir| dir.join(RESULT_FILE_NAME)),
            tables: Vec::new(),
            errors: Vec::new(),
            state: RunState::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Runs the built-in plugins without a host emitter.
pub fn run(request: &RunRequest) -> RunResult {
    run_with(request, &builtin_package(), &NoopEmitter)
}

/// Runs a request with a host package and event emitter. Never fails: every
/// error, panics included, ends up in the returned result.
pub fn run_with(request: &RunRequest, package: &ConfigPackage, emitter: &dyn EventEmitter) -> RunResult {
    let mut result = RunResult::start(request);
    let events = match &request.logs_dir {
        Some(logs_dir) => EventLog::create(logs_dir, emitter).unwrap_or_else(|error| {
            warn!(%error, logs_dir = %logs_dir.display(), "cannot create event log");
            EventLog::detached(emitter)
        }),
        None => EventLog::detached(emitter),
    };
    result.events_log = events.path().map(Path::to_path_buf);
    info!(run_id = %result.run_id, input = %request.input.display(), "run started");
    events.emit(&Event::info(
        "run.started",
        Stage::Load,
        json!({"run_id": result.run_id, "input": request.input, "output": request.output}),
    ));

    let stage = Cell::new(Stage::Load);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(request, package, &events, &stage, &mut result)));
    match outcome {
        Ok(Ok(())) => {
            result.status = RunStatus::Succeeded;
            result.output = Some(request.output.to_owned());
        }
        Ok(Err(failure)) => {
            result.status = RunStatus::Failed;
            result.error = Some(RunError::from_engine(&failure, stage.get()));
        }
        Err(payload) => {
            result.status = RunStatus::Failed;
            result.error = Some(RunError {
                code: "panic".to_owned(),
                stage: Some(stage.get()),
                message: panic_message(&*payload),
            });
        }
    }
    result.finished_at = Some(Local::now());

    let (level, stage) = match &result.error {
        Some(failure) => {
            error!(code = %failure.code, stage = ?failure.stage, message = %failure.message, "run failed");
            (EventLevel::Error, failure.stage)
        }
        None => {
            info!(tables = result.tables.len(), "run succeeded");
            (EventLevel::Info, Some(Stage::Save))
        }
    };
    let payload = json!({
        "run_id": result.run_id,
        "status": result.status,
        "tables": result.tables.len(),
        "errors": result.errors.len(),
        "error": result.error,
    });
    events.emit(&Event::new(level, "run.completed", stage, payload));
    events.finish();

    if let Some(path) = &result.result_log {
        if let Err(error) = write_result(&result, path) {
            warn!(%error, path = %path.display(), "cannot write run result");
        }
    }
    result
}

/// Registers the manifest fields and every plugin of the package, then
/// finalizes the registry.
pub fn build_registry(manifest: &ManifestContext, package: &ConfigPackage) -> Result<Registry, ConfigError> {
    let mut registry = Registry::new();
    for field in manifest.fields() {
        registry.register_field(field)?;
    }
    package.register_all(&mut registry, manifest)?;
    registry.finalize();
    Ok(registry)
}

fn load_manifest(source: &ManifestSource) -> Result<ManifestContext, ConfigError> {
    match source {
        ManifestSource::Path(path) => ManifestContext::load(path),
        ManifestSource::Inline(manifest) => {
            manifest.validate()?;
            Ok(manifest.clone())
        }
    }
}

fn execute(
    request: &RunRequest,
    package: &ConfigPackage,
    events: &dyn EventEmitter,
    stage: &Cell<Stage>,
    result: &mut RunResult,
) -> Result<(), EngineError> {
    stage.set(Stage::Load);
    let manifest = load_manifest(&request.manifest)?;
    let registry = build_registry(&manifest, package)?;
    let invoker = HookInvoker::new(&registry, &manifest)?;

    if !request.input.is_file() {
        Err(InputError::NotFound(request.input.to_owned()))?
    }
    let mut spreadsheet = open_spreadsheet(&request.input).map_err(InputError::from)?;
    let criteria = Criteria::new(request.sheets.as_deref(), true).map_err(InputError::from)?;
    criteria.check_selectors(&spreadsheet.sheet_names()).map_err(InputError::from)?;
    let sheets = spreadsheet.read_sheets(&criteria).map_err(InputError::from)?;
    debug!(sheets = sheets.len(), "input loaded");

    let mut run = Run {
        registry: &registry,
        manifest: &manifest,
        invoker,
        info: RunInfo {
            run_id: result.run_id.to_owned(),
            input: request.input.to_owned(),
            output: request.output.to_owned(),
            logs_dir: request.logs_dir.to_owned().unwrap_or_default(),
        },
        events,
        stage,
        writer: OutputWriter::new(&manifest.engine.writer),
        workbook: Workbook::new(),
        result,
    };
    run.hooks(HookKind::WorkbookStart, Scope::default())?;

    let defaults = &manifest.engine.defaults;
    for sheet in &sheets {
        stage.set(Stage::Classify);
        let rows = sheet.rows(defaults.max_empty_rows_run, defaults.max_empty_cols_run);
        let info = SheetInfo {
            name: sheet.name.to_owned(),
            index: sheet.index,
            source_path: request.input.to_owned(),
            row_count: rows.len(),
        };
        info!(sheet = %info.name, rows = info.row_count, "processing sheet");
        let scope = Scope { sheet: Some(&info), ..Scope::default() };
        if run.hooks(HookKind::SheetStart, scope)?.is_none() {
            info!(sheet = %info.name, "sheet skipped");
            continue;
        }

        let classifications = classify_rows(&registry, &manifest, &run.info, &info, &rows, events)?;
        stage.set(Stage::Segment);
        let tables = segment_tables(&info, &rows, &classifications, defaults.detector_max_table_rows, events);
        for table in &tables {
            run.table(&info, table)?;
        }
    }

    run.hooks(HookKind::BeforeSave, Scope { output: true, ..Scope::default() })?;
    stage.set(Stage::Save);
    let output = request.output.to_string_lossy();
    run.workbook
        .save(&request.output)
        .with_prefix(&output)
        .map_err(|error| PipelineError::Output(error.to_string()))?;
    info!(output = %output, "output saved");
    Ok(())
}

/// Optional hook context fields of a lifecycle point.
#[derive(Copy, Clone, Default)]
struct Scope<'s> {
    sheet: Option<&'s SheetInfo>,
    table: Option<&'s ExtractedTable>,
    mapping: Option<&'s ColumnMapping>,
    normalized: Option<&'s NormalizedTable>,
    output: bool,
}

struct Run<'a> {
    registry: &'a Registry,
    manifest: &'a ManifestContext,
    invoker: HookInvoker<'a>,
    info: RunInfo,
    events: &'a dyn EventEmitter,
    stage: &'a Cell<Stage>,
    writer: OutputWriter,
    workbook: Workbook,
    result: &'a mut RunResult,
}

impl Run<'_> {
    /// Calls the hooks of a lifecycle point and applies the failure policy.
    /// Returns the mapping patches to apply, or `None` when the sheet or
    /// table must be skipped.
    fn hooks(&mut self, kind: HookKind, scope: Scope<'_>) -> Result<Option<Vec<(String, ColumnMappingPatch)>>, EngineError> {
        self.stage.set(stage_of(kind));
        let mut context = HookContext {
            run: &self.info,
            manifest: self.manifest,
            state: &mut self.result.state,
            events: self.events,
            stage: stage_of(kind),
            kind,
            sheet: scope.sheet,
            table: scope.table,
            mapping: scope.mapping,
            normalized: scope.normalized,
            output: if scope.output { Some(&mut self.workbook) } else { None },
        };
        let report = self.invoker.invoke(&mut context)?;
        if report.is_ok() {
            return Ok(Some(report.patches));
        }

        let mut failures = report.failures.into_iter();
        match self.invoker.policy(kind) {
            FailurePolicy::AbortRun => {
                // the first failure ends the run, later ones are kept for the report
                let fatal = failures.next();
                self.result.errors.extend(failures.map(|failure| RunError::from_hook(&failure)));
                match fatal {
                    Some(failure) => Err(failure.into()),
                    None => Ok(Some(report.patches)),
                }
            }
            FailurePolicy::SkipSheet | FailurePolicy::SkipTable => {
                self.result.errors.extend(failures.map(|failure| RunError::from_hook(&failure)));
                Ok(None)
            }
            FailurePolicy::Isolate => {
                self.result.errors.extend(failures.map(|failure| RunError::from_hook(&failure)));
                Ok(Some(report.patches))
            }
        }
    }

    fn table(&mut self, sheet: &SheetInfo, table: &ExtractedTable) -> Result<(), EngineError> {
        let table_index = table.origin.table_index;
        let region = table.region.to_string();
        info!(sheet = %sheet.name, table_index, region = %region, rows = table.row_count(), "table detected");
        self.events.emit(&Event::info(
            "table.detected",
            Stage::Segment,
            json!({"sheet": sheet.name, "table_index": table_index, "region": region, "rows": table.row_count()}),
        ));
        let scope = Scope { sheet: Some(sheet), table: Some(table), ..Scope::default() };
        if self.hooks(HookKind::TableDetected, scope)?.is_none() {
            return Ok(());
        }

        self.stage.set(Stage::Map);
        let mut mapping = map_columns(self.registry, self.manifest, table)?;
        let scope = Scope { mapping: Some(&mapping), ..scope };
        let Some(patches) = self.hooks(HookKind::TableMapped, scope)? else {
            info!(sheet = %sheet.name, table_index, "table skipped");
            return Ok(());
        };
        for (hook, patch) in &patches {
            debug!(hook = %hook, ?patch, "applying mapping patch");
            mapping.apply_patch(patch, table)?;
        }
        self.events.emit(&Event::info(
            "table.mapped",
            Stage::Map,
            json!({"sheet": sheet.name, "table_index": table_index, "mapping": mapping, "patches": patches.len()}),
        ));

        self.stage.set(Stage::Normalize);
        let normalized = normalize_table(self.registry, self.manifest, table, &mapping)?;

        self.stage.set(Stage::Write);
        let written = self.writer.write_table(&mut self.workbook, &normalized)?;
        self.events.emit(&Event::info(
            "table.written",
            Stage::Write,
            json!({
                "sheet": sheet.name,
                "table_index": table_index,
                "output_sheet": written.sheet,
                "header_row": written.header_row,
                "last_row": written.last_row,
                "issues": normalized.issues.len(),
            }),
        ));
        self.result.tables.push(TableSummary::new(&mapping, &normalized, written));

        let scope = Scope {
            sheet: Some(sheet),
            table: Some(table),
            mapping: Some(&mapping),
            normalized: Some(&normalized),
            output: true,
        };
        self.hooks(HookKind::TableWritten, scope)?;
        Ok(())
    }
}

fn write_result(result: &RunResult, path: &Path) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, result)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "plugin panicked".to_owned())
}
