mod classify;
mod cleaner;
mod error;
mod matching;
mod model;
mod reader;
mod report;
mod roles;
mod validate;

pub use classify::classify;
pub use error::SiftError;
pub use report::{Artifact, Issue, Summary};

use uuid::Uuid;
use itertools::Itertools;
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use core_lib::{elapsed_display, highlight, row_rate, schema::Schema};

///
/// These are the linear phases of a reconciliation task.
///
/// The cancel flag is observed between phases - a phase always runs to completion
/// once entered.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Classify,
    Read,
    Clean,
    Match,
    Validate,
    Report,
    Complete,
}

impl Phase {
    pub fn ordinal(&self) -> usize {
        match self {
            Phase::Classify => 1,
            Phase::Read     => 2,
            Phase::Clean    => 3,
            Phase::Match    => 4,
            Phase::Validate => 5,
            Phase::Report   => 6,
            Phase::Complete => 7,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Classify => "classify",
            Phase::Read     => "read",
            Phase::Clean    => "clean",
            Phase::Match    => "match",
            Phase::Validate => "validate",
            Phase::Report   => "report",
            Phase::Complete => "complete",
        }
    }

    fn from_ordinal(ordinal: usize) -> Phase {
        match ordinal {
            1 => Phase::Classify,
            2 => Phase::Read,
            3 => Phase::Clean,
            4 => Phase::Match,
            5 => Phase::Validate,
            6 => Phase::Report,
            _ => Phase::Complete,
        }
    }
}

///
/// Shared between the worker running a task and whoever may cancel it.
///
/// Cancellation is cooperative - the pipeline calls check() at phase boundaries and
/// unwinds with Canceled or TimedOut. The current phase doubles as the progress
/// indicator surfaced by the status tool.
///
pub struct TaskHandle {
    canceled: AtomicBool,
    timed_out: AtomicBool,
    deadline: std::sync::Mutex<Option<Instant>>,
    phase: AtomicUsize,
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHandle {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            deadline: std::sync::Mutex::new(None),
            phase: AtomicUsize::new(Phase::Classify.ordinal()),
        }
    }

    ///
    /// Start the wall-clock budget. Called when a worker picks the task up.
    ///
    pub fn arm(&self, budget: Duration) {
        *self.deadline.lock().expect("deadline lock poisoned") = Some(Instant::now() + budget);
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.ordinal(), Ordering::SeqCst);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_ordinal(self.phase.load(Ordering::SeqCst))
    }

    ///
    /// Observe the cancel flag and the deadline. Called at phase boundaries only.
    ///
    pub fn check(&self) -> Result<(), SiftError> {
        let expired = self.deadline.lock().expect("deadline lock poisoned")
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false);

        if expired {
            self.timed_out.store(true, Ordering::SeqCst);
            self.canceled.store(true, Ordering::SeqCst);
            return Err(SiftError::TimedOut)
        }

        if self.is_canceled() {
            return Err(SiftError::Canceled)
        }

        Ok(())
    }
}

///
/// Created for each reconciliation task. Used to pass the main top-level task 'things' around.
///
pub struct Context {
    started: Instant,          // When the task started processing.
    task_id: Uuid,             // Each task is given a unique id.
    schema: Arc<Schema>,       // The validated schema driving the run.
    files: Vec<PathBuf>,       // The materialised input files.
    handle: Arc<TaskHandle>,   // Cancel flag, deadline and phase indicator.
    warnings: RefCell<Vec<String>>, // Non-fatal findings reported in the artifact.
}

impl Context {
    pub fn new(task_id: Uuid, schema: Arc<Schema>, files: Vec<PathBuf>, handle: Arc<TaskHandle>) -> Self {
        Self {
            started: Instant::now(),
            task_id,
            schema,
            files,
            handle,
            warnings: RefCell::new(vec!()),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn task_id(&self) -> &Uuid {
        &self.task_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    ///
    /// Record a non-fatal finding. It is logged immediately and lands in the
    /// artifact's metadata.warnings in recording order.
    ///
    pub fn warn(&self, message: String) {
        log::warn!("{}", message);
        self.warnings.borrow_mut().push(message);
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    ///
    /// The two declared side names, in declaration order.
    ///
    fn side_names(&self) -> (String, String) {
        let mut names = self.schema.sides().keys();
        let business = names.next().expect("schema has no sides").clone();
        let finance = names.next().expect("schema has one side").clone();
        (business, finance)
    }
}

///
/// Run the full reconciliation pipeline for one task and produce its artifact.
///
/// Phases run strictly in sequence; the handle's cancel flag is observed at every
/// phase boundary. Fatal errors abort the task, per-row problems degrade to
/// warnings in the artifact.
///
pub fn run_task(ctx: &Context) -> Result<Artifact, SiftError> {
    log::info!("Starting reconciliation task:");
    log::info!("   Task ID: {}", ctx.task_id());
    log::info!("    Schema: v{}", ctx.schema().version());
    log::info!("     Files: {}", ctx.files().len());

    let (business_name, finance_name) = ctx.side_names();

    // Assign every input file to a side.
    ctx.handle().set_phase(Phase::Classify);
    ctx.handle().check()?;
    let assignments = classify::classify(ctx.schema(), ctx.files())?;
    log::info!("Classified {} file(s) across sides {}", ctx.files().len(), assignments.keys().join(", "));

    // Load each side into canonical rows.
    ctx.handle().set_phase(Phase::Read);
    ctx.handle().check()?;

    let mut sides: Vec<(String, Vec<core_lib::value::Row>)> = vec!();
    for (side_name, files) in &assignments {
        let side = &ctx.schema().sides()[side_name];
        let mut rows = vec!();

        for file in files {
            let started = Instant::now();
            let table = reader::read(file, side.sheet())?;
            let mut resolved = roles::resolve(side_name, side, ctx.schema().key_role(), &table, file)?;

            log::info!("{} records with {} columns read from {} in {} ({})",
                resolved.len(),
                table.headers().len(),
                file.to_string_lossy(),
                highlight(&elapsed_display(started.elapsed())),
                row_rate(resolved.len(), started.elapsed()));

            rows.append(&mut resolved);
        }

        sides.push((side_name.clone(), rows));
    }

    // Normalise the data.
    ctx.handle().set_phase(Phase::Clean);
    ctx.handle().check()?;

    for (side_name, rows) in &mut sides {
        let ops = ctx.schema().cleaning_for(side_name);
        let cleaned = cleaner::clean(ctx, side_name, ops, std::mem::take(rows));
        *rows = cleaned;
    }

    let finance_rows = sides.pop().expect("finance side missing").1;
    let business_rows = sides.pop().expect("business side missing").1;

    // Join the sides on the key role.
    ctx.handle().set_phase(Phase::Match);
    ctx.handle().check()?;
    let outcome = matching::match_sides(ctx, &business_rows, &finance_rows);

    // Evaluate the validation rules.
    ctx.handle().set_phase(Phase::Validate);
    ctx.handle().check()?;
    let issues = validate::evaluate(ctx, &business_name, &finance_name, &business_rows, &finance_rows, &outcome);

    // Assemble the artifact.
    ctx.handle().set_phase(Phase::Report);
    let artifact = report::build(ctx, &assignments, &business_rows, &finance_rows, &outcome, issues);
    ctx.handle().set_phase(Phase::Complete);

    let duration = ctx.started().elapsed();
    log::info!("Completed reconciliation task {} in {}",
        ctx.task_id(),
        highlight(&elapsed_display(duration)));

    Ok(artifact)
}
