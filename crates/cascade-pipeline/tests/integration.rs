//! End-to-end tests for the Cascade batch engine.
//!
//! Each test assembles a task tree, runs it through the batch executor and
//! checks call order, loop bookkeeping, status propagation and persisted
//! results.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use cascade_pipeline::event::property;
use cascade_pipeline::{
    load_manifest, BatchExecutor, Children, Condition, FeatureCategory, FileIterator,
    FileSelection, Filter, JsonResultStore, LifecycleState, MemoryResultStore, ResultGroup,
    ResultStore, RunContext, Sequence, SpectrumAnalyzer, SyntheticSource, Task, TaskHandler,
};
use cascade_types::{CascadeError, Configuration, IncidentKind, Result, Status};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn entries(log: &Log, phase: &str) -> Vec<String> {
    let prefix = format!("{phase}:");
    log.borrow()
        .iter()
        .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

/// Logs every lifecycle call as `"<phase>:<name>"` and drives its children
/// once per execute, so it works as a leaf or a composite.
struct Recorder {
    name: String,
    log: Log,
    calls: u64,
    fail_on_call: Option<(u64, fn() -> CascadeError)>,
    fail_on_file: Option<String>,
    group: Option<ResultGroup>,
}

impl Recorder {
    fn handler(name: &str, log: &Log) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            calls: 0,
            fail_on_call: None,
            fail_on_file: None,
            group: None,
        }
    }

    fn task(name: &str, log: &Log) -> Task {
        Task::new(name, Self::handler(name, log))
    }

    fn failing_on_call(name: &str, log: &Log, call: u64, err: fn() -> CascadeError) -> Task {
        Task::new(
            name,
            Self {
                fail_on_call: Some((call, err)),
                ..Self::handler(name, log)
            },
        )
    }

    fn failing_on_file(name: &str, log: &Log, file: &str) -> Task {
        Task::new(
            name,
            Self {
                fail_on_file: Some(file.into()),
                ..Self::handler(name, log)
            },
        )
    }

    fn with_results(name: &str, log: &Log) -> Task {
        Task::new(
            name,
            Self {
                group: Some(ResultGroup::new(name)),
                ..Self::handler(name, log)
            },
        )
    }

    fn record(&self, phase: &str) {
        self.log.borrow_mut().push(format!("{phase}:{}", self.name));
    }
}

impl TaskHandler for Recorder {
    fn handler_type(&self) -> &str {
        "recorder"
    }

    fn initialize(&mut self, ctx: &mut RunContext) -> Result<()> {
        match ctx.file() {
            Some(file) => self.log.borrow_mut().push(format!("initialize:{}@{}", self.name, file.input)),
            None => self.record("initialize"),
        }
        if let Some(group) = &mut self.group {
            group.add_counter("units");
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<Status> {
        self.calls += 1;
        self.record("execute");
        if let Some((call, err)) = self.fail_on_call {
            if call == self.calls {
                return Err(err());
            }
        }
        if let (Some(bad), Some(file)) = (&self.fail_on_file, ctx.file()) {
            if *bad == file.input {
                return Err(CascadeError::Other(format!("corrupt file {bad}")));
            }
        }
        if let Some(group) = &mut self.group {
            let units = group.counter("units").unwrap_or(0.0);
            group.set_counter("units", units + 1.0);
        }
        if children.is_empty() {
            Ok(Status::Ok)
        } else {
            children.execute(ctx)
        }
    }

    fn finalize(&mut self, _ctx: &mut RunContext, _children: &mut Children<'_>) -> Result<()> {
        self.record("finalize");
        Ok(())
    }

    fn clear(&mut self) {
        self.record("clear");
    }

    fn results(&self) -> Option<&ResultGroup> {
        self.group.as_ref()
    }

    fn results_mut(&mut self) -> Option<&mut ResultGroup> {
        self.group.as_mut()
    }
}

fn event_loop(name: &str, pairs: &[(&str, i64)]) -> (Task, Configuration) {
    let mut cfg = Configuration::new();
    for (key, value) in pairs {
        cfg.set(format!("{name}.{key}"), *value);
    }
    (Task::new(name, cascade_pipeline::EventIterator::new()), cfg)
}

fn spectra() -> SpectrumAnalyzer {
    let central = Filter::new("Central")
        .with(Condition::range(FeatureCategory::Global, property::CENTRALITY, 0.0, 10.0).unwrap());
    let positive = Filter::new("Positive").with(Condition::equals(FeatureCategory::Charge, 0, 1.0).unwrap());
    SpectrumAnalyzer::new(
        "Spectra",
        vec![Arc::new(Filter::accept_all()), Arc::new(central)],
        vec![Arc::new(Filter::accept_all()), Arc::new(positive)],
    )
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

#[test]
fn event_loop_drives_children_in_order() {
    let log = new_log();
    let (root, cfg) = event_loop("Run", &[("units_per_sub_bunch", 7)]);
    let mut root = root
        .with_child(Recorder::task("A", &log))
        .with_child(Recorder::task("B", &log));
    let mut ctx = RunContext::in_memory();

    let summary = BatchExecutor::new(cfg).run(&mut root, &mut ctx).unwrap();

    assert_eq!(summary.status, Status::Ok);
    assert_eq!(summary.units, 7);
    let executed = entries(&log, "execute");
    assert_eq!(executed.len(), 14);
    for pair in executed.chunks(2) {
        assert_eq!(pair, ["A", "B"]);
    }
    assert_eq!(entries(&log, "finalize"), vec!["A", "B"]);
    assert_eq!(entries(&log, "initialize"), vec!["A", "B"]);
}

#[test]
fn partial_export_fires_at_the_full_period() {
    let log = new_log();
    let (root, cfg) = event_loop(
        "Run",
        &[
            ("units_per_sub_bunch", 2),
            ("sub_bunches_per_bunch", 3),
            ("bunches", 2),
        ],
    );
    let mut cfg = cfg;
    cfg.set("Run.partial_export", true);
    let mut root = root.with_child(Recorder::with_results("Counts", &log));
    let store = MemoryResultStore::new();
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = RunContext::new(store.clone()).with_checkpoint_dir(dir.path());

    let summary = BatchExecutor::new(cfg).run(&mut root, &mut ctx).unwrap();

    assert_eq!(summary.status, Status::Ok);
    assert_eq!(summary.units, 12);
    assert_eq!(ctx.checkpoints().len(), 1);
    let checkpoint = &ctx.checkpoints()[0];
    assert_eq!(checkpoint.unit, 12);
    assert_eq!((checkpoint.bunch, checkpoint.sub_bunch), (0, 0));
    assert_eq!(checkpoint.path, "run_B0_S0");
    assert_eq!(checkpoint.groups, vec!["Counts"]);

    assert_eq!(store.export_log(), vec!["run_B0_S0/Counts", "run/Counts"]);
    let partial = store.import("run_B0_S0", "Counts").unwrap();
    assert_eq!(partial.counter("units"), Some(12.0));

    let on_disk = load_manifest(dir.path()).unwrap().unwrap();
    assert_eq!(on_disk.unit, 12);
    assert_eq!(on_disk.run_id, summary.run_id);
}

#[test]
fn end_of_data_stops_the_loop_and_still_exports() {
    let (root, mut cfg) = event_loop("Run", &[("units_per_sub_bunch", 100)]);
    cfg.set("Gen.max_events", 5i64);
    let mut root = root
        .with_child(Task::new("Gen", SyntheticSource::new()))
        .with_child(Task::new("Spectra", spectra()));
    let store = MemoryResultStore::new();
    let mut ctx = RunContext::new(store.clone());

    let summary = BatchExecutor::new(cfg).run(&mut root, &mut ctx).unwrap();

    assert_eq!(summary.status, Status::EndOfData);
    assert!(summary.succeeded());
    assert_eq!(summary.units, 5);
    assert_eq!(root.children()[0].executed(), 6);
    assert_eq!(root.children()[1].executed(), 5);

    let exported = store.import("run", "Spectra").unwrap();
    assert_eq!(exported.counter("events.All"), Some(5.0));
}

#[test]
fn partial_spectra_carry_acceptance_counts() {
    let (root, mut cfg) = event_loop(
        "Run",
        &[
            ("units_per_sub_bunch", 2),
            ("sub_bunches_per_bunch", 3),
            ("bunches", 2),
        ],
    );
    cfg.set("Run.partial_export", true).set("Run.final_export", false);
    let mut root = root
        .with_child(Task::new("Gen", SyntheticSource::new()))
        .with_child(Task::new("Spectra", spectra()));
    let store = MemoryResultStore::new();
    let mut ctx = RunContext::new(store.clone());

    let summary = BatchExecutor::new(cfg).run(&mut root, &mut ctx).unwrap();

    assert_eq!(summary.status, Status::Ok);
    assert_eq!(store.export_log(), vec!["run_B0_S0/Spectra"]);
    let partial = store.import("run_B0_S0", "Spectra").unwrap();
    assert_eq!(partial.counter("events.All"), Some(12.0));
    let particles = partial.counter("particles.All.All").unwrap();
    assert!(particles > 0.0);
    assert_eq!(partial.histogram("pt.All.All").unwrap().entries() as f64, particles);
}

// ---------------------------------------------------------------------------
// Status propagation
// ---------------------------------------------------------------------------

#[test]
fn grandchild_fatal_halts_the_same_unit() {
    let log = new_log();
    let (root, cfg) = event_loop("Run", &[("units_per_sub_bunch", 10)]);
    let mid = Recorder::task("Mid", &log)
        .with_child(Recorder::failing_on_call("G1", &log, 3, || CascadeError::PoolExhausted {
            capacity: 4,
        }))
        .with_child(Recorder::task("G2", &log));
    let mut root = root.with_child(mid).with_child(Recorder::task("Late", &log));
    let mut ctx = RunContext::in_memory();

    let summary = BatchExecutor::new(cfg).run(&mut root, &mut ctx).unwrap();

    assert_eq!(summary.status, Status::Fatal);
    assert_eq!(summary.units, 2);
    let incident = summary.incident.unwrap();
    assert_eq!(incident.task, "G1");
    assert_eq!(incident.kind, IncidentKind::Exhausted);

    let mid = &root.children()[0];
    assert_eq!(mid.children()[0].executed(), 3);
    assert_eq!(mid.children()[1].executed(), 2);
    assert_eq!(root.children()[1].executed(), 2);
    assert_eq!(mid.status(), Status::Fatal);
    assert_eq!(root.status(), Status::Fatal);
    // Started tasks are still finalized exactly once.
    assert_eq!(entries(&log, "finalize"), vec!["G1", "G2", "Mid", "Late"]);
}

#[test]
fn failed_run_writes_no_final_document() {
    let log = new_log();
    let (root, cfg) = event_loop("Run", &[("units_per_sub_bunch", 10)]);
    let failing = Task::new(
        "B",
        Recorder {
            group: Some(ResultGroup::new("B")),
            fail_on_call: Some((3, || CascadeError::PoolExhausted { capacity: 4 })),
            ..Recorder::handler("B", &log)
        },
    );
    let mut root = root
        .with_child(Recorder::with_results("A", &log))
        .with_child(failing);
    let store = MemoryResultStore::new();
    let mut ctx = RunContext::new(store.clone());

    let summary = BatchExecutor::new(cfg).run(&mut root, &mut ctx).unwrap();

    assert_eq!(summary.status, Status::Fatal);
    assert!(store.export_log().is_empty(), "{:?}", store.export_log());
    assert!(store.import("run", "A").is_err());
    assert_eq!(entries(&log, "finalize"), vec!["A", "B"]);
}

#[test]
fn clear_runs_bottom_up_after_a_single_finalize() {
    let log = new_log();
    let mut root = Recorder::task("Root", &log)
        .with_child(Recorder::task("Mid", &log).with_child(Recorder::task("Leaf", &log)))
        .with_child(Recorder::task("Side", &log));
    let mut ctx = RunContext::in_memory();

    BatchExecutor::new(Configuration::new())
        .run(&mut root, &mut ctx)
        .unwrap();

    assert_eq!(entries(&log, "finalize"), vec!["Leaf", "Mid", "Side", "Root"]);
    assert_eq!(entries(&log, "clear"), vec!["Leaf", "Mid", "Side", "Root"]);
    assert_eq!(root.state(), LifecycleState::Cleared);

    // A second clear is a no-op.
    root.clear(&mut ctx).unwrap();
    assert_eq!(entries(&log, "clear").len(), 4);
}

#[test]
fn lifecycle_misuse_is_returned_as_error() {
    let log = new_log();
    let mut task = Recorder::task("Lonely", &log);
    let mut ctx = RunContext::in_memory();
    match task.execute(&mut ctx) {
        Err(CascadeError::Lifecycle { task, operation, .. }) => {
            assert_eq!(task, "Lonely");
            assert_eq!(operation, "execute");
        }
        other => panic!("Expected a lifecycle error, got: {other:?}"),
    }
    assert!(entries(&log, "execute").is_empty());
}

#[test]
fn contexts_are_independent() {
    let log = new_log();
    let mut failing = Task::new("Root", Sequence).with_child(Recorder::failing_on_call("Bad", &log, 1, || {
        CascadeError::Other("unreadable record".into())
    }));
    let mut healthy = Task::new("Root", Sequence).with_child(Recorder::task("Good", &log));
    let mut ctx_a = RunContext::in_memory();
    let mut ctx_b = RunContext::in_memory();
    let executor = BatchExecutor::new(Configuration::new());

    let a = executor.run(&mut failing, &mut ctx_a).unwrap();
    let b = executor.run(&mut healthy, &mut ctx_b).unwrap();

    assert_eq!(a.status, Status::Error);
    assert_eq!(b.status, Status::Ok);
    assert!(b.incident.is_none());
    assert_ne!(a.run_id, b.run_id);
}

// ---------------------------------------------------------------------------
// File loops
// ---------------------------------------------------------------------------

#[test]
fn zero_input_files_is_a_usage_error() {
    let log = new_log();
    let mut root = Task::new("Files", FileIterator::new(FileSelection::Explicit(vec![])))
        .with_child(Recorder::task("Reader", &log));
    let mut ctx = RunContext::in_memory();

    let summary = BatchExecutor::new(Configuration::new())
        .run(&mut root, &mut ctx)
        .unwrap();

    assert_eq!(summary.status, Status::Error);
    let incident = summary.incident.unwrap();
    assert_eq!(incident.kind, IncidentKind::Usage);
    assert_eq!(incident.task, "Files");
    assert!(log.borrow().is_empty(), "No child may be invoked: {:?}", log.borrow());
}

#[test]
fn file_loop_stops_at_the_failing_file() {
    let log = new_log();
    let files = ["f1", "f2", "f3", "f4"].map(String::from).to_vec();
    let mut root = Task::new("Files", FileIterator::new(FileSelection::Explicit(files)))
        .with_child(Recorder::failing_on_file("Reader", &log, "f2"));
    let mut ctx = RunContext::in_memory();

    let summary = BatchExecutor::new(Configuration::new())
        .run(&mut root, &mut ctx)
        .unwrap();

    assert_eq!(summary.status, Status::Error);
    assert_eq!(summary.incident.unwrap().task, "Reader");
    assert_eq!(entries(&log, "initialize"), vec!["Reader@f1", "Reader@f2"]);
    // Each visited file gets the full child lifecycle.
    assert_eq!(entries(&log, "finalize").len(), 2);
    assert_eq!(entries(&log, "clear").len(), 2);
}

#[test]
fn derive_loop_stops_at_the_first_unreadable_document() {
    let log = new_log();
    let store = MemoryResultStore::new();
    let mut seeded = ResultGroup::new("Counts");
    seeded.set_counter("units", 3.0);
    store.insert("f1", &seeded);
    store.insert("f3", &seeded);
    let files = ["f1", "f2", "f3"].map(String::from).to_vec();
    let mut root = Task::new("Derive", FileIterator::derived(FileSelection::Explicit(files)))
        .with_child(Recorder::with_results("Counts", &log));
    let mut ctx = RunContext::new(store.clone());

    let summary = BatchExecutor::new(Configuration::new())
        .run(&mut root, &mut ctx)
        .unwrap();

    assert_eq!(summary.status, Status::Error);
    let incident = summary.incident.unwrap();
    assert_eq!(incident.task, "Counts");
    assert_eq!(incident.kind, IncidentKind::Data);
    assert_eq!(store.export_log(), vec!["f1_derived/Counts"]);
    assert_eq!(store.import("f1_derived", "Counts").unwrap().counter("units"), Some(3.0));
    assert!(store.document("f3_derived").is_none());
    // Derived passes never run the per-event lifecycle.
    assert!(entries(&log, "initialize").is_empty());
    assert!(entries(&log, "execute").is_empty());
}

#[test]
fn pattern_selection_with_no_matches_invokes_nothing() {
    let log = new_log();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a result").unwrap();
    let selection = FileSelection::result_documents(dir.path(), "_derived");
    let mut root = Task::new("Derive", FileIterator::derived(selection)).with_child(Recorder::task("Reader", &log));
    let mut ctx = RunContext::in_memory();

    let summary = BatchExecutor::new(Configuration::new())
        .run(&mut root, &mut ctx)
        .unwrap();

    assert_eq!(summary.status, Status::Error);
    assert_eq!(summary.incident.unwrap().kind, IncidentKind::Usage);
    assert!(log.borrow().is_empty());
}

// ---------------------------------------------------------------------------
// Results on disk
// ---------------------------------------------------------------------------

#[test]
fn spectra_run_then_derived_pass() {
    let dir = tempfile::tempdir().unwrap();

    // Primary pass: generate, select, fill, export to <dir>/spectra.json.
    let (root, mut cfg) = event_loop("Run", &[("units_per_sub_bunch", 50)]);
    cfg.set("Run.output_name", "spectra").set("Gen.seed", 99i64);
    let mut root = root
        .with_child(Task::new("Gen", SyntheticSource::new()))
        .with_child(Task::new("Spectra", spectra()));
    let mut ctx = RunContext::new(JsonResultStore::new(dir.path()));
    let summary = BatchExecutor::new(cfg).run(&mut root, &mut ctx).unwrap();
    assert_eq!(summary.status, Status::Ok);
    assert!(dir.path().join("spectra.json").exists());

    let primary = JsonResultStore::new(dir.path()).import("spectra", "Spectra").unwrap();
    assert_eq!(primary.counter("events.All"), Some(50.0));
    let all = primary.histogram("pt.All.All").unwrap();
    assert!(all.entries() > 0);
    assert!(primary.histogram("pt.All.Positive").unwrap().entries() <= all.entries());

    // Derived pass over every result document in the directory.
    let selection = FileSelection::result_documents(dir.path(), "_derived");
    let mut derive = Task::new("Derive", FileIterator::derived(selection)).with_child(Task::new("Spectra", spectra()));
    let mut ctx = RunContext::new(JsonResultStore::new(dir.path()));
    let summary = BatchExecutor::new(Configuration::new())
        .run(&mut derive, &mut ctx)
        .unwrap();
    assert_eq!(summary.status, Status::Ok);

    let derived_path = dir.path().join("spectra_derived.json");
    assert!(derived_path.exists());
    let derived = JsonResultStore::new(dir.path())
        .import(&derived_path.to_string_lossy(), "Spectra")
        .unwrap();
    let density = derived.histogram("dndpt.All.All").unwrap();
    let width = density.bin_width();
    let expected = all.integral() / (50.0 * width);
    assert!((density.integral() - expected).abs() < 1e-6);
    assert!(derived.counter("mean_pt.All.All").unwrap() > 0.0);
    // Primary statistics travel with the derived ones.
    assert_eq!(derived.counter("events.All"), Some(50.0));
}
