//! The task tree: one [`Task`] node type carrying a [`TaskHandler`] and an
//! ordered list of owned children.
//!
//! `Task` owns the lifecycle state machine and status propagation; handlers
//! supply behaviour. Capabilities (event selection, result groups, driving
//! children) are opt-in hooks on the handler trait.
//!
//! Handler failures never escape as `Err`: they are classified by
//! [`CascadeError::status`] and reported to the run's status register. Only
//! lifecycle misuse is returned as an error.

use cascade_types::{
    CascadeError, ConfigSchema, Configuration, Incident, IncidentKind, Result, Status, TaskConfig,
};

use crate::context::RunContext;
use crate::results::ResultGroup;
use crate::selection::EventSelection;

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Initialized,
    Running,
    Finalized,
    Cleared,
}

impl LifecycleState {
    /// Initialized or Running: the task owes a `finalize()`.
    pub fn is_started(self) -> bool {
        matches!(self, LifecycleState::Initialized | LifecycleState::Running)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Configured => "configured",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Finalized => "finalized",
            LifecycleState::Cleared => "cleared",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TaskHandler trait
// ---------------------------------------------------------------------------

pub trait TaskHandler {
    /// The handler type identifier (e.g. "sequence", "iterator", "spectrum").
    fn handler_type(&self) -> &str;

    /// Declare recognised options and their defaults.
    fn declare(&self, _schema: &mut ConfigSchema) {}

    /// Read bound option values. May be called more than once.
    fn configure(&mut self, _config: &TaskConfig) -> Result<()> {
        Ok(())
    }

    /// Allocate per-run state.
    fn initialize(&mut self, _ctx: &mut RunContext) -> Result<()> {
        Ok(())
    }

    /// One unit of work, or a whole loop for drivers.
    fn execute(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<Status>;

    /// Runs once after the loop, after every started child was finalized.
    fn finalize(&mut self, _ctx: &mut RunContext, _children: &mut Children<'_>) -> Result<()> {
        Ok(())
    }

    /// Release per-run storage.
    fn clear(&mut self) {}

    /// `true` when the handler runs its children's lifecycle itself, so the
    /// core must not initialize them along with the parent.
    fn manages_children(&self) -> bool {
        false
    }

    fn selection(&self) -> Option<&EventSelection> {
        None
    }

    fn selection_mut(&mut self) -> Option<&mut EventSelection> {
        None
    }

    fn results(&self) -> Option<&ResultGroup> {
        None
    }

    fn results_mut(&mut self) -> Option<&mut ResultGroup> {
        None
    }

    /// Add derived statistics to the result group.
    fn create_derived(&mut self, _ctx: &mut RunContext) -> Result<()> {
        Ok(())
    }

    /// Fill derived statistics from the primary ones.
    fn calculate_derived(&mut self, _ctx: &mut RunContext) -> Result<()> {
        Ok(())
    }
}

/// Plain composite: executes its children once, in order.
#[derive(Debug, Default)]
pub struct Sequence;

impl TaskHandler for Sequence {
    fn handler_type(&self) -> &str {
        "sequence"
    }

    fn execute(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<Status> {
        children.execute(ctx)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

pub struct Task {
    // Declared before `handler` so children are dropped first.
    children: Vec<Task>,
    name: String,
    state: LifecycleState,
    status: Status,
    executed: u64,
    accepted: u64,
    handler: Box<dyn TaskHandler>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("handler", &self.handler.handler_type())
            .field("state", &self.state)
            .field("status", &self.status)
            .field("children", &self.children)
            .finish()
    }
}

impl Task {
    pub fn new(name: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        Self {
            children: Vec::new(),
            name: name.into(),
            state: LifecycleState::Unconfigured,
            status: Status::Ok,
            executed: 0,
            accepted: 0,
            handler: Box::new(handler),
        }
    }

    /// Builder-style [`add_child`](Task::add_child) for assembling trees.
    pub fn with_child(mut self, child: Task) -> Self {
        self.children.push(child);
        self
    }

    /// Transfer ownership of `child` to this task. Only allowed before the
    /// tree is initialized.
    pub fn add_child(&mut self, child: Task) -> Result<()> {
        match self.state {
            LifecycleState::Unconfigured | LifecycleState::Configured => {
                self.children.push(child);
                Ok(())
            }
            _ => Err(self.violation("add a child")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler_type(&self) -> &str {
        self.handler.handler_type()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Worst status this task reported in the current run.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Number of `execute()` calls in the current run.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Number of `execute()` calls that ended Ok.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn children(&self) -> &[Task] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Task> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn manages_children(&self) -> bool {
        self.handler.manages_children()
    }

    pub fn selection(&self) -> Option<&EventSelection> {
        self.handler.selection()
    }

    pub fn results(&self) -> Option<&ResultGroup> {
        self.handler.results()
    }

    /// Depth-first, parent before children.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Task, usize)) {
        self.walk_at(0, visit);
    }

    fn walk_at<'a>(&'a self, depth: usize, visit: &mut dyn FnMut(&'a Task, usize)) {
        visit(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visit);
        }
    }

    fn violation(&self, operation: &'static str) -> CascadeError {
        CascadeError::Lifecycle {
            task: self.name.clone(),
            operation,
            state: self.state.to_string(),
        }
    }

    /// Report a handler failure and return the resulting status.
    fn fail(&mut self, ctx: &mut RunContext, err: &CascadeError) -> Status {
        let status = ctx.register_mut().report_error(&self.name, err);
        self.status = self.status.max(status);
        if status == Status::Fatal {
            tracing::error!(task = %self.name, error = %err, fatal = true, "Task failed");
        } else {
            tracing::error!(task = %self.name, error = %err, "Task failed");
        }
        status
    }

    /// Report a non-Ok status a handler returned without an error.
    fn signal(&mut self, ctx: &mut RunContext, status: Status) {
        self.status = self.status.max(status);
        let kind = match status {
            Status::Ok => return,
            Status::Warning => IncidentKind::Warning,
            Status::EndOfData => IncidentKind::EndOfData,
            Status::Error => IncidentKind::Data,
            Status::Fatal => IncidentKind::Contract,
        };
        ctx.register_mut().report(
            status,
            Incident {
                task: self.name.clone(),
                kind,
                message: format!("{} reported {status}", self.handler.handler_type()),
            },
        );
    }

    // -- lifecycle -----------------------------------------------------------

    /// Bind options for this task and every descendant. Idempotent.
    pub fn configure(&mut self, config: &Configuration) -> Result<()> {
        match self.state {
            LifecycleState::Unconfigured | LifecycleState::Configured | LifecycleState::Cleared => {}
            _ => return Err(self.violation("configure")),
        }
        let mut schema = ConfigSchema::new();
        self.handler.declare(&mut schema);
        let bound = schema.bind(&self.name, config)?;
        self.handler.configure(&bound)?;
        tracing::debug!(task = %self.name, handler = %self.handler.handler_type(), "Configured");
        for child in &mut self.children {
            child.configure(config)?;
        }
        self.state = LifecycleState::Configured;
        Ok(())
    }

    /// Allocate per-run state, then initialize children in order unless the
    /// handler manages them. Stops at the first non-Ok status.
    pub fn initialize(&mut self, ctx: &mut RunContext) -> Result<()> {
        match self.state {
            LifecycleState::Configured | LifecycleState::Cleared => {}
            _ => return Err(self.violation("initialize")),
        }
        self.state = LifecycleState::Initialized;
        self.status = Status::Ok;
        self.executed = 0;
        self.accepted = 0;
        tracing::debug!(task = %self.name, "Initializing");

        let outcome = self.handler.initialize(ctx).and_then(|()| {
            match self.handler.selection_mut() {
                Some(selection) => {
                    selection.validate(&self.name)?;
                    selection.reset();
                    Ok(())
                }
                None => Ok(()),
            }
        });
        if let Err(err) = outcome {
            self.fail(ctx, &err);
            return Ok(());
        }

        if !self.handler.manages_children() {
            for child in &mut self.children {
                if !ctx.is_ok() {
                    break;
                }
                child.initialize(ctx)?;
            }
        }
        Ok(())
    }

    /// One call of the handler's `execute()`.
    pub fn execute(&mut self, ctx: &mut RunContext) -> Result<Status> {
        if !self.state.is_started() {
            return Err(self.violation("execute"));
        }
        self.state = LifecycleState::Running;
        self.executed += 1;

        let mut children = Children::new(&mut self.children);
        let status = match self.handler.execute(ctx, &mut children) {
            Ok(status) => {
                self.signal(ctx, status);
                status
            }
            Err(err @ CascadeError::Lifecycle { .. }) => return Err(err),
            Err(err) => self.fail(ctx, &err),
        };
        if status.is_ok() {
            self.accepted += 1;
        }
        Ok(status)
    }

    /// Finalize started children (bottom-up), then this task. Runs exactly
    /// once per run; later calls are no-ops.
    pub fn finalize(&mut self, ctx: &mut RunContext) -> Result<()> {
        match self.state {
            LifecycleState::Initialized | LifecycleState::Running => {}
            LifecycleState::Finalized | LifecycleState::Cleared => return Ok(()),
            _ => return Err(self.violation("finalize")),
        }
        let mut children = Children::new(&mut self.children);
        children.finalize(ctx)?;
        if let Err(err) = self.handler.finalize(ctx, &mut children) {
            self.fail(ctx, &err);
        }
        self.state = LifecycleState::Finalized;
        tracing::debug!(task = %self.name, executed = self.executed, "Finalized");
        Ok(())
    }

    /// Finalize if still pending, clear every child, then release this
    /// task's own storage. A no-op before the first initialize and after a
    /// previous clear; an error before configure.
    pub fn clear(&mut self, ctx: &mut RunContext) -> Result<()> {
        match self.state {
            LifecycleState::Unconfigured => return Err(self.violation("clear")),
            LifecycleState::Configured | LifecycleState::Cleared => return Ok(()),
            LifecycleState::Initialized | LifecycleState::Running => self.finalize(ctx)?,
            LifecycleState::Finalized => {}
        }
        for child in &mut self.children {
            child.clear(ctx)?;
        }
        self.handler.clear();
        self.state = LifecycleState::Cleared;
        Ok(())
    }

    // -- results -------------------------------------------------------------

    fn require_configured(&self, operation: &'static str) -> Result<()> {
        if self.state == LifecycleState::Unconfigured {
            return Err(self.violation(operation));
        }
        Ok(())
    }

    /// Export this task's group, then every descendant's, to `path`.
    /// Nothing is written once the context carries an Error or Fatal.
    pub fn export(&mut self, ctx: &mut RunContext, path: &str) -> Result<()> {
        self.require_configured("export")?;
        if ctx.status().is_failure() {
            return Ok(());
        }
        if let Some(group) = self.handler.results() {
            if let Err(err) = ctx.store_mut().export(group, path) {
                self.fail(ctx, &err);
                return Ok(());
            }
        }
        for child in &mut self.children {
            if ctx.status().is_failure() {
                break;
            }
            child.export(ctx, path)?;
        }
        Ok(())
    }

    /// Persist the current state mid-run; same as [`export`](Task::export)
    /// to a checkpoint path.
    pub fn save_partial(&mut self, ctx: &mut RunContext, path: &str) -> Result<()> {
        tracing::debug!(task = %self.name, path = %path, "Saving partial results");
        self.export(ctx, path)
    }

    /// Replace this task's group (and every descendant's) with the copy stored at `path`.
    pub fn import(&mut self, ctx: &mut RunContext, path: &str) -> Result<()> {
        self.require_configured("import")?;
        if let Some(name) = self.handler.results().map(|g| g.name().to_string()) {
            match ctx.store().import(path, &name) {
                Ok(loaded) => {
                    if let Some(group) = self.handler.results_mut() {
                        *group = loaded;
                    }
                }
                Err(err) => {
                    self.fail(ctx, &err);
                    return Ok(());
                }
            }
        }
        for child in &mut self.children {
            child.import(ctx, path)?;
            if !ctx.is_ok() {
                break;
            }
        }
        Ok(())
    }

    pub fn create_derived(&mut self, ctx: &mut RunContext) -> Result<()> {
        self.require_configured("create derived results")?;
        if let Err(err) = self.handler.create_derived(ctx) {
            self.fail(ctx, &err);
            return Ok(());
        }
        for child in &mut self.children {
            child.create_derived(ctx)?;
            if !ctx.is_ok() {
                break;
            }
        }
        Ok(())
    }

    pub fn calculate_derived(&mut self, ctx: &mut RunContext) -> Result<()> {
        self.require_configured("calculate derived results")?;
        if let Err(err) = self.handler.calculate_derived(ctx) {
            self.fail(ctx, &err);
            return Ok(());
        }
        for child in &mut self.children {
            child.calculate_derived(ctx)?;
            if !ctx.is_ok() {
                break;
            }
        }
        Ok(())
    }

    /// Names of every result group in this subtree, parent first.
    pub fn group_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.walk(&mut |task, _| {
            if let Some(group) = task.results() {
                names.push(group.name().to_string());
            }
        });
        names
    }
}

// ---------------------------------------------------------------------------
// Children: what a handler sees of its subtree
// ---------------------------------------------------------------------------

/// Borrowed view of a task's children handed to its handler.
///
/// Every driving method checks the status register after each child and
/// stops at the first non-Ok state, except `finalize`/`clear`, which always
/// visit every started child. Exports check for Error or Fatal before each
/// child, so results are still written once the input has run out but never
/// after a failure.
pub struct Children<'a> {
    tasks: &'a mut [Task],
}

impl<'a> Children<'a> {
    pub fn new(tasks: &'a mut [Task]) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn initialize(&mut self, ctx: &mut RunContext) -> Result<()> {
        for task in self.tasks.iter_mut() {
            task.initialize(ctx)?;
            if !ctx.is_ok() {
                break;
            }
        }
        Ok(())
    }

    /// Execute each child once, in registration order.
    pub fn execute(&mut self, ctx: &mut RunContext) -> Result<Status> {
        for task in self.tasks.iter_mut() {
            task.execute(ctx)?;
            if !ctx.is_ok() {
                break;
            }
        }
        Ok(ctx.status())
    }

    pub fn finalize(&mut self, ctx: &mut RunContext) -> Result<()> {
        for task in self.tasks.iter_mut() {
            if task.state().is_started() {
                task.finalize(ctx)?;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self, ctx: &mut RunContext) -> Result<()> {
        for task in self.tasks.iter_mut() {
            task.clear(ctx)?;
        }
        Ok(())
    }

    pub fn save_partial(&mut self, ctx: &mut RunContext, path: &str) -> Result<()> {
        for task in self.tasks.iter_mut() {
            if ctx.status().is_failure() {
                break;
            }
            task.save_partial(ctx, path)?;
        }
        Ok(())
    }

    pub fn export(&mut self, ctx: &mut RunContext, path: &str) -> Result<()> {
        for task in self.tasks.iter_mut() {
            if ctx.status().is_failure() {
                break;
            }
            task.export(ctx, path)?;
        }
        Ok(())
    }

    pub fn group_names(&self) -> Vec<String> {
        self.tasks.iter().flat_map(Task::group_names).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every lifecycle call as `"<phase>:<name>"`.
    struct Tracer {
        name: String,
        log: Log,
        fail_execute_with: Option<fn() -> CascadeError>,
    }

    impl Tracer {
        fn task(name: &str, log: &Log) -> Task {
            Task::new(
                name,
                Tracer {
                    name: name.into(),
                    log: log.clone(),
                    fail_execute_with: None,
                },
            )
        }

        fn failing(name: &str, log: &Log, err: fn() -> CascadeError) -> Task {
            Task::new(
                name,
                Tracer {
                    name: name.into(),
                    log: log.clone(),
                    fail_execute_with: Some(err),
                },
            )
        }

        fn record(&self, phase: &str) {
            self.log.borrow_mut().push(format!("{phase}:{}", self.name));
        }
    }

    impl TaskHandler for Tracer {
        fn handler_type(&self) -> &str {
            "tracer"
        }

        fn initialize(&mut self, _ctx: &mut RunContext) -> Result<()> {
            self.record("init");
            Ok(())
        }

        fn execute(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<Status> {
            self.record("exec");
            if let Some(err) = self.fail_execute_with {
                return Err(err());
            }
            children.execute(ctx)
        }

        fn finalize(&mut self, _ctx: &mut RunContext, _children: &mut Children<'_>) -> Result<()> {
            self.record("fin");
            Ok(())
        }

        fn clear(&mut self) {
            self.record("clear");
        }
    }

    fn new_log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn entries(log: &Log, phase: &str) -> Vec<String> {
        log.borrow()
            .iter()
            .filter(|e| e.starts_with(phase))
            .cloned()
            .collect()
    }

    fn ready(mut root: Task, ctx: &mut RunContext) -> Task {
        root.configure(&Configuration::new()).unwrap();
        root.initialize(ctx).unwrap();
        root
    }

    #[test]
    fn lifecycle_advances_in_order() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let mut task = Tracer::task("A", &log);
        assert_eq!(task.state(), LifecycleState::Unconfigured);
        task.configure(&Configuration::new()).unwrap();
        assert_eq!(task.state(), LifecycleState::Configured);
        task.initialize(&mut ctx).unwrap();
        assert_eq!(task.state(), LifecycleState::Initialized);
        task.execute(&mut ctx).unwrap();
        assert_eq!(task.state(), LifecycleState::Running);
        task.finalize(&mut ctx).unwrap();
        assert_eq!(task.state(), LifecycleState::Finalized);
        task.clear(&mut ctx).unwrap();
        assert_eq!(task.state(), LifecycleState::Cleared);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let mut task = Tracer::task("A", &log);
        assert!(matches!(
            task.initialize(&mut ctx),
            Err(CascadeError::Lifecycle { operation: "initialize", .. })
        ));
        assert!(matches!(
            task.clear(&mut ctx),
            Err(CascadeError::Lifecycle { operation: "clear", .. })
        ));
        assert_eq!(task.state(), LifecycleState::Unconfigured);
        task.configure(&Configuration::new()).unwrap();
        assert!(matches!(
            task.execute(&mut ctx),
            Err(CascadeError::Lifecycle { operation: "execute", .. })
        ));
        assert!(matches!(
            task.finalize(&mut ctx),
            Err(CascadeError::Lifecycle { operation: "finalize", .. })
        ));
        // Clearing before the first initialize has nothing to release.
        task.clear(&mut ctx).unwrap();
        assert_eq!(task.state(), LifecycleState::Configured);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn configure_is_idempotent() {
        let log = new_log();
        let mut task = Tracer::task("A", &log);
        task.configure(&Configuration::new()).unwrap();
        task.configure(&Configuration::new()).unwrap();
        assert_eq!(task.state(), LifecycleState::Configured);
    }

    #[test]
    fn finalize_runs_exactly_once() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let mut task = ready(Tracer::task("A", &log), &mut ctx);
        task.finalize(&mut ctx).unwrap();
        task.finalize(&mut ctx).unwrap();
        task.clear(&mut ctx).unwrap();
        assert_eq!(entries(&log, "fin"), vec!["fin:A"]);
    }

    #[test]
    fn phases_visit_children_in_registration_order() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let root = Task::new("Root", Sequence)
            .with_child(Tracer::task("A", &log))
            .with_child(Tracer::task("B", &log));
        let mut root = ready(root, &mut ctx);
        root.execute(&mut ctx).unwrap();
        root.clear(&mut ctx).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["init:A", "init:B", "exec:A", "exec:B", "fin:A", "fin:B", "clear:A", "clear:B"]
        );
    }

    #[test]
    fn clear_is_bottom_up() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let root = Tracer::task("Root", &log)
            .with_child(Tracer::task("Mid", &log).with_child(Tracer::task("Leaf", &log)));
        let mut root = ready(root, &mut ctx);
        root.clear(&mut ctx).unwrap();
        assert_eq!(entries(&log, "fin"), vec!["fin:Leaf", "fin:Mid", "fin:Root"]);
        assert_eq!(entries(&log, "clear"), vec!["clear:Leaf", "clear:Mid", "clear:Root"]);
    }

    #[test]
    fn failing_child_stops_siblings() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let root = Task::new("Root", Sequence)
            .with_child(Tracer::failing("A", &log, || CascadeError::Other("bad input".into())))
            .with_child(Tracer::task("B", &log));
        let mut root = ready(root, &mut ctx);
        let status = root.execute(&mut ctx).unwrap();
        assert_eq!(status, Status::Error);
        assert_eq!(entries(&log, "exec"), vec!["exec:A"]);
        let incident = ctx.incident().unwrap();
        assert_eq!(incident.task, "A");
        assert_eq!(incident.kind, IncidentKind::Data);

        // B never ran but was started, so it is still finalized.
        root.clear(&mut ctx).unwrap();
        assert_eq!(entries(&log, "fin"), vec!["fin:A", "fin:B"]);
    }

    #[test]
    fn missing_event_filter_is_usage_error() {
        struct Selecting(EventSelection);
        impl TaskHandler for Selecting {
            fn handler_type(&self) -> &str {
                "selecting"
            }
            fn execute(&mut self, _: &mut RunContext, _: &mut Children<'_>) -> Result<Status> {
                Ok(Status::Ok)
            }
            fn selection_mut(&mut self) -> Option<&mut EventSelection> {
                Some(&mut self.0)
            }
        }

        let mut ctx = RunContext::in_memory();
        let mut task = Task::new("Spectra", Selecting(EventSelection::new(vec![], vec![])));
        task.configure(&Configuration::new()).unwrap();
        task.initialize(&mut ctx).unwrap();
        assert_eq!(ctx.status(), Status::Error);
        assert_eq!(ctx.incident().unwrap().kind, IncidentKind::Usage);
        assert_eq!(task.status(), Status::Error);
    }

    #[test]
    fn cleared_task_can_be_reinitialized() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let mut task = ready(Tracer::task("A", &log), &mut ctx);
        task.execute(&mut ctx).unwrap();
        task.clear(&mut ctx).unwrap();
        task.initialize(&mut ctx).unwrap();
        assert_eq!(task.executed(), 0);
        task.execute(&mut ctx).unwrap();
        task.clear(&mut ctx).unwrap();
        assert_eq!(entries(&log, "fin").len(), 2);
    }

    #[test]
    fn add_child_rejected_once_running() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let mut root = ready(Task::new("Root", Sequence), &mut ctx);
        assert!(root.add_child(Tracer::task("Late", &log)).is_err());
    }

    #[test]
    fn counters_track_executions() {
        let log = new_log();
        let mut ctx = RunContext::in_memory();
        let mut task = ready(Tracer::task("A", &log), &mut ctx);
        task.execute(&mut ctx).unwrap();
        task.execute(&mut ctx).unwrap();
        assert_eq!(task.executed(), 2);
        assert_eq!(task.accepted(), 2);
    }

    #[test]
    fn walk_visits_parent_first_with_depth() {
        let log = new_log();
        let root = Task::new("Root", Sequence)
            .with_child(Tracer::task("A", &log).with_child(Tracer::task("A1", &log)))
            .with_child(Tracer::task("B", &log));
        let mut seen = Vec::new();
        root.walk(&mut |t, depth| seen.push(format!("{}@{depth}", t.name())));
        assert_eq!(seen, vec!["Root@0", "A@1", "A1@2", "B@1"]);
    }
}
