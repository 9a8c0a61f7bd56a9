//! Resource-constrained DAG execution engine.
//!
//! Executes a set of tasks honoring task dependencies, per-resource
//! concurrency limits, and failure propagation. One supervisor task runs
//! the scheduling cycle; each dispatched command runs on its own blocking
//! worker. Workers report terminal transitions over a completion channel,
//! which is the supervisor's only wait primitive (receive or a 10 ms
//! timeout).
//!
//! The task graph is a flat table keyed by id with admission order kept
//! alongside, so ready tasks are always considered in the order they were
//! added.

use crate::command::Command;
use crate::result::EncodedResult;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// Supervisor polling quantum while waiting for completions.
const POLL_QUANTUM: Duration = Duration::from_millis(10);

/// Error type for graph construction and execution.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A task with the same id was already admitted.
    #[error("task {0} already exists")]
    DuplicateTask(String),

    /// A dependency id does not refer to an admitted task.
    #[error("task {task} depends on non-existent task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    /// The dependency graph contains a directed cycle.
    #[error("cycle detected in task dependencies")]
    CycleDetected,

    /// Execution was cancelled before all tasks finished.
    #[error("execution cancelled")]
    Cancelled,

    /// `execute` was called a second time on the same instance.
    #[error("execute may only be called once per orchestrator")]
    AlreadyExecuted,
}

/// Symbolic name for a class of host capability with a concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceTag {
    /// CPU processing (parallel).
    Cpu,
    /// GPU encoder block (typically sequential).
    GpuEncode,
    /// GPU scaling (parallel).
    GpuScale,
    /// File I/O.
    Io,
}

impl ResourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceTag::Cpu => "cpu",
            ResourceTag::GpuEncode => "gpu-encode",
            ResourceTag::GpuScale => "gpu-scale",
            ResourceTag::Io => "io",
        }
    }
}

impl std::fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concurrency limit for one resource tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceConstraint {
    pub tag: ResourceTag,
    pub max_slots: usize,
}

impl ResourceConstraint {
    pub fn new(tag: ResourceTag, max_slots: usize) -> Self {
        Self { tag, max_slots }
    }
}

/// Scheduling state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Admitted, dependencies not yet satisfied.
    Pending,
    /// Dependencies met, waiting for a resource slot.
    Ready,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A unit of work in the graph: a command plus dependency metadata.
pub struct Task {
    id: String,
    command: Option<Box<dyn Command>>,
    dependencies: Vec<String>,
    resource: ResourceTag,
    chunk_id: u32,
    status: TaskStatus,
    error: Option<String>,
    result: Option<EncodedResult>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl Task {
    pub fn new(id: impl Into<String>, command: Box<dyn Command>, resource: ResourceTag) -> Self {
        Self {
            id: id.into(),
            command: Some(command),
            dependencies: Vec::new(),
            resource,
            chunk_id: 0,
            status: TaskStatus::Pending,
            error: None,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Declares the tasks that must complete before this one starts.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Associates the task with a plan chunk for result reporting.
    pub fn for_chunk(mut self, chunk_id: u32) -> Self {
        self.chunk_id = chunk_id;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&EncodedResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }
}

/// Histogram of task statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrchestratorStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Per-resource slot accounting behind one dedicated mutex.
struct SlotTable {
    constraints: HashMap<ResourceTag, usize>,
    active: Mutex<HashMap<ResourceTag, usize>>,
}

impl SlotTable {
    fn new(constraints: &[ResourceConstraint]) -> Self {
        Self {
            constraints: constraints.iter().map(|c| (c.tag, c.max_slots)).collect(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to take one slot for `tag`; unconstrained tags always
    /// succeed without accounting.
    fn try_acquire(&self, tag: ResourceTag) -> bool {
        let Some(&max_slots) = self.constraints.get(&tag) else {
            return true;
        };

        let mut active = self.active.lock().unwrap();
        let count = active.entry(tag).or_insert(0);
        if *count < max_slots {
            *count += 1;
            true
        } else {
            false
        }
    }

    /// Returns one slot for `tag`; the count never goes below zero.
    fn release(&self, tag: ResourceTag) {
        let mut active = self.active.lock().unwrap();
        if let Some(count) = active.get_mut(&tag) {
            if *count > 0 {
                *count -= 1;
            }
        }
    }

    #[cfg(test)]
    fn active(&self, tag: ResourceTag) -> usize {
        *self.active.lock().unwrap().get(&tag).unwrap_or(&0)
    }
}

/// The flat task table plus admission order.
struct TaskGraph {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl TaskGraph {
    fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        })
    }

    /// True when any direct or transitive dependency has failed.
    fn has_failed_dependency(&self, task: &Task) -> bool {
        task.dependencies.iter().any(|dep| {
            self.tasks.get(dep).is_some_and(|t| {
                t.status == TaskStatus::Failed || self.has_failed_dependency(t)
            })
        })
    }
}

type ProgressCallback = Box<dyn FnMut(usize, usize, &Task) + Send>;

/// Executes tasks with dependency ordering and per-resource slot limits.
pub struct DagOrchestrator {
    graph: Arc<Mutex<TaskGraph>>,
    slots: Arc<SlotTable>,
    on_progress: Option<ProgressCallback>,
    cancel: Arc<AtomicBool>,
    executed: bool,
}

impl DagOrchestrator {
    pub fn new(constraints: &[ResourceConstraint]) -> Self {
        Self {
            graph: Arc::new(Mutex::new(TaskGraph {
                tasks: HashMap::new(),
                order: Vec::new(),
            })),
            slots: Arc::new(SlotTable::new(constraints)),
            on_progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
            executed: false,
        }
    }

    /// Registers the single progress callback, invoked on every terminal
    /// transition with (completed_count, total_count, task). It runs on
    /// the supervisor and must not block.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(usize, usize, &Task) + Send + 'static,
    {
        self.on_progress = Some(Box::new(callback));
    }

    /// Shares a cancellation flag with the driver. Once set, the
    /// supervisor stops admitting dispatches, drains in-flight workers,
    /// and returns [`OrchestratorError::Cancelled`].
    pub fn set_cancel_flag(&mut self, cancel: Arc<AtomicBool>) {
        self.cancel = cancel;
    }

    /// Admits a task to the graph.
    pub fn add_task(&self, task: Task) -> Result<(), OrchestratorError> {
        let mut graph = self.graph.lock().unwrap();
        if graph.tasks.contains_key(&task.id) {
            return Err(OrchestratorError::DuplicateTask(task.id));
        }
        graph.order.push(task.id.clone());
        graph.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Current status of a task, if admitted.
    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.graph.lock().unwrap().tasks.get(id).map(|t| t.status)
    }

    /// Snapshot histogram over task statuses.
    pub fn stats(&self) -> OrchestratorStats {
        let graph = self.graph.lock().unwrap();
        let mut stats = OrchestratorStats {
            total: graph.tasks.len(),
            ..OrchestratorStats::default()
        };
        for task in graph.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Ready => stats.ready += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Runs all admitted tasks to a terminal state.
    ///
    /// Returns the results in completion order. Graph validation happens
    /// before any dispatch; a validation failure aborts the whole call
    /// with no task run.
    pub async fn execute(&mut self) -> Result<Vec<EncodedResult>, OrchestratorError> {
        if self.executed {
            return Err(OrchestratorError::AlreadyExecuted);
        }
        self.executed = true;

        self.validate()?;

        let total = self.graph.lock().unwrap().tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut completed = 0usize;
        let mut results = Vec::with_capacity(total);

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                if self.running_count() == 0 {
                    return Err(OrchestratorError::Cancelled);
                }
            } else {
                for id in self.mark_dependency_failures() {
                    let _ = tx.send(id);
                }
                self.dispatch_ready(&tx);
            }

            match tokio::time::timeout(POLL_QUANTUM, rx.recv()).await {
                Ok(Some(id)) => {
                    completed += 1;
                    self.handle_completion(&id, completed, total, &mut results);
                    if completed == total {
                        return Ok(results);
                    }
                }
                Ok(None) => unreachable!("supervisor holds a sender"),
                Err(_) => {} // poll timeout, run another cycle
            }
        }
    }

    /// Reference check and DFS cycle detection over the admitted graph.
    fn validate(&self) -> Result<(), OrchestratorError> {
        let graph = self.graph.lock().unwrap();

        for id in &graph.order {
            let task = &graph.tasks[id];
            for dep in &task.dependencies {
                if !graph.tasks.contains_key(dep) {
                    return Err(OrchestratorError::UnknownDependency {
                        task: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        fn has_cycle(
            tasks: &HashMap<String, Task>,
            id: &str,
            visited: &mut HashSet<String>,
            on_stack: &mut HashSet<String>,
        ) -> bool {
            visited.insert(id.to_string());
            on_stack.insert(id.to_string());

            for dep in &tasks[id].dependencies {
                if !visited.contains(dep) {
                    if has_cycle(tasks, dep, visited, on_stack) {
                        return true;
                    }
                } else if on_stack.contains(dep) {
                    return true;
                }
            }

            on_stack.remove(id);
            false
        }

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        for id in &graph.order {
            if !visited.contains(id)
                && has_cycle(&graph.tasks, id, &mut visited, &mut on_stack)
            {
                return Err(OrchestratorError::CycleDetected);
            }
        }

        Ok(())
    }

    /// Fails every Pending or Ready task whose transitive ancestors
    /// include a Failed task; returns the ids to report on the
    /// completion channel.
    fn mark_dependency_failures(&self) -> Vec<String> {
        let mut graph = self.graph.lock().unwrap();
        let mut newly_failed = Vec::new();

        let order = graph.order.clone();
        for id in order {
            let blocked = {
                let task = &graph.tasks[&id];
                matches!(task.status, TaskStatus::Pending | TaskStatus::Ready)
                    && graph.has_failed_dependency(task)
            };
            if blocked {
                let chunk_id = graph.tasks[&id].chunk_id;
                let task = graph.tasks.get_mut(&id).unwrap();
                task.status = TaskStatus::Failed;
                task.error = Some("dependency failed".to_string());
                task.result = Some(EncodedResult::failure(chunk_id, "dependency failed"));
                newly_failed.push(id);
            }
        }

        newly_failed
    }

    /// Promotes Pending tasks with satisfied dependencies to Ready and
    /// dispatches every Ready task that wins a resource slot, in
    /// admission order.
    fn dispatch_ready(&self, tx: &mpsc::UnboundedSender<String>) {
        let mut graph = self.graph.lock().unwrap();

        let order = graph.order.clone();
        for id in order {
            let (status, deps_met) = {
                let task = &graph.tasks[&id];
                (task.status, graph.dependencies_met(task))
            };
            let ready = match status {
                TaskStatus::Pending if deps_met => {
                    graph.tasks.get_mut(&id).unwrap().status = TaskStatus::Ready;
                    true
                }
                TaskStatus::Ready => true,
                _ => false,
            };
            if !ready {
                continue;
            }

            let resource = graph.tasks[&id].resource;
            if !self.slots.try_acquire(resource) {
                continue; // stays Ready, retried next cycle
            }

            let task = graph.tasks.get_mut(&id).unwrap();
            task.status = TaskStatus::Running;
            task.started_at = Some(Instant::now());
            let command = task
                .command
                .take()
                .expect("command present until first dispatch");
            let chunk_id = task.chunk_id;
            let output_path = command.output_path().to_path_buf();

            self.spawn_worker(id, command, resource, chunk_id, output_path, tx.clone());
        }
    }

    fn spawn_worker(
        &self,
        id: String,
        command: Box<dyn Command>,
        resource: ResourceTag,
        chunk_id: u32,
        output_path: std::path::PathBuf,
        tx: mpsc::UnboundedSender<String>,
    ) {
        let graph = Arc::clone(&self.graph);
        let slots = Arc::clone(&self.slots);

        tokio::spawn(async move {
            let run_result = tokio::task::spawn_blocking(move || command.run()).await;
            let outcome: Result<(), String> = match run_result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join_err) => Err(format!("worker panicked: {}", join_err)),
            };

            {
                let mut graph = graph.lock().unwrap();
                if let Some(task) = graph.tasks.get_mut(&id) {
                    task.finished_at = Some(Instant::now());
                    match &outcome {
                        Ok(()) => {
                            task.status = TaskStatus::Completed;
                            task.result = Some(EncodedResult::success(
                                chunk_id,
                                output_path.clone(),
                            ));
                        }
                        Err(error) => {
                            task.status = TaskStatus::Failed;
                            task.error = Some(error.clone());
                            task.result =
                                Some(EncodedResult::failure(chunk_id, error.clone()));
                        }
                    }
                }
            }

            slots.release(resource);
            let _ = tx.send(id);
        });
    }

    /// Records a terminal transition: collects the result and invokes
    /// the progress callback.
    fn handle_completion(
        &mut self,
        id: &str,
        completed: usize,
        total: usize,
        results: &mut Vec<EncodedResult>,
    ) {
        let graph = Arc::clone(&self.graph);
        let graph = graph.lock().unwrap();
        if let Some(task) = graph.tasks.get(id) {
            if let Some(result) = &task.result {
                results.push(result.clone());
            }
            if let Some(callback) = self.on_progress.as_mut() {
                callback(completed, total, task);
            }
        }
    }

    fn running_count(&self) -> usize {
        self.graph
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandError, TaskType};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;

    /// Test command that simulates work and records execution.
    struct MockCommand {
        output_path: PathBuf,
        duration: Duration,
        should_fail: bool,
        executed: Arc<AtomicBool>,
    }

    impl MockCommand {
        fn quick(output: &str) -> Self {
            Self::sleeping(output, Duration::from_millis(10))
        }

        fn sleeping(output: &str, duration: Duration) -> Self {
            Self {
                output_path: PathBuf::from(output),
                duration,
                should_fail: false,
                executed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing(output: &str) -> Self {
            Self {
                should_fail: true,
                ..Self::quick(output)
            }
        }

        fn executed_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.executed)
        }
    }

    impl Command for MockCommand {
        fn build_args(&self) -> Vec<String> {
            vec!["-i".into(), "input.mkv".into(), self.output_path.display().to_string()]
        }

        fn run(&self) -> Result<(), CommandError> {
            std::thread::sleep(self.duration);
            self.executed.store(true, Ordering::SeqCst);
            if self.should_fail {
                Err(CommandError::SubprocessFailed {
                    code: 1,
                    tail: "mock command failed".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn dry_run(&self) -> String {
            format!("ffmpeg mock {}", self.output_path.display())
        }

        fn priority(&self) -> i32 {
            crate::command::PRIORITY_NORMAL
        }

        fn task_type(&self) -> TaskType {
            TaskType::VideoEncode
        }

        fn input_path(&self) -> &Path {
            Path::new("input.mkv")
        }

        fn output_path(&self) -> &Path {
            &self.output_path
        }
    }

    /// Command that tracks how many instances run at once.
    struct GaugedCommand {
        output_path: PathBuf,
        duration: Duration,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Command for GaugedCommand {
        fn build_args(&self) -> Vec<String> {
            Vec::new()
        }

        fn run(&self) -> Result<(), CommandError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.duration);
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn dry_run(&self) -> String {
            String::new()
        }

        fn priority(&self) -> i32 {
            crate::command::PRIORITY_NORMAL
        }

        fn task_type(&self) -> TaskType {
            TaskType::VideoEncode
        }

        fn input_path(&self) -> &Path {
            Path::new("input.mkv")
        }

        fn output_path(&self) -> &Path {
            &self.output_path
        }
    }

    fn cpu_slots(n: usize) -> Vec<ResourceConstraint> {
        vec![ResourceConstraint::new(ResourceTag::Cpu, n)]
    }

    fn timing(orch: &DagOrchestrator, id: &str) -> (Instant, Instant) {
        let graph = orch.graph.lock().unwrap();
        let task = &graph.tasks[id];
        (task.started_at.unwrap(), task.finished_at.unwrap())
    }

    #[tokio::test]
    async fn test_linear_chain_runs_in_dependency_order() {
        let mut orch = DagOrchestrator::new(&cpu_slots(2));

        orch.add_task(Task::new("A", Box::new(MockCommand::quick("/tmp/a.mkv")), ResourceTag::Cpu))
            .unwrap();
        orch.add_task(
            Task::new("B", Box::new(MockCommand::quick("/tmp/b.mkv")), ResourceTag::Cpu)
                .depends_on(["A"]),
        )
        .unwrap();
        orch.add_task(
            Task::new("C", Box::new(MockCommand::quick("/tmp/c.mkv")), ResourceTag::Cpu)
                .depends_on(["B"]),
        )
        .unwrap();

        let results = orch.execute().await.unwrap();
        assert_eq!(results.len(), 3);

        let (a_start, a_end) = timing(&orch, "A");
        let (b_start, b_end) = timing(&orch, "B");
        let (c_start, _) = timing(&orch, "C");

        assert!(b_start >= a_end, "B must start after A completes");
        assert!(c_start >= b_end, "C must start after B completes");
        assert!(a_start <= a_end);
    }

    #[tokio::test]
    async fn test_independent_tasks_run_in_parallel() {
        let mut orch = DagOrchestrator::new(&cpu_slots(3));

        for name in ["A", "B", "C"] {
            orch.add_task(Task::new(
                name,
                Box::new(MockCommand::sleeping(
                    &format!("/tmp/{}.mkv", name),
                    Duration::from_millis(50),
                )),
                ResourceTag::Cpu,
            ))
            .unwrap();
        }

        let start = Instant::now();
        let results = orch.execute().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 3);
        // Parallel: ~50 ms. Sequential would be ~150 ms.
        assert!(
            elapsed < Duration::from_millis(120),
            "independent tasks should overlap, took {:?}",
            elapsed
        );

        let (a_start, _) = timing(&orch, "A");
        let (c_start, _) = timing(&orch, "C");
        let spread = if c_start > a_start {
            c_start - a_start
        } else {
            a_start - c_start
        };
        assert!(
            spread < Duration::from_millis(20),
            "starts should be near-simultaneous, spread {:?}",
            spread
        );
    }

    #[tokio::test]
    async fn test_single_slot_serializes_tasks() {
        let mut orch =
            DagOrchestrator::new(&[ResourceConstraint::new(ResourceTag::GpuEncode, 1)]);

        for name in ["A", "B", "C"] {
            orch.add_task(Task::new(
                name,
                Box::new(MockCommand::sleeping(
                    &format!("/tmp/{}.mkv", name),
                    Duration::from_millis(30),
                )),
                ResourceTag::GpuEncode,
            ))
            .unwrap();
        }

        let start = Instant::now();
        let results = orch.execute().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 3);
        assert!(
            elapsed >= Duration::from_millis(80),
            "single slot should serialize, took {:?}",
            elapsed
        );

        // No two intervals overlap
        let mut intervals: Vec<(Instant, Instant)> = ["A", "B", "C"]
            .iter()
            .map(|id| timing(&orch, id))
            .collect();
        intervals.sort_by_key(|(start, _)| *start);
        for pair in intervals.windows(2) {
            assert!(
                pair[1].0 >= pair[0].1,
                "gpu-encode intervals must not overlap"
            );
        }
    }

    #[tokio::test]
    async fn test_pipelined_groups_with_mixed_resources() {
        let mut orch = DagOrchestrator::new(&[
            ResourceConstraint::new(ResourceTag::GpuScale, 3),
            ResourceConstraint::new(ResourceTag::Cpu, 3),
            ResourceConstraint::new(ResourceTag::GpuEncode, 1),
        ]);

        for i in 0..3 {
            orch.add_task(Task::new(
                format!("scale-{}", i),
                Box::new(MockCommand::sleeping(
                    &format!("/tmp/scaled-{}.yuv", i),
                    Duration::from_millis(20),
                )),
                ResourceTag::GpuScale,
            ))
            .unwrap();
        }
        for i in 0..3 {
            orch.add_task(
                Task::new(
                    format!("filter-{}", i),
                    Box::new(MockCommand::sleeping(
                        &format!("/tmp/filtered-{}.yuv", i),
                        Duration::from_millis(20),
                    )),
                    ResourceTag::Cpu,
                )
                .depends_on([format!("scale-{}", i)]),
            )
            .unwrap();
        }
        for i in 0..3 {
            orch.add_task(
                Task::new(
                    format!("encode-{}", i),
                    Box::new(MockCommand::sleeping(
                        &format!("/tmp/encoded-{}.mkv", i),
                        Duration::from_millis(30),
                    )),
                    ResourceTag::GpuEncode,
                )
                .depends_on([format!("filter-{}", i)]),
            )
            .unwrap();
        }

        let start = Instant::now();
        let results = orch.execute().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 9);
        // Scale 20 ms + filter 20 ms + three serialized 30 ms encodes
        assert!(
            elapsed >= Duration::from_millis(110) && elapsed <= Duration::from_millis(300),
            "expected pipelined total around 130 ms, got {:?}",
            elapsed
        );

        let mut encode_intervals: Vec<(Instant, Instant)> = (0..3)
            .map(|i| timing(&orch, &format!("encode-{}", i)))
            .collect();
        encode_intervals.sort_by_key(|(start, _)| *start);
        for pair in encode_intervals.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "encodes must be pairwise disjoint");
        }
    }

    #[tokio::test]
    async fn test_cycle_detected_before_any_dispatch() {
        let mut orch = DagOrchestrator::new(&cpu_slots(2));

        let a = MockCommand::quick("/tmp/a.mkv");
        let b = MockCommand::quick("/tmp/b.mkv");
        let c = MockCommand::quick("/tmp/c.mkv");
        let flags = [a.executed_flag(), b.executed_flag(), c.executed_flag()];

        orch.add_task(Task::new("A", Box::new(a), ResourceTag::Cpu).depends_on(["C"]))
            .unwrap();
        orch.add_task(Task::new("B", Box::new(b), ResourceTag::Cpu).depends_on(["A"]))
            .unwrap();
        orch.add_task(Task::new("C", Box::new(c), ResourceTag::Cpu).depends_on(["B"]))
            .unwrap();

        let err = orch.execute().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CycleDetected));

        for flag in flags {
            assert!(!flag.load(Ordering::SeqCst), "no command may run on a cyclic graph");
        }
    }

    #[tokio::test]
    async fn test_unknown_dependency_rejected() {
        let mut orch = DagOrchestrator::new(&cpu_slots(1));
        orch.add_task(
            Task::new("A", Box::new(MockCommand::quick("/tmp/a.mkv")), ResourceTag::Cpu)
                .depends_on(["ghost"]),
        )
        .unwrap();

        let err = orch.execute().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::UnknownDependency { .. }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_task_rejected() {
        let orch = DagOrchestrator::new(&cpu_slots(1));
        orch.add_task(Task::new("A", Box::new(MockCommand::quick("/tmp/a.mkv")), ResourceTag::Cpu))
            .unwrap();

        let err = orch
            .add_task(Task::new("A", Box::new(MockCommand::quick("/tmp/a2.mkv")), ResourceTag::Cpu))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateTask(id) if id == "A"));
    }

    #[tokio::test]
    async fn test_failure_propagates_to_descendants() {
        let mut orch = DagOrchestrator::new(&cpu_slots(2));

        let c = MockCommand::quick("/tmp/c.mkv");
        let c_executed = c.executed_flag();

        orch.add_task(Task::new("A", Box::new(MockCommand::quick("/tmp/a.mkv")), ResourceTag::Cpu))
            .unwrap();
        orch.add_task(
            Task::new("B", Box::new(MockCommand::failing("/tmp/b.mkv")), ResourceTag::Cpu)
                .depends_on(["A"]),
        )
        .unwrap();
        orch.add_task(Task::new("C", Box::new(c), ResourceTag::Cpu).depends_on(["B"]))
            .unwrap();

        let results = orch.execute().await.unwrap();

        assert_eq!(orch.status("A"), Some(TaskStatus::Completed));
        assert_eq!(orch.status("B"), Some(TaskStatus::Failed));
        assert_eq!(orch.status("C"), Some(TaskStatus::Failed));
        assert!(
            !c_executed.load(Ordering::SeqCst),
            "C's command must never be invoked"
        );

        assert_eq!(results.len(), 3);
        let b_result = {
            let graph = orch.graph.lock().unwrap();
            graph.tasks["B"].result.clone().unwrap()
        };
        assert!(!b_result.success);
        assert!(b_result.error.as_deref().unwrap().contains("mock command failed"));

        let c_result = {
            let graph = orch.graph.lock().unwrap();
            graph.tasks["C"].result.clone().unwrap()
        };
        assert!(!c_result.success);
        assert_eq!(c_result.error.as_deref(), Some("dependency failed"));
        assert!(c_result.validate().is_ok());
    }

    #[tokio::test]
    async fn test_transitive_failure_propagation() {
        // D depends on C depends on failing B; both descendants fail
        let mut orch = DagOrchestrator::new(&cpu_slots(2));

        orch.add_task(Task::new("B", Box::new(MockCommand::failing("/tmp/b.mkv")), ResourceTag::Cpu))
            .unwrap();
        orch.add_task(
            Task::new("C", Box::new(MockCommand::quick("/tmp/c.mkv")), ResourceTag::Cpu)
                .depends_on(["B"]),
        )
        .unwrap();
        orch.add_task(
            Task::new("D", Box::new(MockCommand::quick("/tmp/d.mkv")), ResourceTag::Cpu)
                .depends_on(["C"]),
        )
        .unwrap();

        orch.execute().await.unwrap();

        assert_eq!(orch.status("C"), Some(TaskStatus::Failed));
        assert_eq!(orch.status("D"), Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_progress_callback_completion_order() {
        let mut orch = DagOrchestrator::new(&cpu_slots(2));

        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        orch.set_progress_callback(move |completed, total, task| {
            sink.lock()
                .unwrap()
                .push((completed, total, task.id().to_string()));
        });

        for i in 0..3 {
            orch.add_task(Task::new(
                format!("task-{}", i),
                Box::new(MockCommand::quick(&format!("/tmp/{}.mkv", i))),
                ResourceTag::Cpu,
            ))
            .unwrap();
        }

        orch.execute().await.unwrap();

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 3);
        for (i, (completed, total, _)) in updates.iter().enumerate() {
            assert_eq!(*completed, i + 1);
            assert_eq!(*total, 3);
        }
    }

    #[tokio::test]
    async fn test_dependency_failed_tasks_reach_callback() {
        let mut orch = DagOrchestrator::new(&cpu_slots(1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        orch.set_progress_callback(move |_, _, task| {
            sink.lock().unwrap().push(task.id().to_string());
        });

        orch.add_task(Task::new("A", Box::new(MockCommand::failing("/tmp/a.mkv")), ResourceTag::Cpu))
            .unwrap();
        orch.add_task(
            Task::new("B", Box::new(MockCommand::quick("/tmp/b.mkv")), ResourceTag::Cpu)
                .depends_on(["A"]),
        )
        .unwrap();

        orch.execute().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&"B".to_string()));
    }

    #[tokio::test]
    async fn test_empty_graph_terminates_immediately() {
        let mut orch = DagOrchestrator::new(&cpu_slots(1));
        let results = orch.execute().await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_execute_is_single_use() {
        let mut orch = DagOrchestrator::new(&cpu_slots(1));
        orch.execute().await.unwrap();
        assert!(matches!(
            orch.execute().await,
            Err(OrchestratorError::AlreadyExecuted)
        ));
    }

    #[tokio::test]
    async fn test_results_in_completion_order_not_admission_order() {
        let mut orch = DagOrchestrator::new(&cpu_slots(2));

        // "slow" admitted first but finishes last
        orch.add_task(
            Task::new(
                "slow",
                Box::new(MockCommand::sleeping("/tmp/slow.mkv", Duration::from_millis(80))),
                ResourceTag::Cpu,
            )
            .for_chunk(1),
        )
        .unwrap();
        orch.add_task(
            Task::new("fast", Box::new(MockCommand::quick("/tmp/fast.mkv")), ResourceTag::Cpu)
                .for_chunk(2),
        )
        .unwrap();

        let results = orch.execute().await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, 2);
        assert_eq!(results[1].chunk_id, 1);
    }

    #[tokio::test]
    async fn test_slot_limit_never_exceeded() {
        let mut orch = DagOrchestrator::new(&cpu_slots(3));

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            orch.add_task(Task::new(
                format!("task-{}", i),
                Box::new(GaugedCommand {
                    output_path: PathBuf::from(format!("/tmp/{}.mkv", i)),
                    duration: Duration::from_millis(15),
                    current: Arc::clone(&current),
                    peak: Arc::clone(&peak),
                }),
                ResourceTag::Cpu,
            ))
            .unwrap();
        }

        orch.execute().await.unwrap();

        assert!(
            peak.load(Ordering::SeqCst) <= 3,
            "running tasks exceeded the configured slot count: {}",
            peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_unconstrained_tag_runs_freely() {
        // Io has no constraint configured: everything dispatches at once
        let mut orch = DagOrchestrator::new(&cpu_slots(1));

        for i in 0..4 {
            orch.add_task(Task::new(
                format!("io-{}", i),
                Box::new(MockCommand::sleeping(
                    &format!("/tmp/{}.bin", i),
                    Duration::from_millis(40),
                )),
                ResourceTag::Io,
            ))
            .unwrap();
        }

        let start = Instant::now();
        orch.execute().await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_dispatches() {
        let mut orch = DagOrchestrator::new(&cpu_slots(1));
        let cancel = Arc::new(AtomicBool::new(false));
        orch.set_cancel_flag(Arc::clone(&cancel));

        let blocked = MockCommand::quick("/tmp/b.mkv");
        let blocked_flag = blocked.executed_flag();

        orch.add_task(Task::new(
            "running",
            Box::new(MockCommand::sleeping("/tmp/a.mkv", Duration::from_millis(60))),
            ResourceTag::Cpu,
        ))
        .unwrap();
        orch.add_task(Task::new("queued", Box::new(blocked), ResourceTag::Cpu).depends_on(["running"]))
            .unwrap();

        // Cancel while the first task is still running
        let cancel_trigger = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_trigger.store(true, Ordering::SeqCst);
        });

        let err = orch.execute().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
        assert!(
            !blocked_flag.load(Ordering::SeqCst),
            "no new dispatch after cancellation"
        );
        // The in-flight worker was drained, not abandoned
        assert_eq!(orch.status("running"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_status_and_stats_snapshots() {
        let orch = DagOrchestrator::new(&cpu_slots(1));

        orch.add_task(Task::new("A", Box::new(MockCommand::quick("/tmp/a.mkv")), ResourceTag::Cpu))
            .unwrap();
        orch.add_task(Task::new("B", Box::new(MockCommand::quick("/tmp/b.mkv")), ResourceTag::Cpu))
            .unwrap();

        assert_eq!(orch.status("A"), Some(TaskStatus::Pending));
        assert_eq!(orch.status("missing"), None);

        {
            let mut graph = orch.graph.lock().unwrap();
            graph.tasks.get_mut("A").unwrap().status = TaskStatus::Completed;
            graph.tasks.get_mut("B").unwrap().status = TaskStatus::Running;
        }

        let stats = orch.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_slot_table_accounting() {
        let slots = SlotTable::new(&[ResourceConstraint::new(ResourceTag::GpuEncode, 2)]);

        assert!(slots.try_acquire(ResourceTag::GpuEncode));
        assert!(slots.try_acquire(ResourceTag::GpuEncode));
        assert!(!slots.try_acquire(ResourceTag::GpuEncode));
        assert_eq!(slots.active(ResourceTag::GpuEncode), 2);

        slots.release(ResourceTag::GpuEncode);
        assert_eq!(slots.active(ResourceTag::GpuEncode), 1);
        assert!(slots.try_acquire(ResourceTag::GpuEncode));
    }

    #[test]
    fn test_slot_release_clamps_at_zero() {
        let slots = SlotTable::new(&[ResourceConstraint::new(ResourceTag::Cpu, 1)]);

        slots.release(ResourceTag::Cpu);
        slots.release(ResourceTag::Cpu);
        assert_eq!(slots.active(ResourceTag::Cpu), 0);

        // The sequence above must not have manufactured capacity debt
        assert!(slots.try_acquire(ResourceTag::Cpu));
        assert!(!slots.try_acquire(ResourceTag::Cpu));
    }

    #[test]
    fn test_unconstrained_tag_acquisition_always_succeeds() {
        let slots = SlotTable::new(&[ResourceConstraint::new(ResourceTag::Cpu, 1)]);

        for _ in 0..10 {
            assert!(slots.try_acquire(ResourceTag::Io));
        }
        assert_eq!(slots.active(ResourceTag::Io), 0);
    }

    #[test]
    fn test_resource_tag_strings() {
        assert_eq!(ResourceTag::Cpu.as_str(), "cpu");
        assert_eq!(ResourceTag::GpuEncode.as_str(), "gpu-encode");
        assert_eq!(ResourceTag::GpuScale.as_str(), "gpu-scale");
        assert_eq!(ResourceTag::Io.as_str(), "io");
    }

    #[test]
    fn test_task_status_terminality() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Ready.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
