//! Parallel Inference Manager (§4.5): a priority queue of inference tasks
//! dispatched to a fixed worker pool built on `std::thread` +
//! `crossbeam-channel` — §5 mandates a blocking, multi-threaded model, not a
//! cooperative runtime, so the pool uses OS threads and channel handoff
//! rather than futures.

use crate::ast::AstNode;
use crate::error::{SkicError, SkicResult};
use crate::prover::{ProofObject, Prover};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone)]
pub enum TaskResult {
    Success(ProofObject),
    Failure(String),
}

/// An inference job: a query plus the contexts to prove it against.
#[derive(Debug, Clone)]
pub struct InferenceTask {
    pub id: u64,
    pub query: AstNode,
    pub context_ids: Vec<String>,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
}

/// Queue ordering: higher priority first, then earliest `created_at` (§3).
/// `BinaryHeap` is a max-heap, so priority compares directly and the
/// creation instant is reversed (earlier instant ⇒ greater key).
#[derive(Debug, Clone)]
struct QueuedTask(InferenceTask);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.created_at == other.0.created_at
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
    }
}

/// Pure partitioning strategies over a sorted batch of tasks, selected once
/// at construction (§4.5). Grounded in the original source's
/// `RoundRobinStrategy`/`PriorityBasedStrategy`/`WorkStealingStrategy`
/// classes, translated into Rust's closed-enum-over-method idiom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    RoundRobin,
    PriorityBased,
    WorkStealing,
}

fn sorted_by_priority_then_age(mut tasks: Vec<InferenceTask>) -> Vec<InferenceTask> {
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.created_at.cmp(&b.created_at)));
    tasks
}

impl DispatchStrategy {
    pub fn distribute(&self, tasks: Vec<InferenceTask>, num_workers: usize) -> Vec<Vec<InferenceTask>> {
        let num_workers = num_workers.max(1);
        match self {
            DispatchStrategy::RoundRobin => {
                let mut out = vec![Vec::new(); num_workers];
                for (i, task) in tasks.into_iter().enumerate() {
                    out[i % num_workers].push(task);
                }
                out
            }
            DispatchStrategy::PriorityBased => {
                let sorted = sorted_by_priority_then_age(tasks);
                let mut out = vec![Vec::new(); num_workers];
                for task in sorted {
                    let (idx, _) = out
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, bucket): &(usize, &Vec<InferenceTask>)| bucket.len())
                        .expect("num_workers >= 1");
                    out[idx].push(task);
                }
                out
            }
            DispatchStrategy::WorkStealing => {
                let sorted = sorted_by_priority_then_age(tasks);
                let chunk_size = (sorted.len() / (2 * num_workers)).max(1);
                let mut out = vec![Vec::new(); num_workers];
                for (i, chunk) in sorted.chunks(chunk_size).enumerate() {
                    out[i % num_workers].extend_from_slice(chunk);
                }
                out
            }
        }
    }
}

struct TaskSlot {
    result: Mutex<Option<TaskResult>>,
    cond: Condvar,
}

impl TaskSlot {
    fn new() -> Arc<Self> {
        Arc::new(TaskSlot { result: Mutex::new(None), cond: Condvar::new() })
    }

    fn complete(&self, result: TaskResult) {
        let mut slot = self.result.lock();
        *slot = Some(result);
        self.cond.notify_all();
    }

    fn wait(&self) -> TaskResult {
        let mut slot = self.result.lock();
        while slot.is_none() {
            self.cond.wait(&mut slot);
        }
        slot.take().expect("just checked Some")
    }
}

struct WorkerJob {
    tasks: Vec<InferenceTask>,
    slots: HashMap<u64, Arc<TaskSlot>>,
}

/// Owns the worker pool, task queue, and bookkeeping tables (§4.5).
pub struct InferenceManager {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    active: Mutex<HashMap<u64, Arc<TaskSlot>>>,
    completed: Mutex<HashMap<u64, TaskResult>>,
    next_id: AtomicU64,
    senders: Mutex<Vec<Sender<WorkerJob>>>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
    num_workers: usize,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl InferenceManager {
    pub fn new(max_workers: usize, prover: Arc<dyn Prover>) -> Self {
        let max_workers = max_workers.max(1);
        let mut senders = Vec::with_capacity(max_workers);
        let mut handles = Vec::with_capacity(max_workers);
        for _ in 0..max_workers {
            let (tx, rx): (Sender<WorkerJob>, Receiver<WorkerJob>) = unbounded();
            let prover = prover.clone();
            let handle = std::thread::spawn(move || worker_loop(rx, prover));
            senders.push(tx);
            handles.push(handle);
        }
        InferenceManager {
            queue: Mutex::new(BinaryHeap::new()),
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            senders: Mutex::new(senders),
            handles: Mutex::new(handles),
            num_workers: max_workers,
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn submit(
        &self,
        query: AstNode,
        context_ids: Vec<String>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> SkicResult<u64> {
        if self.shutting_down.load(AtomicOrdering::Acquire) {
            return Err(SkicError::Disabled("inference manager is shutting down".to_string()));
        }
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let task = InferenceTask {
            id,
            query,
            context_ids,
            priority,
            timeout,
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
        };
        self.queue.lock().push(QueuedTask(task));
        Ok(id)
    }

    /// Drains up to `batch_size` tasks, applies `strategy`, and dispatches
    /// one job per worker (§4.5).
    pub fn process(&self, batch_size: usize, strategy: DispatchStrategy) {
        let mut drained = Vec::new();
        {
            let mut queue = self.queue.lock();
            for _ in 0..batch_size {
                match queue.pop() {
                    Some(QueuedTask(task)) => drained.push(task),
                    None => break,
                }
            }
        }
        if drained.is_empty() {
            return;
        }

        let mut slots = HashMap::new();
        {
            let mut active = self.active.lock();
            for task in &drained {
                let slot = TaskSlot::new();
                active.insert(task.id, slot.clone());
                slots.insert(task.id, slot);
            }
        }

        let batches = strategy.distribute(drained, self.num_workers);
        let senders = self.senders.lock();
        for (worker_idx, tasks) in batches.into_iter().enumerate() {
            if tasks.is_empty() {
                continue;
            }
            let job_slots: HashMap<u64, Arc<TaskSlot>> = tasks
                .iter()
                .filter_map(|t| slots.get(&t.id).map(|s| (t.id, s.clone())))
                .collect();
            if let Some(sender) = senders.get(worker_idx) {
                let _ = sender.send(WorkerJob { tasks, slots: job_slots });
            }
        }
    }

    /// Returns the result if already completed; if `wait`, blocks on the
    /// task's future until it completes; otherwise returns `None` for a task
    /// still pending or running.
    pub fn get_result(&self, id: u64, wait: bool) -> Option<TaskResult> {
        if let Some(result) = self.completed.lock().get(&id).cloned() {
            return Some(result);
        }
        let slot = self.active.lock().get(&id).cloned();
        match slot {
            Some(slot) if wait => {
                let result = slot.wait();
                self.active.lock().remove(&id);
                self.completed.lock().insert(id, result.clone());
                Some(result)
            }
            _ => None,
        }
    }

    /// Best-effort cancellation: effective only for queued tasks (§5).
    pub fn cancel(&self, id: u64) -> bool {
        let mut queue = self.queue.lock();
        let items: Vec<QueuedTask> = std::mem::take(&mut *queue).into_vec();
        let (keep, removed): (Vec<_>, Vec<_>) = items.into_iter().partition(|t| t.0.id != id);
        *queue = keep.into_iter().collect();
        if !removed.is_empty() {
            self.completed.lock().insert(id, TaskResult::Failure("cancelled".to_string()));
            return true;
        }
        false
    }

    pub fn status(&self, id: u64) -> TaskStatus {
        if self.completed.lock().contains_key(&id) {
            return match self.completed.lock().get(&id) {
                Some(TaskResult::Success(_)) => TaskStatus::Completed,
                Some(TaskResult::Failure(msg)) if msg == "cancelled" => TaskStatus::Cancelled,
                Some(TaskResult::Failure(_)) => TaskStatus::Failed,
                None => TaskStatus::Unknown,
            };
        }
        if self.active.lock().contains_key(&id) {
            return TaskStatus::Running;
        }
        if self.queue.lock().iter().any(|t| t.0.id == id) {
            return TaskStatus::Pending;
        }
        TaskStatus::Unknown
    }

    /// Submits every query, processes the whole batch against a single
    /// worker-sized draw, and blocks for each result — substituting a
    /// not-proven `ProofObject` for any failure (§4.5).
    pub fn batch_prove(
        &self,
        queries: Vec<AstNode>,
        context_ids: Vec<String>,
        strategy: DispatchStrategy,
    ) -> Vec<ProofObject> {
        let ids: Vec<u64> = queries
            .into_iter()
            .filter_map(|q| self.submit(q, context_ids.clone(), Priority::Medium, None).ok())
            .collect();
        self.process(ids.len(), strategy);
        ids.into_iter()
            .map(|id| match self.get_result(id, true) {
                Some(TaskResult::Success(proof)) => proof,
                _ => ProofObject::not_proven("inference task failed or was cancelled"),
            })
            .collect()
    }

    /// Prevents new submissions; drains in-flight tasks if `wait`, otherwise
    /// marks them cancelled without waiting (§4.5, §5).
    pub fn shutdown(&self, wait: bool) {
        self.shutting_down.store(true, AtomicOrdering::Release);
        let active_ids: Vec<u64> = self.active.lock().keys().copied().collect();
        if wait {
            for id in active_ids {
                self.get_result(id, true);
            }
        } else {
            let mut active = self.active.lock();
            let mut completed = self.completed.lock();
            for id in active_ids {
                active.remove(&id);
                completed.insert(id, TaskResult::Failure("cancelled by shutdown".to_string()));
            }
        }
        self.senders.lock().clear();
        for handle in std::mem::take(&mut *self.handles.lock()) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: Receiver<WorkerJob>, prover: Arc<dyn Prover>) {
    while let Ok(job) = rx.recv() {
        for mut task in job.tasks {
            task.started_at = Some(Instant::now());
            let proof = prover.prove(&task.query, &task.context_ids);
            let completed_at = Instant::now();
            task.completed_at = Some(completed_at);

            let timed_out = match (task.timeout, task.started_at) {
                (Some(limit), Some(started)) => completed_at.duration_since(started) > limit,
                _ => false,
            };

            let result = if timed_out {
                TaskResult::Failure("task timed out".to_string())
            } else {
                TaskResult::Success(proof)
            };

            if let Some(slot) = job.slots.get(&task.id) {
                slot.complete(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::ConstantBuilder;
    use crate::prover::LookupProver;

    fn dummy_query() -> AstNode {
        ConstantBuilder::new("Q", "Bool").build()
    }

    #[test]
    fn s5_priority_dispatch_single_worker() {
        let invocation_order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let order = invocation_order.clone();
        let prover = Arc::new(LookupProver::new(move |query: &AstNode, _ctx: &[String]| {
            if let AstNode::Constant { name, .. } = query {
                order.lock().push(name.clone());
            }
            true
        }));
        let manager = InferenceManager::new(1, prover);
        let ctx = vec!["T".to_string()];
        let a = manager
            .submit(ConstantBuilder::new("a", "Bool").build(), ctx.clone(), Priority::Low, None)
            .unwrap();
        let b = manager
            .submit(ConstantBuilder::new("b", "Bool").build(), ctx.clone(), Priority::High, None)
            .unwrap();
        let c = manager
            .submit(ConstantBuilder::new("c", "Bool").build(), ctx, Priority::Medium, None)
            .unwrap();
        manager.process(3, DispatchStrategy::PriorityBased);
        manager.get_result(a, true);
        manager.get_result(b, true);
        manager.get_result(c, true);
        assert_eq!(*invocation_order.lock(), vec!["b", "c", "a"]);
    }

    #[test]
    fn cancel_removes_queued_task() {
        let prover = Arc::new(LookupProver::new(|_: &AstNode, _: &[String]| true));
        let manager = InferenceManager::new(1, prover);
        let id = manager.submit(dummy_query(), vec!["T".to_string()], Priority::Low, None).unwrap();
        assert!(manager.cancel(id));
        assert_eq!(manager.status(id), TaskStatus::Cancelled);
    }

    #[test]
    fn batch_prove_never_raises_on_failure() {
        let prover = Arc::new(LookupProver::new(|_: &AstNode, _: &[String]| false));
        let manager = InferenceManager::new(2, prover);
        let results = manager.batch_prove(
            vec![dummy_query(), dummy_query()],
            vec!["T".to_string()],
            DispatchStrategy::RoundRobin,
        );
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|p| !p.is_proven));
    }
}
