//! Process pool scheduler.
//!
//! The pool owns every runnable it creates and moves each one through
//! exactly one path: queued, in progress, then finished, failed or timed out.
//!
//! Completions arrive as [`ProcessEvent`]s posted by per-child collector
//! threads onto a single channel. [`Pool::wait`] is the only consumer, so
//! state transitions run one at a time and an event for a runnable that is
//! no longer in progress is simply ignored.

use crate::config::PoolConfig;
use crate::error::{PoolError, Result, RunnableId};
use crate::process::{ProcessEvent, Runnable};
use crate::protocol::Job;
use crate::runtime::ParentRuntime;
use crate::status::PoolStatus;
use crate::task::{Task, TaskRegistry};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Bounded-concurrency pool of runnables.
#[derive(Debug)]
pub struct Pool {
    config: PoolConfig,
    runtime: ParentRuntime,
    next_id: RunnableId,
    events_tx: Sender<ProcessEvent>,
    events_rx: Receiver<ProcessEvent>,
    queue: VecDeque<Runnable>,
    in_progress: HashMap<RunnableId, Runnable>,
    finished: Vec<Runnable>,
    failed: Vec<Runnable>,
    timeouts: Vec<Runnable>,
    results: Vec<Value>,
    stopped: bool,
}

impl Pool {
    /// Create a pool running tasks from `registry`.
    ///
    /// The child processes must be able to run the same registry, see
    /// [`run_if_child`](crate::runtime::run_if_child).
    pub fn new(config: PoolConfig, registry: impl Into<Arc<TaskRegistry>>) -> Result<Self> {
        config.validate()?;
        let runtime = ParentRuntime::new(&config, registry.into())?;
        let (events_tx, events_rx) = unbounded();

        Ok(Self {
            config,
            runtime,
            next_id: 1,
            events_tx,
            events_rx,
            queue: VecDeque::new(),
            in_progress: HashMap::new(),
            finished: Vec::new(),
            failed: Vec::new(),
            timeouts: Vec::new(),
            results: Vec::new(),
            stopped: false,
        })
    }

    /// Submit a job with the default output limit.
    ///
    /// Returns the runnable so callbacks can be chained onto it. It may
    /// already have started, but callbacks only fire from [`wait`](Self::wait).
    pub fn add(&mut self, job: Job) -> Result<&mut Runnable> {
        self.submit(job, None)
    }

    /// Submit a job whose encoded output may be at most `max_output_bytes` long.
    pub fn add_with_limit(&mut self, job: Job, max_output_bytes: usize) -> Result<&mut Runnable> {
        self.submit(job, Some(max_output_bytes))
    }

    /// Submit a task value.
    pub fn add_task<T: Task>(&mut self, task: &T) -> Result<&mut Runnable> {
        self.submit(Job::task(task)?, None)
    }

    fn submit(&mut self, job: Job, max_output_bytes: Option<usize>) -> Result<&mut Runnable> {
        let id = self.next_id;
        let runnable = self.runtime.create_process(job, id, max_output_bytes)?;
        self.next_id += 1;

        trace!(id, queued = self.queue.len() + 1, "Queued runnable");
        self.queue.push_back(runnable);
        self.notify();
        self.pending_mut(id)
    }

    /// Admit the head of the queue if there is capacity.
    pub fn notify(&mut self) {
        if self.stopped || self.in_progress.len() >= self.config.concurrency {
            return;
        }
        let Some(mut runnable) = self.queue.pop_front() else {
            return;
        };

        runnable.start(&self.events_tx);
        debug!(
            id = runnable.id(),
            pid = runnable.pid(),
            running = self.in_progress.len() + 1,
            "Admitted runnable"
        );
        self.in_progress.insert(runnable.id(), runnable);
    }

    /// Block until every admitted runnable is terminal and return the results.
    ///
    /// An error raised by a failed runnable with no error callback is
    /// returned from here; the pool stays consistent and `wait` can be
    /// called again to drain the rest.
    pub fn wait(&mut self) -> Result<Vec<Value>> {
        self.wait_with(|_| {})
    }

    /// Like [`wait`](Self::wait), calling `on_tick` once per poll iteration.
    pub fn wait_with(&mut self, mut on_tick: impl FnMut(&Pool)) -> Result<Vec<Value>> {
        loop {
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event)?;
            }
            self.check_in_progress()?;

            if self.in_progress.is_empty() && (self.queue.is_empty() || self.stopped) {
                break;
            }

            on_tick(&*self);

            // Sleeps for the poll interval unless a child exits first.
            match self.events_rx.recv_timeout(self.config.poll_interval) {
                Ok(event) => self.handle_event(event)?,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }

        Ok(self.results.clone())
    }

    /// Block all future admissions. Running work is not affected.
    pub fn stop(&mut self) {
        if !self.stopped {
            debug!(queued = self.queue.len(), "Pool stopped");
        }
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn runtime(&self) -> &ParentRuntime {
        &self.runtime
    }

    /// Runnables not yet admitted, in admission order.
    pub fn queue(&self) -> &VecDeque<Runnable> {
        &self.queue
    }

    pub fn in_progress(&self) -> impl Iterator<Item = &Runnable> {
        self.in_progress.values()
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    pub fn finished(&self) -> &[Runnable] {
        &self.finished
    }

    pub fn failed(&self) -> &[Runnable] {
        &self.failed
    }

    pub fn timeouts(&self) -> &[Runnable] {
        &self.timeouts
    }

    /// Outputs of finished runnables, in completion-handling order.
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Status summary, see [`PoolStatus`].
    pub fn status(&self) -> PoolStatus<'_> {
        PoolStatus::new(self)
    }

    /// Look a runnable up in any of the pool's collections.
    pub fn get(&self, id: RunnableId) -> Option<&Runnable> {
        self.in_progress
            .get(&id)
            .or_else(|| self.queue.iter().find(|r| r.id() == id))
            .or_else(|| {
                self.finished
                    .iter()
                    .chain(&self.failed)
                    .chain(&self.timeouts)
                    .find(|r| r.id() == id)
            })
    }

    /// Mutable access to a runnable that has not reached a terminal state.
    pub fn pending_mut(&mut self, id: RunnableId) -> Result<&mut Runnable> {
        if let Some(runnable) = self.in_progress.get_mut(&id) {
            return Ok(runnable);
        }
        self.queue
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(PoolError::UnknownRunnable(id))
    }

    fn handle_event(&mut self, event: ProcessEvent) -> Result<()> {
        let Some(mut runnable) = self.in_progress.remove(&event.id()) else {
            trace!(id = event.id(), "Ignoring completion of a runnable no longer in progress");
            return Ok(());
        };
        runnable.complete(event);
        self.classify(runnable)
    }

    /// Time out overdue runnables and settle inline ones that already ran.
    fn check_in_progress(&mut self) -> Result<()> {
        let timeout = self.config.timeout;
        let overdue: Vec<RunnableId> = self
            .in_progress
            .values()
            .filter(|r| r.is_running() && r.current_execution_time() > timeout)
            .map(Runnable::id)
            .collect();
        for id in overdue {
            if let Some(runnable) = self.in_progress.remove(&id) {
                self.mark_as_timed_out(runnable);
            }
        }

        let settled: Vec<RunnableId> = self
            .in_progress
            .values()
            .filter(|r| r.is_synchronous() && r.is_terminated())
            .map(Runnable::id)
            .collect();
        for id in settled {
            if let Some(runnable) = self.in_progress.remove(&id) {
                self.classify(runnable)?;
            }
        }
        Ok(())
    }

    fn classify(&mut self, runnable: Runnable) -> Result<()> {
        if runnable.is_successful() {
            self.mark_as_finished(runnable)
        } else {
            self.mark_as_failed(runnable)
        }
    }

    fn mark_as_finished(&mut self, mut runnable: Runnable) -> Result<()> {
        self.notify();
        debug!(
            id = runnable.id(),
            pid = runnable.pid(),
            elapsed_ms = elapsed_ms(runnable.current_execution_time()),
            "Runnable finished"
        );

        match runnable.trigger_success() {
            Ok(Some(output)) => {
                self.results.push(output);
                self.finished.push(runnable);
                Ok(())
            }
            Ok(None) => {
                self.failed.push(runnable);
                Ok(())
            }
            Err(e) => {
                self.failed.push(runnable);
                Err(e)
            }
        }
    }

    fn mark_as_failed(&mut self, mut runnable: Runnable) -> Result<()> {
        self.notify();
        debug!(
            id = runnable.id(),
            pid = runnable.pid(),
            termination = ?runnable.termination(),
            "Runnable failed"
        );

        let outcome = runnable.trigger_error();
        self.failed.push(runnable);
        outcome
    }

    fn mark_as_timed_out(&mut self, mut runnable: Runnable) {
        runnable.time_out();
        self.notify();
        warn!(
            id = runnable.id(),
            pid = runnable.pid(),
            elapsed_ms = elapsed_ms(runnable.current_execution_time()),
            "Runnable timed out"
        );

        runnable.trigger_timeout();
        self.timeouts.push(runnable);
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TaskError};
    use serde_json::json;
    use std::sync::Mutex;

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register_fn("square", |n: i64| Ok(n * n))
            .register_fn(
                "fail",
                |(kind, msg): (String, String)| -> std::result::Result<(), TaskError> {
                    Err(TaskError::new(kind.as_str(), msg))
                },
            )
            .register_fn("repeat", |n: usize| Ok("a".repeat(n)))
            .register_fn("falsy", |_: ()| Ok(false));
        registry
    }

    fn sync_pool(concurrency: usize) -> Pool {
        let config = PoolConfig::new()
            .with_concurrency(concurrency)
            .with_poll_interval(Duration::from_millis(1))
            .with_force_synchronous(true);
        Pool::new(config, registry()).unwrap()
    }

    fn sorted(mut values: Vec<Value>) -> Vec<Value> {
        values.sort_by_key(|v| v.as_i64());
        values
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = PoolConfig::new().with_concurrency(0);
        assert!(matches!(
            Pool::new(config, registry()),
            Err(PoolError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unregistered_kind_is_rejected() {
        let mut pool = sync_pool(2);
        let job = Job::call("cube", &2).unwrap();
        assert!(matches!(pool.add(job), Err(PoolError::InvalidInput(_))));
        assert!(pool.queue().is_empty());
        assert_eq!(pool.in_progress_count(), 0);
    }

    #[test]
    fn test_squares_respect_concurrency() {
        let mut pool = sync_pool(2);
        for i in 0..5 {
            pool.add(Job::call("square", &i).unwrap()).unwrap();
        }
        assert_eq!(pool.in_progress_count(), 2);
        assert_eq!(pool.queue().len(), 3);

        let mut max_running = 0;
        let results = pool
            .wait_with(|pool| max_running = max_running.max(pool.in_progress_count()))
            .unwrap();

        assert!(max_running <= 2);
        assert_eq!(
            sorted(results),
            vec![json!(0), json!(1), json!(4), json!(9), json!(16)]
        );
        assert_eq!(pool.finished().len(), 5);
    }

    #[test]
    fn test_admission_is_fifo() {
        let mut pool = sync_pool(1);
        let ids: Vec<RunnableId> = (0..4)
            .map(|i| pool.add(Job::call("square", &i).unwrap()).unwrap().id())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        pool.wait().unwrap();
        let finished: Vec<RunnableId> = pool.finished().iter().map(Runnable::id).collect();
        assert_eq!(finished, ids);
    }

    #[test]
    fn test_success_callback_fires_once() {
        let mut pool = sync_pool(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        pool.add(Job::call("square", &3).unwrap())
            .unwrap()
            .then(move |v| s.lock().unwrap().push(v.clone()));

        assert_eq!(pool.wait().unwrap(), vec![json!(9)]);
        assert_eq!(*seen.lock().unwrap(), vec![json!(9)]);
    }

    #[test]
    fn test_falsy_output_is_a_result() {
        let mut pool = sync_pool(1);
        pool.add(Job::call("falsy", &()).unwrap()).unwrap();
        assert_eq!(pool.wait().unwrap(), vec![json!(false)]);
        assert!(pool.failed().is_empty());
    }

    #[test]
    fn test_typed_error_callback() {
        let mut pool = sync_pool(2);
        let caught = Arc::new(Mutex::new(Vec::new()));
        let c = caught.clone();
        pool.add(Job::call("fail", &("app.k", "boom")).unwrap())
            .unwrap()
            .then(|_| panic!("success must not fire"))
            .catch_kind("other", |_| panic!("wrong kind"))
            .catch_kind("app", move |e| c.lock().unwrap().push(e.message.clone()))
            .catch(|_| panic!("only the first match fires"));

        assert!(pool.wait().unwrap().is_empty());
        assert_eq!(*caught.lock().unwrap(), vec!["boom".to_string()]);
        assert_eq!(pool.failed().len(), 1);
    }

    #[test]
    fn test_error_without_callback_propagates() {
        let mut pool = sync_pool(2);
        pool.add(Job::call("fail", &("app", "boom")).unwrap()).unwrap();
        pool.add(Job::call("square", &2).unwrap()).unwrap();

        match pool.wait() {
            Err(PoolError::Remote(err)) => {
                assert_eq!(err.kind, ErrorKind::new("app"));
                assert_eq!(err.message, "boom");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
        // The pool stays usable after the error escapes.
        pool.wait().unwrap();
        assert_eq!(pool.failed().len(), 1);
        assert_eq!(pool.finished().len(), 1);
    }

    #[test]
    fn test_output_limit_is_protocol_error() {
        let mut pool = sync_pool(1);
        let kind = Arc::new(Mutex::new(None));
        let k = kind.clone();
        pool.add_with_limit(Job::call("repeat", &500).unwrap(), 100)
            .unwrap()
            .catch(move |e| *k.lock().unwrap() = Some(e.kind.clone()));

        assert!(pool.wait().unwrap().is_empty());
        assert_eq!(*kind.lock().unwrap(), Some(ErrorKind::PROTOCOL));
    }

    #[test]
    fn test_stop_blocks_queued_work() {
        let mut pool = sync_pool(3);
        for i in 0..10 {
            pool.add(Job::call("square", &i).unwrap()).unwrap();
        }
        assert_eq!(pool.in_progress_count(), 3);
        assert_eq!(pool.queue().len(), 7);

        pool.stop();
        let results = pool.wait().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(pool.queue().len(), 7);
        assert!(pool.is_stopped());
    }

    #[test]
    fn test_get_finds_terminal_runnables() {
        let mut pool = sync_pool(1);
        let id = pool.add(Job::call("square", &5).unwrap()).unwrap().id();
        pool.wait().unwrap();

        assert_eq!(pool.get(id).and_then(Runnable::output), Some(&json!(25)));
        assert!(matches!(
            pool.pending_mut(id),
            Err(PoolError::UnknownRunnable(_))
        ));
        assert!(pool.get(99).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_failure_is_a_failure() {
        let config = PoolConfig::new()
            .with_binary("/nonexistent/forkpool")
            .with_poll_interval(Duration::from_millis(1));
        let mut pool = Pool::new(config, registry()).unwrap();
        let message = Arc::new(Mutex::new(String::new()));
        let m = message.clone();
        pool.add(Job::call("square", &2).unwrap())
            .unwrap()
            .catch(move |e| *m.lock().unwrap() = e.message.clone());

        assert!(pool.wait().unwrap().is_empty());
        assert_eq!(pool.failed().len(), 1);
        assert!(message.lock().unwrap().contains("spawn"));
    }
}
