#![forbid(unsafe_code)]

//! Elm-style update loop.
//!
//! A [`Model`] owns its state and reacts to messages in [`Model::update`].
//! Side effects are returned as [`Cmd`]s: the loop executes them after
//! `update` returns, so the model itself never blocks. A [`Cmd::Task`] runs
//! on a background worker and its result is delivered back to `update` as an
//! ordinary message, in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use chunkview_runtime::program::{Cmd, Model, Program};
//!
//! struct Counter {
//!     count: i32,
//! }
//!
//! enum Msg {
//!     Fetch,
//!     Fetched(i32),
//! }
//!
//! impl Model for Counter {
//!     type Message = Msg;
//!
//!     fn update(&mut self, msg: Self::Message) -> Cmd<Self::Message> {
//!         match msg {
//!             Msg::Fetch => Cmd::task(|| Msg::Fetched(42)),
//!             Msg::Fetched(n) => { self.count = n; Cmd::none() }
//!         }
//!     }
//! }
//!
//! let mut program = Program::new(Counter { count: 0 })?;
//! program.send(Msg::Fetch);
//! program.run_until_idle(std::time::Duration::from_secs(1));
//! ```

use chunkview_core::event::Event;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// The Model trait defines application state and behavior.
pub trait Model: Sized {
    /// The message type for this model.
    type Message: Send + 'static;

    /// Initialize the model with startup commands.
    ///
    /// Called once when the program starts. Return commands to execute
    /// initial side effects like loading data.
    fn init(&mut self) -> Cmd<Self::Message> {
        Cmd::none()
    }

    /// Update the model in response to a message.
    ///
    /// This is the core state transition function. Returns commands
    /// for any side effects that should be executed.
    fn update(&mut self, msg: Self::Message) -> Cmd<Self::Message>;
}

/// Scheduling metadata for background tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    /// Optional task name for diagnostics.
    pub name: Option<String>,
}

impl TaskSpec {
    /// Create a named task spec.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Boxed background work producing a message.
pub type BoxedTask<M> = Box<dyn FnOnce() -> M + Send>;

/// Commands represent side effects to be executed by the runtime.
#[derive(Default)]
pub enum Cmd<M> {
    /// No operation.
    #[default]
    None,
    /// Quit the application.
    Quit,
    /// Execute multiple commands as a batch (currently sequential).
    Batch(Vec<Cmd<M>>),
    /// Execute commands sequentially.
    Sequence(Vec<Cmd<M>>),
    /// Send a message to the model.
    Msg(M),
    /// Emit a log line through `tracing`.
    Log(String),
    /// Execute a blocking operation off the update loop.
    ///
    /// The return value is sent back as a message to the model.
    Task(TaskSpec, BoxedTask<M>),
}

impl<M: std::fmt::Debug> std::fmt::Debug for Cmd<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Quit => write!(f, "Quit"),
            Self::Batch(cmds) => f.debug_tuple("Batch").field(cmds).finish(),
            Self::Sequence(cmds) => f.debug_tuple("Sequence").field(cmds).finish(),
            Self::Msg(m) => f.debug_tuple("Msg").field(m).finish(),
            Self::Log(s) => f.debug_tuple("Log").field(s).finish(),
            Self::Task(spec, _) => f.debug_struct("Task").field("spec", spec).finish(),
        }
    }
}

impl<M> Cmd<M> {
    /// Create a no-op command.
    #[inline]
    pub fn none() -> Self {
        Self::None
    }

    /// Create a quit command.
    #[inline]
    pub fn quit() -> Self {
        Self::Quit
    }

    /// Create a message command.
    #[inline]
    pub fn msg(m: M) -> Self {
        Self::Msg(m)
    }

    /// Create a log command.
    #[inline]
    pub fn log(msg: impl Into<String>) -> Self {
        Self::Log(msg.into())
    }

    /// Create a batch of commands.
    ///
    /// Empty batches collapse to `None` and single-element batches to the
    /// element itself.
    pub fn batch(cmds: Vec<Self>) -> Self {
        let mut cmds: Vec<Self> = cmds
            .into_iter()
            .filter(|cmd| !matches!(cmd, Self::None))
            .collect();
        match cmds.len() {
            0 => Self::None,
            1 => cmds.pop().unwrap_or(Self::None),
            _ => Self::Batch(cmds),
        }
    }

    /// Create a sequence of commands.
    pub fn sequence(mut cmds: Vec<Self>) -> Self {
        match cmds.len() {
            0 => Self::None,
            1 => cmds.pop().unwrap_or(Self::None),
            _ => Self::Sequence(cmds),
        }
    }

    /// Return a stable name for telemetry and tracing.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Quit => "Quit",
            Self::Batch(_) => "Batch",
            Self::Sequence(_) => "Sequence",
            Self::Msg(_) => "Msg",
            Self::Log(_) => "Log",
            Self::Task(..) => "Task",
        }
    }

    /// Create a background task command.
    pub fn task<F>(f: F) -> Self
    where
        F: FnOnce() -> M + Send + 'static,
    {
        Self::Task(TaskSpec::default(), Box::new(f))
    }

    /// Create a named background task command.
    pub fn task_named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> M + Send + 'static,
    {
        Self::Task(TaskSpec::named(name), Box::new(f))
    }

    /// Count the number of atomic commands in this command.
    ///
    /// Returns 0 for None, 1 for atomic commands, and recursively counts for Batch/Sequence.
    pub fn count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Batch(cmds) | Self::Sequence(cmds) => cmds.iter().map(Self::count).sum(),
            _ => 1,
        }
    }

    /// Count the background tasks in this command.
    pub fn task_count(&self) -> usize {
        match self {
            Self::Task(..) => 1,
            Self::Batch(cmds) | Self::Sequence(cmds) => cmds.iter().map(Self::task_count).sum(),
            _ => 0,
        }
    }

    /// Re-target the command at another message type.
    ///
    /// Messages and task results are passed through `f`. This is how a
    /// component model is embedded in a host model.
    pub fn map<N, F>(self, f: F) -> Cmd<N>
    where
        M: 'static,
        N: 'static,
        F: Fn(M) -> N + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn(M) -> N + Send + Sync> = Arc::new(f);
        self.map_shared(&f)
    }

    fn map_shared<N>(self, f: &Arc<dyn Fn(M) -> N + Send + Sync>) -> Cmd<N>
    where
        M: 'static,
        N: 'static,
    {
        match self {
            Self::None => Cmd::None,
            Self::Quit => Cmd::Quit,
            Self::Batch(cmds) => Cmd::Batch(cmds.into_iter().map(|c| c.map_shared(f)).collect()),
            Self::Sequence(cmds) => {
                Cmd::Sequence(cmds.into_iter().map(|c| c.map_shared(f)).collect())
            }
            Self::Msg(m) => Cmd::Msg(f(m)),
            Self::Log(s) => Cmd::Log(s),
            Self::Task(spec, task) => {
                let f = Arc::clone(f);
                Cmd::Task(spec, Box::new(move || f(task())))
            }
        }
    }
}

/// Configuration for [`Program`].
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Run tasks on one dedicated worker thread in FIFO order.
    ///
    /// When false, each task gets its own thread and completions may arrive
    /// in any order.
    pub effect_queue: bool,
    /// How long the loop waits for a message before re-checking for idleness.
    pub idle_poll: Duration,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            effect_queue: true,
            idle_poll: Duration::from_millis(10),
        }
    }
}

impl ProgramConfig {
    /// Toggle the dedicated effect worker.
    #[must_use]
    pub fn with_effect_queue(mut self, enabled: bool) -> Self {
        self.effect_queue = enabled;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.idle_poll = poll;
        self
    }
}

/// Handle for producers outside the loop to deliver messages.
pub struct MessageSender<M> {
    sender: mpsc::Sender<M>,
}

impl<M> Clone for MessageSender<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M> MessageSender<M> {
    /// Deliver a message. Returns false once the program is gone.
    pub fn send(&self, msg: M) -> bool {
        self.sender.send(msg).is_ok()
    }
}

/// Decrements the in-flight counter when a task finishes, even by panicking.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct QueuedTask<M> {
    spec: TaskSpec,
    task: BoxedTask<M>,
    guard: InFlightGuard,
}

enum EffectCommand<M> {
    Enqueue(QueuedTask<M>),
    Shutdown,
}

struct EffectQueue<M: Send + 'static> {
    sender: mpsc::Sender<EffectCommand<M>>,
    handle: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> EffectQueue<M> {
    fn start(result_sender: mpsc::Sender<M>) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<EffectCommand<M>>();
        let handle = thread::Builder::new()
            .name("chunkview-effects".into())
            .spawn(move || effect_queue_loop(rx, result_sender))?;

        Ok(Self {
            sender: tx,
            handle: Some(handle),
        })
    }

    fn enqueue(&self, task: QueuedTask<M>) {
        if let Err(mpsc::SendError(EffectCommand::Enqueue(lost))) =
            self.sender.send(EffectCommand::Enqueue(task))
        {
            warn!(task = ?lost.spec.name, "effect worker is gone; task dropped");
        }
    }

    fn shutdown(&mut self) {
        let _ = self.sender.send(EffectCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<M: Send + 'static> Drop for EffectQueue<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn effect_queue_loop<M: Send + 'static>(
    rx: mpsc::Receiver<EffectCommand<M>>,
    result_sender: mpsc::Sender<M>,
) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            EffectCommand::Enqueue(queued) => run_task(queued, &result_sender),
            EffectCommand::Shutdown => return,
        }
    }
}

/// Run one task and deliver its result.
///
/// A panicking task delivers nothing; the worker logs it and moves on to
/// the next task.
fn run_task<M>(queued: QueuedTask<M>, result_sender: &mpsc::Sender<M>) {
    let QueuedTask { spec, task, guard } = queued;
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(msg) => {
            if result_sender.send(msg).is_err() {
                debug!(task = ?spec.name, "task finished after program shut down");
            }
        }
        Err(payload) => {
            warn!(task = ?spec.name, "task panicked: {}", panic_message(&*payload));
        }
    }
    drop(guard);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Headless program: owns a model and drives its update loop.
///
/// Messages are processed strictly in arrival order on the calling thread.
/// Tasks run on the effect worker (or on their own threads) and their
/// results queue up behind any message already waiting.
pub struct Program<M: Model> {
    model: M,
    config: ProgramConfig,
    sender: mpsc::Sender<M::Message>,
    receiver: mpsc::Receiver<M::Message>,
    effect_queue: Option<EffectQueue<M::Message>>,
    task_handles: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
    running: bool,
    processed: u64,
}

impl<M: Model> Program<M> {
    /// Create a program with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the effect worker thread cannot be spawned.
    pub fn new(model: M) -> io::Result<Self> {
        Self::with_config(model, ProgramConfig::default())
    }

    /// Create a program with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the effect worker thread cannot be spawned.
    pub fn with_config(model: M, config: ProgramConfig) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let effect_queue = if config.effect_queue {
            Some(EffectQueue::start(sender.clone())?)
        } else {
            None
        };
        Ok(Self {
            model,
            config,
            sender,
            receiver,
            effect_queue,
            task_handles: Vec::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            running: true,
            processed: 0,
        })
    }

    /// Run `Model::init` and execute its commands.
    pub fn init(&mut self) {
        let cmd = self.model.init();
        self.execute_cmd(cmd);
    }

    /// Handle a message immediately, ahead of anything queued.
    pub fn send(&mut self, msg: M::Message) {
        if !self.running {
            return;
        }
        self.handle(msg);
    }

    /// Convert a terminal event into a message and handle it.
    pub fn inject_event(&mut self, event: Event)
    where
        M::Message: From<Event>,
    {
        self.send(M::Message::from(event));
    }

    /// A handle other threads can use to queue messages.
    pub fn sender(&self) -> MessageSender<M::Message> {
        MessageSender {
            sender: self.sender.clone(),
        }
    }

    /// Process queued messages until nothing is queued and no task is in
    /// flight, the program quits, or `timeout` elapses.
    ///
    /// Returns the number of messages processed.
    pub fn run_until_idle(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut handled = 0;
        while self.running {
            let now = Instant::now();
            if now >= deadline {
                debug!(handled, "run_until_idle timed out");
                break;
            }
            let wait = self.config.idle_poll.min(deadline - now);
            match self.receiver.recv_timeout(wait) {
                Ok(msg) => {
                    self.handle(msg);
                    handled += 1;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.in_flight.load(Ordering::Acquire) > 0 {
                        continue;
                    }
                    // Results are sent before the counter drops, so anything
                    // still owed to us is already in the channel.
                    match self.receiver.try_recv() {
                        Ok(msg) => {
                            self.handle(msg);
                            handled += 1;
                        }
                        Err(_) => break,
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            self.reap_finished_tasks();
        }
        handled
    }

    /// Run `init` and then process messages until the model quits.
    pub fn run(&mut self) {
        self.init();
        while self.running {
            match self.receiver.recv() {
                Ok(msg) => self.handle(msg),
                Err(_) => break,
            }
            self.reap_finished_tasks();
        }
    }

    /// Get a reference to the model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Get a mutable reference to the model.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Check if the program is still running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop the program.
    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Tasks dispatched whose result has not been delivered yet.
    pub fn tasks_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Messages handled so far.
    pub fn messages_processed(&self) -> u64 {
        self.processed
    }

    fn handle(&mut self, msg: M::Message) {
        let _span = info_span!("chunkview.update", seq = self.processed).entered();
        self.processed += 1;
        let cmd = self.model.update(msg);
        self.execute_cmd(cmd);
    }

    fn execute_cmd(&mut self, cmd: Cmd<M::Message>) {
        match cmd {
            Cmd::None => {}
            Cmd::Quit => self.running = false,
            Cmd::Msg(m) => {
                self.processed += 1;
                let cmd = self.model.update(m);
                self.execute_cmd(cmd);
            }
            Cmd::Batch(cmds) | Cmd::Sequence(cmds) => {
                for c in cmds {
                    self.execute_cmd(c);
                    if !self.running {
                        break;
                    }
                }
            }
            Cmd::Log(text) => {
                info!(target: "chunkview::log", "{}", text.trim_end());
            }
            Cmd::Task(spec, task) => self.spawn_task(spec, task),
        }
    }

    fn spawn_task(&mut self, spec: TaskSpec, task: BoxedTask<M::Message>) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let queued = QueuedTask {
            spec,
            task,
            guard: InFlightGuard(Arc::clone(&self.in_flight)),
        };
        if let Some(ref queue) = self.effect_queue {
            queue.enqueue(queued);
            return;
        }
        let sender = self.sender.clone();
        let name = queued.spec.name.clone();
        match thread::Builder::new()
            .name(name.unwrap_or_else(|| "chunkview-task".into()))
            .spawn(move || run_task(queued, &sender))
        {
            Ok(handle) => self.task_handles.push(handle),
            Err(err) => warn!(error = %err, "failed to spawn task thread; task dropped"),
        }
    }

    fn reap_finished_tasks(&mut self) {
        if self.task_handles.is_empty() {
            return;
        }

        let mut remaining = Vec::with_capacity(self.task_handles.len());
        for handle in self.task_handles.drain(..) {
            if handle.is_finished() {
                if let Err(payload) = handle.join() {
                    warn!("spawned task panicked: {}", panic_message(&*payload));
                }
            } else {
                remaining.push(handle);
            }
        }
        self.task_handles = remaining;
    }
}
