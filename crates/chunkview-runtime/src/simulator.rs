#![forbid(unsafe_code)]

//! Deterministic program simulator for testing.
//!
//! `ProgramSimulator` runs a [`Model`] on the calling thread with no worker
//! threads at all. In [`TaskMode::Immediate`] every task runs the moment it is
//! dispatched. In [`TaskMode::Deferred`] tasks are parked, and the test decides
//! when each one completes, in what order, or whether it completes at all.
//!
//! # Example
//!
//! ```ignore
//! use chunkview_runtime::simulator::{ProgramSimulator, TaskMode};
//!
//! let mut sim = ProgramSimulator::with_task_mode(model, TaskMode::Deferred);
//! sim.init();
//! assert_eq!(sim.pending_count(), 1);
//! sim.run_all_tasks();
//! ```

use crate::program::{BoxedTask, Cmd, Model, TaskSpec};
use chunkview_core::event::Event;
use std::collections::VecDeque;

/// Record of a command that was executed during simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdRecord {
    /// No-op command.
    None,
    /// Quit command.
    Quit,
    /// Message sent to model (not stored, just noted).
    Msg,
    /// Batch of commands.
    Batch(usize),
    /// Sequence of commands.
    Sequence(usize),
    /// Log message emitted.
    Log(String),
    /// Background task dispatched, with its name if any.
    Task(Option<String>),
}

/// When dispatched tasks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskMode {
    /// Run each task synchronously as soon as it is dispatched.
    #[default]
    Immediate,
    /// Park tasks until the test runs or drops them.
    Deferred,
}

/// Deterministic simulator for [`Model`] testing.
pub struct ProgramSimulator<M: Model> {
    /// The application model.
    model: M,
    /// Record of all executed commands.
    command_log: Vec<CmdRecord>,
    /// Whether the simulated program is still running.
    running: bool,
    /// Log messages emitted via Cmd::Log.
    logs: Vec<String>,
    mode: TaskMode,
    /// Parked tasks in dispatch order.
    pending: VecDeque<(TaskSpec, BoxedTask<M::Message>)>,
}

impl<M: Model> ProgramSimulator<M> {
    /// Create a new simulator that runs tasks immediately.
    ///
    /// The model is not initialized until [`init`](Self::init) is called.
    pub fn new(model: M) -> Self {
        Self::with_task_mode(model, TaskMode::Immediate)
    }

    /// Create a new simulator with an explicit task mode.
    pub fn with_task_mode(model: M, mode: TaskMode) -> Self {
        Self {
            model,
            command_log: Vec::new(),
            running: true,
            logs: Vec::new(),
            mode,
            pending: VecDeque::new(),
        }
    }

    /// Initialize the model by calling `Model::init()` and executing returned commands.
    pub fn init(&mut self) {
        let cmd = self.model.init();
        self.execute_cmd(cmd);
    }

    /// Inject terminal events into the model.
    ///
    /// Each event is converted to a message via `From<Event>` and dispatched
    /// through `Model::update()`.
    pub fn inject_events(&mut self, events: &[Event])
    where
        M::Message: From<Event>,
    {
        for event in events {
            if !self.running {
                break;
            }
            let msg = M::Message::from(event.clone());
            let cmd = self.model.update(msg);
            self.execute_cmd(cmd);
        }
    }

    /// Inject a single terminal event into the model.
    pub fn inject_event(&mut self, event: Event)
    where
        M::Message: From<Event>,
    {
        self.inject_events(&[event]);
    }

    /// Send a specific message to the model.
    pub fn send(&mut self, msg: M::Message) {
        if !self.running {
            return;
        }
        let cmd = self.model.update(msg);
        self.execute_cmd(cmd);
    }

    /// Get a reference to the model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Get a mutable reference to the model.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Check if the simulated program is still running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Get all log messages emitted via `Cmd::Log`.
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Get the command execution log.
    pub fn command_log(&self) -> &[CmdRecord] {
        &self.command_log
    }

    /// Clear all logs.
    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    /// Names of parked tasks, in dispatch order. Unnamed tasks show as `None`.
    pub fn pending_tasks(&self) -> Vec<Option<&str>> {
        self.pending
            .iter()
            .map(|(spec, _)| spec.name.as_deref())
            .collect()
    }

    /// Number of parked tasks.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run the parked task at `index` and deliver its result.
    ///
    /// Returns false if there is no such task.
    pub fn run_task(&mut self, index: usize) -> bool {
        let Some((_, task)) = self.pending.remove(index) else {
            return false;
        };
        let msg = task();
        self.send(msg);
        true
    }

    /// Run the oldest parked task.
    pub fn run_next_task(&mut self) -> bool {
        self.run_task(0)
    }

    /// Run parked tasks oldest-first until none remain, including any tasks
    /// their results dispatch. Returns how many ran.
    pub fn run_all_tasks(&mut self) -> usize {
        let mut ran = 0;
        while self.running && self.run_next_task() {
            ran += 1;
        }
        ran
    }

    /// Run the currently parked tasks newest-first. Tasks dispatched while
    /// doing so stay parked. Returns how many ran.
    pub fn run_tasks_reversed(&mut self) -> usize {
        let batch: Vec<_> = self.pending.drain(..).collect();
        let mut ran = 0;
        for (_, task) in batch.into_iter().rev() {
            if !self.running {
                break;
            }
            let msg = task();
            self.send(msg);
            ran += 1;
        }
        ran
    }

    /// Discard the parked task at `index` without running it.
    pub fn drop_task(&mut self, index: usize) -> bool {
        self.pending.remove(index).is_some()
    }

    /// Execute a command without threads.
    ///
    /// Cmd::Msg recurses through update; Cmd::Log records the text; tasks
    /// run or park according to the task mode.
    fn execute_cmd(&mut self, cmd: Cmd<M::Message>) {
        match cmd {
            Cmd::None => {
                self.command_log.push(CmdRecord::None);
            }
            Cmd::Quit => {
                self.running = false;
                self.command_log.push(CmdRecord::Quit);
            }
            Cmd::Msg(m) => {
                self.command_log.push(CmdRecord::Msg);
                let cmd = self.model.update(m);
                self.execute_cmd(cmd);
            }
            Cmd::Batch(cmds) => {
                self.command_log.push(CmdRecord::Batch(cmds.len()));
                self.execute_all(cmds);
            }
            Cmd::Sequence(cmds) => {
                self.command_log.push(CmdRecord::Sequence(cmds.len()));
                self.execute_all(cmds);
            }
            Cmd::Log(text) => {
                self.command_log.push(CmdRecord::Log(text.clone()));
                self.logs.push(text);
            }
            Cmd::Task(spec, f) => {
                self.command_log.push(CmdRecord::Task(spec.name.clone()));
                match self.mode {
                    TaskMode::Immediate => {
                        let msg = f();
                        let cmd = self.model.update(msg);
                        self.execute_cmd(cmd);
                    }
                    TaskMode::Deferred => self.pending.push_back((spec, f)),
                }
            }
        }
    }

    fn execute_all(&mut self, cmds: Vec<Cmd<M::Message>>) {
        for c in cmds {
            self.execute_cmd(c);
            if !self.running {
                break;
            }
        }
    }
}
