#![forbid(unsafe_code)]

//! chunkview runtime
//!
//! The runtime is the single-threaded update loop the engine runs inside.
//! All state mutation happens while one message is being handled; background
//! work is expressed as [`Cmd::Task`] and re-enters the loop as a new message
//! when it completes.
//!
//! # Key Components
//!
//! - [`Model`] - Trait for application state and behavior
//! - [`Cmd`] - Commands for side effects
//! - [`Program`] - Headless loop with a dedicated effect worker
//! - [`ProgramSimulator`] - Deterministic loop for tests, with deferred tasks

pub mod program;
pub mod simulator;

pub use program::{Cmd, MessageSender, Model, Program, ProgramConfig, TaskSpec};
pub use simulator::{CmdRecord, ProgramSimulator, TaskMode};
