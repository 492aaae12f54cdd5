//! Headless `Program` behaviour: FIFO task delivery, logging through
//! `tracing`, and idle detection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunkview_runtime::program::{Cmd, Model, Program, ProgramConfig};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

#[derive(Clone, Default)]
struct LogCapture {
    lines: Arc<Mutex<Vec<(String, String)>>>,
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.lines
            .lock()
            .unwrap()
            .push((event.metadata().target().to_owned(), visitor.0));
    }
}

struct Pipeline {
    stages: Vec<&'static str>,
}

#[derive(Debug)]
enum Msg {
    Start,
    Stage(&'static str),
}

impl Model for Pipeline {
    type Message = Msg;

    fn init(&mut self) -> Cmd<Self::Message> {
        Cmd::log("pipeline ready\n")
    }

    fn update(&mut self, msg: Self::Message) -> Cmd<Self::Message> {
        match msg {
            Msg::Start => Cmd::batch(vec![
                Cmd::task_named("slow", || {
                    std::thread::sleep(Duration::from_millis(30));
                    Msg::Stage("slow")
                }),
                Cmd::task_named("fast", || Msg::Stage("fast")),
            ]),
            Msg::Stage(name) => {
                self.stages.push(name);
                Cmd::none()
            }
        }
    }
}

#[test]
fn effect_queue_preserves_dispatch_order() {
    let mut program = Program::new(Pipeline { stages: Vec::new() }).unwrap();
    program.init();
    program.send(Msg::Start);
    let handled = program.run_until_idle(Duration::from_secs(5));
    assert_eq!(handled, 2);
    assert_eq!(program.model().stages, vec!["slow", "fast"]);
}

#[test]
fn thread_per_task_waits_for_all_results() {
    let config = ProgramConfig::default()
        .with_effect_queue(false)
        .with_idle_poll(Duration::from_millis(2));
    let mut program = Program::with_config(Pipeline { stages: Vec::new() }, config).unwrap();
    program.send(Msg::Start);
    program.run_until_idle(Duration::from_secs(5));
    let mut stages = program.model().stages.clone();
    stages.sort_unstable();
    assert_eq!(stages, vec!["fast", "slow"]);
    assert_eq!(program.tasks_in_flight(), 0);
}

#[test]
fn log_commands_go_through_tracing() {
    let capture = LogCapture::default();
    let subscriber = Registry::default().with(capture.clone());
    tracing::subscriber::with_default(subscriber, || {
        let mut program = Program::new(Pipeline { stages: Vec::new() }).unwrap();
        program.init();
    });
    let lines = capture.lines.lock().unwrap();
    assert!(
        lines
            .iter()
            .any(|(target, msg)| target == "chunkview::log" && msg == "pipeline ready"),
        "captured: {lines:?}"
    );
}
