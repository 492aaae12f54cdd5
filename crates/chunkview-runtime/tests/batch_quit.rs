use chunkview_runtime::program::{Cmd, Model};
use chunkview_runtime::simulator::{ProgramSimulator, TaskMode};

struct TestModel {
    executed_after_quit: bool,
    task_results: usize,
}

#[derive(Debug)]
enum TestMsg {
    QuitInBatch,
    SpawnThenQuit,
    SetExecuted,
    TaskDone,
}

impl Model for TestModel {
    type Message = TestMsg;

    fn update(&mut self, msg: Self::Message) -> Cmd<Self::Message> {
        match msg {
            TestMsg::QuitInBatch => Cmd::Batch(vec![
                Cmd::Quit,
                Cmd::Msg(TestMsg::SetExecuted), // Should NOT be executed
            ]),
            TestMsg::SpawnThenQuit => Cmd::Batch(vec![Cmd::task(|| TestMsg::TaskDone), Cmd::Quit]),
            TestMsg::SetExecuted => {
                self.executed_after_quit = true;
                Cmd::None
            }
            TestMsg::TaskDone => {
                self.task_results += 1;
                Cmd::None
            }
        }
    }
}

fn model() -> TestModel {
    TestModel {
        executed_after_quit: false,
        task_results: 0,
    }
}

#[test]
fn batch_stops_after_quit() {
    let mut sim = ProgramSimulator::new(model());
    sim.init();

    sim.send(TestMsg::QuitInBatch);

    assert!(
        !sim.model().executed_after_quit,
        "Commands after Quit in Batch should not be executed"
    );
    assert!(!sim.is_running(), "Simulator should have stopped");
}

#[test]
fn parked_task_results_are_ignored_after_quit() {
    let mut sim = ProgramSimulator::with_task_mode(model(), TaskMode::Deferred);
    sim.send(TestMsg::SpawnThenQuit);
    assert_eq!(sim.pending_count(), 1);
    assert!(!sim.is_running());

    // Nothing runs once the program has quit.
    assert_eq!(sim.run_all_tasks(), 0);
    assert_eq!(sim.pending_count(), 1);
    assert_eq!(sim.model().task_results, 0);
}
