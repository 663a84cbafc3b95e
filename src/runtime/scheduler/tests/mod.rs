//! Scheduler 单元测试
//!
//! 测试运行状态机、退出码和协作式监督器

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::testing::{ScriptedEngine, Step};
use crate::engine::{EngineProperty, EventId, ExecutionState, LineHook, ReturnValue, ScriptEngine};
use crate::runtime::pool::ContextPool;
use crate::runtime::scheduler::{
    ExceptionPresenter, ExitHandle, RunError, RunOutcome, RunScheduler, RunState, Supervisor,
};
use crate::runtime::FAILURE_EXIT_CODE;
use crate::engine::ContextHooks;
use crate::util::diagnostic::{Diagnostics, ExceptionSlot, MessageKind, Report, ScriptMessage};

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
    copy: bool,
}

impl Recorder {
    fn copying() -> Self {
        Self {
            copy: true,
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ExceptionPresenter for Recorder {
    fn unhandled_exception(
        &self,
        info: &str,
    ) -> bool {
        self.events.lock().push(format!("exception: {}", info));
        self.copy
    }

    fn copy_to_clipboard(
        &self,
        text: &str,
    ) {
        self.events.lock().push(format!("clipboard: {}", text));
    }

    fn script_terminated(&self) {
        self.events.lock().push("terminated".to_string());
    }

    fn show_report(
        &self,
        report: &Report,
    ) {
        self.events.lock().push(format!("report: {}", report.title));
    }
}

fn run(engine: &mut ScriptedEngine) -> Result<RunOutcome, RunError> {
    run_with(engine, Recorder::default(), &mut Diagnostics::new())
}

fn run_with(
    engine: &mut ScriptedEngine,
    presenter: Recorder,
    diagnostics: &mut Diagnostics,
) -> Result<RunOutcome, RunError> {
    RunScheduler::new(engine)
        .with_presenter(presenter)
        .with_idle_poll(Duration::from_millis(5))
        .run(diagnostics, "game.nvgt")
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;

    #[test]
    fn test_int_main_zero() {
        let mut engine =
            ScriptedEngine::new().function("int main()", vec![Step::Return(ReturnValue::Int(0))]);
        let outcome = run(&mut engine).unwrap();
        assert_eq!(outcome.state, RunState::Finished);
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn test_int_main_seven() {
        let mut engine = ScriptedEngine::new().function(
            "int main()",
            vec![Step::Yield, Step::Return(ReturnValue::Int(7))],
        );
        assert_eq!(run(&mut engine).unwrap().exit_code, 7);
    }

    #[test]
    fn test_void_main() {
        let mut engine =
            ScriptedEngine::new().function("void main()", vec![Step::Log("main".into())]);
        let outcome = run(&mut engine).unwrap();
        assert_eq!(outcome.state, RunState::Finished);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(engine.journal(), vec!["globals", "main"]);
    }

    #[test]
    fn test_int_main_preferred() {
        let mut engine = ScriptedEngine::new()
            .function("void main()", vec![Step::Return(ReturnValue::Int(1))])
            .function("int main()", vec![Step::Return(ReturnValue::Int(2))]);
        assert_eq!(run(&mut engine).unwrap().exit_code, 2);
    }

    #[test]
    fn test_exit_request_beats_runnable_contexts() {
        let mut engine = ScriptedEngine::new()
            .function(
                "int main()",
                vec![
                    Step::Spawn("void spin()".into()),
                    Step::Yield,
                    Step::Exit(42),
                    Step::Return(ReturnValue::Int(0)),
                ],
            )
            .function("void spin()", vec![Step::Yield; 1000]);
        let outcome = run(&mut engine).unwrap();
        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.exit_code, 42);
    }

    #[test]
    fn test_exception_after_exit_request_keeps_code() {
        let recorder = Recorder::default();
        let mut engine = ScriptedEngine::new().function(
            "int main()",
            vec![Step::ExitThenThrow(5, "late failure".into())],
        );
        let outcome = run_with(&mut engine, recorder.clone(), &mut Diagnostics::new()).unwrap();
        assert_eq!(outcome.state, RunState::Excepted);
        assert_eq!(outcome.exit_code, 5);
        assert!(recorder.events()[0].starts_with("exception: late failure"));
    }

    #[test]
    fn test_exit_from_child_context() {
        let mut engine = ScriptedEngine::new()
            .function(
                "int main()",
                vec![Step::Spawn("void quit()".into()), Step::Wait(EventId(1))],
            )
            .function("void quit()", vec![Step::Exit(3)]);
        let outcome = run(&mut engine).unwrap();
        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.exit_code, 3);
    }

    #[test]
    fn test_unhandled_exception() {
        let presenter = Recorder::copying();
        let mut engine = ScriptedEngine::new().function(
            "int main()",
            vec![Step::Line(12), Step::Throw("null pointer access".into())],
        );
        let outcome =
            run_with(&mut engine, presenter.clone(), &mut Diagnostics::new()).unwrap();
        assert_eq!(outcome.state, RunState::Excepted);
        assert_eq!(outcome.exit_code, FAILURE_EXIT_CODE);

        let events = presenter.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].starts_with("exception: null pointer access\r\ncall stack:\r\n"));
        assert!(events[0].contains("int main() (line 12"));
        assert!(events[1].starts_with("clipboard: null pointer access"));
    }

    #[test]
    fn test_exception_without_copy() {
        let presenter = Recorder::default();
        let mut engine =
            ScriptedEngine::new().function("void main()", vec![Step::Throw("boom".into())]);
        run_with(&mut engine, presenter.clone(), &mut Diagnostics::new()).unwrap();
        let events = presenter.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("exception: boom"));
    }

    #[test]
    fn test_unwakeable_wait_terminates() {
        let presenter = Recorder::default();
        let mut engine = ScriptedEngine::new().function("int main()", vec![Step::Wait(EventId(9))]);
        let outcome =
            run_with(&mut engine, presenter.clone(), &mut Diagnostics::new()).unwrap();
        assert_eq!(outcome.state, RunState::Terminated);
        assert_eq!(outcome.exit_code, FAILURE_EXIT_CODE);
        assert_eq!(presenter.events(), vec!["terminated"]);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_no_entry_point() {
        let mut engine = ScriptedEngine::new().function("void helper()", vec![]);
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(&ScriptMessage::new(
            "game.nvgt",
            0,
            0,
            MessageKind::Information,
            "stale",
        ));
        let err = run_with(&mut engine, Recorder::default(), &mut diagnostics).unwrap_err();
        assert_eq!(err, RunError::NoEntryPoint);
        assert_eq!(err.exit_code(), FAILURE_EXIT_CODE);
        assert!(diagnostics.line0().contains("No entry point found"));
        assert!(!diagnostics.line0().contains("stale"));
        assert!(engine.journal().is_empty());
    }

    #[test]
    fn test_preglobals_false_halts_cleanly() {
        let mut engine = ScriptedEngine::new()
            .function("bool preglobals()", vec![Step::Return(ReturnValue::Bool(false))])
            .function("int main()", vec![Step::Log("main".into())])
            .function("void on_exit()", vec![Step::Log("on_exit".into())]);
        let outcome = run(&mut engine).unwrap();
        assert_eq!(outcome.state, RunState::Halted);
        assert_eq!(outcome.exit_code, 0);
        assert!(engine.journal().is_empty());
    }

    #[test]
    fn test_preglobals_true_continues() {
        let mut engine = ScriptedEngine::new()
            .function(
                "bool preglobals()",
                vec![Step::Log("pre".into()), Step::Return(ReturnValue::Bool(true))],
            )
            .function("int main()", vec![Step::Log("main".into())]);
        run(&mut engine).unwrap();
        assert_eq!(engine.journal(), vec!["pre", "globals", "main"]);
    }

    #[test]
    fn test_preglobals_exception_halts_cleanly() {
        let mut engine = ScriptedEngine::new()
            .function("bool preglobals()", vec![Step::Throw("bad".into())])
            .function(
                "int main()",
                vec![Step::Log("main".into()), Step::Return(ReturnValue::Int(3))],
            );
        let outcome = run(&mut engine).unwrap();
        assert_eq!(outcome.state, RunState::Halted);
        assert_eq!(outcome.exit_code, 0);
        assert!(engine.journal().is_empty());
    }

    #[test]
    fn test_globals_failure() {
        let mut engine = ScriptedEngine::new()
            .function("int main()", vec![Step::Log("main".into())])
            .failing_globals("g_count initializer threw");
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(&ScriptMessage::new(
            "game.nvgt",
            4,
            1,
            MessageKind::Information,
            "Failed to initialize global variable 'g_count'",
        ));

        let err = run_with(&mut engine, Recorder::default(), &mut diagnostics).unwrap_err();
        assert!(matches!(err, RunError::Globals(_)));
        assert!(diagnostics.has_errors());
        assert!(diagnostics.errors().contains("Failed to initialize global variable"));
        assert!(!engine.journal().contains(&"main".to_string()));
    }

    #[test]
    fn test_on_exit_runs_after_abort() {
        let mut engine = ScriptedEngine::new()
            .function("int main()", vec![Step::Exit(5)])
            .function("void on_exit()", vec![Step::Log("on_exit".into())]);
        let outcome = run(&mut engine).unwrap();
        assert_eq!(outcome.exit_code, 5);
        assert_eq!(engine.journal(), vec!["globals", "on_exit"]);
    }

    #[test]
    fn test_on_exit_errors_ignored() {
        let mut engine = ScriptedEngine::new()
            .function("int main()", vec![Step::Return(ReturnValue::Int(9))])
            .function("void on_exit()", vec![Step::Throw("late".into())]);
        assert_eq!(run(&mut engine).unwrap().exit_code, 9);
    }

    #[test]
    fn test_warnings_reported_after_globals() {
        let mut engine = ScriptedEngine::new().function("int main()", vec![]);
        engine
            .set_property(EngineProperty::CompilerWarnings.index(), 2)
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(&ScriptMessage::new(
            "game.nvgt",
            3,
            7,
            MessageKind::Warning,
            "unused variable",
        ));
        let presenter = Recorder::default();
        run_with(&mut engine, presenter.clone(), &mut diagnostics).unwrap();
        assert_eq!(presenter.events(), vec!["report: Compilation warnings"]);
        assert!(diagnostics.warnings().is_empty());
    }

    #[test]
    fn test_contexts_reused_and_dropped() {
        let mut engine = ScriptedEngine::new()
            .function(
                "int main()",
                vec![
                    Step::Spawn("void a()".into()),
                    Step::Yield,
                    Step::Yield,
                    Step::Spawn("void a()".into()),
                    Step::Yield,
                    Step::Yield,
                ],
            )
            .function("void a()", vec![]);
        let mut scheduler = RunScheduler::new(&mut engine).with_presenter(Recorder::default());
        scheduler.run(&mut Diagnostics::new(), "game.nvgt").unwrap();
        assert_eq!(scheduler.state(), RunState::Finished);
        assert_eq!(scheduler.pool().idle(), 0);
        assert_eq!(scheduler.pool().created(), 2);
    }

    #[test]
    fn test_line_hook_installed() {
        #[derive(Default)]
        struct Lines(Mutex<Vec<(String, u32)>>);

        impl LineHook for Lines {
            fn on_line(
                &self,
                function: &str,
                line: u32,
            ) {
                self.0.lock().push((function.to_string(), line));
            }
        }

        let lines = Arc::new(Lines::default());
        let mut engine = ScriptedEngine::new()
            .function("int main()", vec![Step::Line(1), Step::Line(2)]);
        RunScheduler::new(&mut engine)
            .with_line_hook(lines.clone())
            .run(&mut Diagnostics::new(), "game.nvgt")
            .unwrap();
        assert_eq!(
            *lines.0.lock(),
            vec![("int main()".to_string(), 1), ("int main()".to_string(), 2)]
        );
    }
}

#[cfg(test)]
mod supervisor_tests {
    use super::*;

    fn pool(engine: &ScriptedEngine) -> ContextPool<crate::engine::testing::ScriptedContext> {
        ContextPool::new(
            engine.context_factory(),
            ContextHooks::new(ExceptionSlot::new()),
        )
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let engine = ScriptedEngine::new()
            .function(
                "int main()",
                vec![
                    Step::Spawn("void waiter()".into()),
                    Step::Sleep(Duration::from_millis(5)),
                    Step::Signal(EventId(1)),
                    Step::Yield,
                    Step::Log("main done".into()),
                ],
            )
            .function(
                "void waiter()",
                vec![Step::Wait(EventId(1)), Step::Log("woke".into())],
            );
        let pool = pool(&engine);
        let mut supervisor = Supervisor::new(&pool, ExitHandle::new());
        let main = engine.find_function("int main()").unwrap();
        let id = supervisor.add_context(&main, true).unwrap();
        supervisor.run_to_completion();

        assert_eq!(
            supervisor.state(id),
            Some(&ExecutionState::Finished(ReturnValue::Void))
        );
        assert_eq!(engine.journal(), vec!["woke", "main done"]);
    }

    #[test]
    fn test_signal_before_wait_is_latched() {
        let engine = ScriptedEngine::new()
            .function(
                "int main()",
                vec![
                    Step::Signal(EventId(4)),
                    Step::Spawn("void late()".into()),
                ],
            )
            .function("void late()", vec![Step::Wait(EventId(4)), Step::Log("late".into())]);
        let pool = pool(&engine);
        let mut supervisor = Supervisor::new(&pool, ExitHandle::new());
        let main = engine.find_function("int main()").unwrap();
        supervisor.add_context(&main, false).unwrap();
        supervisor.run_to_completion();
        assert_eq!(engine.journal(), vec!["late"]);
        assert_eq!(supervisor.active(), 0);
    }

    #[test]
    fn test_external_event() {
        let engine = ScriptedEngine::new().function(
            "int main()",
            vec![Step::Wait(EventId(7)), Step::Return(ReturnValue::Int(1))],
        );
        let pool = pool(&engine);
        let mut supervisor =
            Supervisor::new(&pool, ExitHandle::new()).with_idle_poll(Duration::from_millis(10));
        let main = engine.find_function("int main()").unwrap();
        let id = supervisor.add_context(&main, true).unwrap();

        let sender = supervisor.event_sender();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(sender.send(EventId(7)));
        });
        supervisor.run_to_completion();
        handle.join().unwrap();

        assert_eq!(
            supervisor.state(id),
            Some(&ExecutionState::Finished(ReturnValue::Int(1)))
        );
    }

    #[test]
    fn test_external_exit_request() {
        let engine =
            ScriptedEngine::new().function("int main()", vec![Step::Sleep(Duration::from_secs(60))]);
        let pool = pool(&engine);
        let exit = ExitHandle::new();
        let mut supervisor =
            Supervisor::new(&pool, exit.clone()).with_idle_poll(Duration::from_millis(5));
        let main = engine.find_function("int main()").unwrap();
        let id = supervisor.add_context(&main, true).unwrap();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            exit.request(11);
        });
        supervisor.run_to_completion();
        handle.join().unwrap();

        assert_eq!(supervisor.state(id), Some(&ExecutionState::Aborted));
        assert!(supervisor.take_context(id).is_none());
        assert_eq!(supervisor.exit_handle().code(), 11);
        // the aborted context is not returned to the pool
        drop(supervisor);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_sleepers_wake_in_deadline_order() {
        let engine = ScriptedEngine::new()
            .function(
                "void slow()",
                vec![Step::Sleep(Duration::from_millis(30)), Step::Log("slow".into())],
            )
            .function(
                "void fast()",
                vec![Step::Sleep(Duration::from_millis(5)), Step::Log("fast".into())],
            );
        let pool = pool(&engine);
        let mut supervisor = Supervisor::new(&pool, ExitHandle::new());
        supervisor
            .add_context(&engine.find_function("void slow()").unwrap(), false)
            .unwrap();
        supervisor
            .add_context(&engine.find_function("void fast()").unwrap(), false)
            .unwrap();
        supervisor.run_to_completion();
        assert_eq!(engine.journal(), vec!["fast", "slow"]);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_unknown_spawn_target_throws() {
        let engine = ScriptedEngine::new().function(
            "int main()",
            vec![Step::Spawn("void missing()".into())],
        );
        let pool = pool(&engine);
        let mut supervisor = Supervisor::new(&pool, ExitHandle::new());
        let id = supervisor
            .add_context(&engine.find_function("int main()").unwrap(), true)
            .unwrap();
        supervisor.run_to_completion();
        assert!(matches!(
            supervisor.state(id),
            Some(ExecutionState::Exception(message)) if message.contains("void missing()")
        ));
    }
}
