//! Run scheduler
//!
//! Takes a loaded program from start-up to exit: optional pre-globals hook,
//! global initialisation, the entry point under a cooperative
//! [`Supervisor`], and finally the optional on-exit hook.

pub mod supervisor;

pub use supervisor::{
    ContextId, EventSender, ExitHandle, Supervisor, SupervisorEnv, IDLE_POLL,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::{
    ContextHooks, EngineError, EngineProperty, ExecutionState, FunctionOf, LineHook, ReturnValue,
    ScriptEngine,
};
use crate::runtime::pool::ContextPool;
use crate::runtime::FAILURE_EXIT_CODE;
use crate::util::diagnostic::{Diagnostics, ExceptionSlot, Report};

/// Entry point declarations, in lookup order.
pub const ENTRY_POINTS: [&str; 2] = ["int main()", "void main()"];

/// Runs before global initialisers; returning false halts cleanly.
pub const PREGLOBALS: &str = "bool preglobals()";

/// Runs once after the main flow settles.
pub const ON_EXIT: &str = "void on_exit()";

const NO_ENTRY_POINT: &str = "No entry point found (either 'int main()' or 'void main()'.)";

/// Where a run is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    PreGlobals,
    GlobalsInitialized,
    Running,
    /// Entry point returned normally
    Finished,
    /// Entry point stopped on an unhandled exception
    Excepted,
    /// Exit was requested
    Aborted,
    /// Pre-globals hook returned false
    Halted,
    /// Entry point never reached a terminal state
    Terminated,
}

impl fmt::Display for RunState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            RunState::NotStarted => "not started",
            RunState::PreGlobals => "pre-globals",
            RunState::GlobalsInitialized => "globals initialized",
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Excepted => "excepted",
            RunState::Aborted => "aborted",
            RunState::Halted => "halted",
            RunState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    pub exit_code: i32,
}

/// Fatal start-up errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("{}", NO_ENTRY_POINT)]
    NoEntryPoint,

    #[error("Failed to prepare context: {0}")]
    Prepare(EngineError),

    #[error("Failed while initializing global variables: {0}")]
    Globals(EngineError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        FAILURE_EXIT_CODE
    }
}

/// Surfaces run-time problems to the user.
pub trait ExceptionPresenter {
    /// Show an unhandled exception. Returns true if the user wants it copied.
    fn unhandled_exception(
        &self,
        info: &str,
    ) -> bool;

    fn copy_to_clipboard(
        &self,
        text: &str,
    );

    /// The entry point stopped without finishing, throwing or aborting.
    fn script_terminated(&self);

    /// Compiler messages left over once globals are initialised.
    fn show_report(
        &self,
        report: &Report,
    );
}

/// Presenter that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPresenter;

impl ExceptionPresenter for LogPresenter {
    fn unhandled_exception(
        &self,
        info: &str,
    ) -> bool {
        error!("unhandled exception\n{}", info);
        false
    }

    fn copy_to_clipboard(
        &self,
        _text: &str,
    ) {
    }

    fn script_terminated(&self) {
        error!("script terminated unexpectedly");
    }

    fn show_report(
        &self,
        report: &Report,
    ) {
        if report.failed {
            error!("{}\n{}", report.title, report.body);
        } else {
            warn!("{}\n{}", report.title, report.body);
        }
    }
}

/// Message plus the call stack captured by the exception hook.
pub fn exception_info(
    message: &str,
    call_stack: &str,
) -> String {
    if call_stack.is_empty() {
        message.to_string()
    } else {
        format!("{}\r\ncall stack:\r\n{}", message, call_stack)
    }
}

/// Drives one program run against an engine.
pub struct RunScheduler<'e, E: ScriptEngine> {
    engine: &'e mut E,
    pool: ContextPool<E::Context>,
    exception: ExceptionSlot,
    exit: ExitHandle,
    presenter: Box<dyn ExceptionPresenter>,
    state: RunState,
    idle_poll: Duration,
}

impl<'e, E: ScriptEngine> RunScheduler<'e, E> {
    pub fn new(engine: &'e mut E) -> Self {
        let exception = ExceptionSlot::new();
        let pool = ContextPool::new(
            engine.context_factory(),
            ContextHooks::new(exception.clone()),
        );
        Self {
            engine,
            pool,
            exception,
            exit: ExitHandle::new(),
            presenter: Box::new(LogPresenter),
            state: RunState::NotStarted,
            idle_poll: IDLE_POLL,
        }
    }

    pub fn with_presenter(
        mut self,
        presenter: impl ExceptionPresenter + 'static,
    ) -> Self {
        self.presenter = Box::new(presenter);
        self
    }

    /// Install a line hook on every context this run creates.
    pub fn with_line_hook(
        mut self,
        hook: Arc<dyn LineHook>,
    ) -> Self {
        let hooks = self.pool.hooks().clone().with_line_hook(hook);
        self.pool = ContextPool::new(self.engine.context_factory(), hooks);
        self
    }

    pub fn with_idle_poll(
        mut self,
        idle_poll: Duration,
    ) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Handle for requesting exit from outside the program.
    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    pub fn exception_slot(&self) -> &ExceptionSlot {
        &self.exception
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn pool(&self) -> &ContextPool<E::Context> {
        &self.pool
    }

    fn enter(
        state: &mut RunState,
        next: RunState,
    ) {
        debug!("run state {} -> {}", state, next);
        *state = next;
    }

    /// Run the program. `section` names the script in diagnostics.
    pub fn run(
        &mut self,
        diagnostics: &mut Diagnostics,
        section: &str,
    ) -> Result<RunOutcome, RunError> {
        let Some(entry) = ENTRY_POINTS
            .iter()
            .find_map(|decl| self.engine.find_function(decl))
        else {
            diagnostics.clear_info();
            diagnostics.error(section, NO_ENTRY_POINT);
            return Err(RunError::NoEntryPoint);
        };

        if let Some(preglobals) = self.engine.find_function(PREGLOBALS) {
            Self::enter(&mut self.state, RunState::PreGlobals);
            if let Some(outcome) = self.run_preglobals(&preglobals)? {
                self.pool.drain();
                return Ok(outcome);
            }
        }

        if let Err(e) = self.engine.initialize_globals() {
            diagnostics.promote_info_to_errors();
            diagnostics.error(section, format!("Failed while initializing global variables: {}", e));
            self.pool.drain();
            return Err(RunError::Globals(e));
        }
        Self::enter(&mut self.state, RunState::GlobalsInitialized);

        let warnings = EngineProperty::CompilerWarnings.index();
        let show_warnings =
            warnings < self.engine.property_count() && self.engine.property(warnings) == 2;
        if let Some(report) = diagnostics.report(show_warnings) {
            self.presenter.show_report(&report);
        }

        Self::enter(&mut self.state, RunState::Running);
        let outcome = self.run_entry(&entry);
        self.run_on_exit();
        self.pool.drain();

        let outcome = outcome?;
        info!(
            "run {} with exit code {}",
            outcome.state, outcome.exit_code
        );
        Ok(outcome)
    }

    /// `Some` when the run ends here.
    fn run_preglobals(
        &mut self,
        preglobals: &FunctionOf<E>,
    ) -> Result<Option<RunOutcome>, RunError> {
        let mut supervisor =
            Supervisor::new(&self.pool, self.exit.clone()).with_idle_poll(self.idle_poll);
        let id = supervisor
            .add_context(preglobals, true)
            .map_err(RunError::Prepare)?;
        supervisor.run_to_completion();

        match supervisor.state(id).cloned() {
            Some(ExecutionState::Finished(value)) => {
                let proceed = match value {
                    ReturnValue::Bool(b) => b,
                    ReturnValue::Int(i) => i != 0,
                    ReturnValue::Void => false,
                };
                if proceed {
                    return Ok(None);
                }
                info!("preglobals() returned false, halting");
            }
            Some(ExecutionState::Exception(message)) => {
                let info = exception_info(&message, &self.exception.take());
                warn!("preglobals() raised, halting: {}", info);
            }
            Some(ExecutionState::Aborted) => {
                Self::enter(&mut self.state, RunState::Aborted);
                return Ok(Some(RunOutcome {
                    state: RunState::Aborted,
                    exit_code: self.exit.code(),
                }));
            }
            _ => warn!("preglobals() did not complete, halting"),
        }

        Self::enter(&mut self.state, RunState::Halted);
        Ok(Some(RunOutcome {
            state: RunState::Halted,
            exit_code: 0,
        }))
    }

    fn run_entry(
        &mut self,
        entry: &FunctionOf<E>,
    ) -> Result<RunOutcome, RunError> {
        let mut supervisor =
            Supervisor::new(&self.pool, self.exit.clone()).with_idle_poll(self.idle_poll);
        let id = supervisor.add_context(entry, true).map_err(RunError::Prepare)?;
        supervisor.run_to_completion();

        let (state, exit_code) = match supervisor.state(id).cloned() {
            Some(ExecutionState::Finished(value)) => {
                let code = match value {
                    ReturnValue::Int(code) => code,
                    _ => 0,
                };
                (RunState::Finished, code)
            }
            Some(ExecutionState::Exception(message)) => {
                let info = exception_info(&message, &self.exception.take());
                if self.presenter.unhandled_exception(&info) {
                    self.presenter.copy_to_clipboard(&info);
                }
                let code = if self.exit.is_requested() {
                    self.exit.code()
                } else {
                    FAILURE_EXIT_CODE
                };
                (RunState::Excepted, code)
            }
            Some(ExecutionState::Aborted) => (RunState::Aborted, self.exit.code()),
            _ => {
                self.presenter.script_terminated();
                (RunState::Terminated, FAILURE_EXIT_CODE)
            }
        };
        Self::enter(&mut self.state, state);
        Ok(RunOutcome { state, exit_code })
    }

    /// Run `void on_exit()` on a fresh context, ignoring how it ends.
    fn run_on_exit(&mut self) {
        let Some(on_exit) = self.engine.find_function(ON_EXIT) else {
            return;
        };
        let mut supervisor =
            Supervisor::new(&self.pool, ExitHandle::new()).with_idle_poll(self.idle_poll);
        match supervisor.add_context(&on_exit, true) {
            Ok(id) => {
                supervisor.run_to_completion();
                debug!("on_exit() ended as {:?}", supervisor.state(id));
            }
            Err(e) => debug!("on_exit() not run: {}", e),
        }
    }
}

impl<E: ScriptEngine> fmt::Debug for RunScheduler<'_, E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("RunScheduler")
            .field("state", &self.state)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
