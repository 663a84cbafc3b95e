//! Runtime system
//!
//! This module contains the context pool and the cooperative run scheduler
//! that drives a loaded program from start-up to exit.

pub mod pool;
pub mod scheduler;

pub use pool::ContextPool;
pub use scheduler::{
    EventSender, ExceptionPresenter, ExitHandle, LogPresenter, RunError, RunOutcome, RunScheduler,
    RunState, Supervisor, SupervisorEnv,
};

/// Exit code for unhandled exceptions and fatal start-up errors.
pub const FAILURE_EXIT_CODE: i32 = -1;
