//! Script engine abstraction
//!
//! The VM that compiles and executes programs lives outside this crate. This
//! module defines the seam it plugs into:
//!
//! ```text
//! ArtifactWriter --ProgramSource::save_program--> BytecodeWriter
//! ArtifactReader --ScriptEngine::load_bytecode--> BytecodeReader
//! RunScheduler   --ScriptContext::resume-------> one call stack
//! ```

pub mod properties;
pub mod testing;

pub use properties::{EngineProperty, EnginePropertyTable, PROPERTY_COUNT};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::scheduler::SupervisorEnv;
use crate::util::diagnostic::ExceptionSlot;

/// Byte-stream interface the VM serializer reads and writes through.
///
/// Both methods return how many bytes were transferred. Anything short of
/// the requested length is a failure of the underlying stream.
pub trait BinaryStream {
    fn write(
        &mut self,
        data: &[u8],
    ) -> usize;

    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> usize;
}

/// Engine errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Property index outside the engine's table
    #[error("Engine property index {index} out of range (engine has {count})")]
    PropertyIndex { index: usize, count: usize },

    /// Property table length differs from the engine's
    #[error("Engine expects {expected} properties, table carries {found}")]
    PropertyCount { expected: usize, found: usize },

    /// Engine refused a property value
    #[error("Engine property {index} rejected value {value}: {reason}")]
    PropertyValue {
        index: usize,
        value: u64,
        reason: String,
    },

    /// Serializer failed to emit bytecode
    #[error("Failed to save bytecode: {0}")]
    Save(String),

    /// Context could not be prepared for a function
    #[error("Failed to prepare context: {0}")]
    Prepare(String),

    /// Global variable initialisation failed
    #[error("Global initialisation failed: {0}")]
    Globals(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Bytecode rejected by the VM loader.
///
/// `offset` is the loader's own count of bytes consumed from the stream it
/// was handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeRejected {
    pub offset: u64,
    pub reason: String,
}

impl fmt::Display for BytecodeRejected {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} (at stream offset {})", self.reason, self.offset)
    }
}

/// Value returned by a finished function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReturnValue {
    #[default]
    Void,
    Int(i32),
    Bool(bool),
}

/// Identifier of an external event a context can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// Why a context stopped without finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// Coroutine yield; runnable again on the next pass
    Yield,
    /// Timed wait
    Sleep(Duration),
    /// Parked until the event is signalled
    WaitEvent(EventId),
}

/// Result of resuming a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Finished(ReturnValue),
    Suspended(Suspension),
    /// Unhandled script exception with its description
    Exception(String),
    /// Execution was cut short by an exit request
    Aborted,
}

impl ExecutionState {
    /// Whether the context is done and can be recycled or discarded.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Suspended(_))
    }
}

/// Per-instruction hook, consumed by debuggers and profilers.
pub trait LineHook: Send + Sync {
    fn on_line(
        &self,
        function: &str,
        line: u32,
    );
}

/// Hooks installed once per context, for the context's whole lifetime.
#[derive(Clone, Default)]
pub struct ContextHooks {
    /// Receives the call stack whenever an exception is raised
    pub exception: ExceptionSlot,
    /// Optional line callback
    pub line: Option<Arc<dyn LineHook>>,
}

impl ContextHooks {
    pub fn new(exception: ExceptionSlot) -> Self {
        Self {
            exception,
            line: None,
        }
    }

    pub fn with_line_hook(
        mut self,
        hook: Arc<dyn LineHook>,
    ) -> Self {
        self.line = Some(hook);
        self
    }
}

impl fmt::Debug for ContextHooks {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ContextHooks")
            .field("exception", &self.exception)
            .field("line", &self.line.is_some())
            .finish()
    }
}

/// One VM call stack.
pub trait ScriptContext: Send + 'static {
    /// Handle to a function the context can run.
    type Function: Clone + Send + fmt::Debug + 'static;

    /// Install the exception and line hooks.
    fn install_hooks(
        &mut self,
        hooks: ContextHooks,
    );

    /// Bind `function` as the next thing to run.
    fn prepare(
        &mut self,
        function: &Self::Function,
    ) -> EngineResult<()>;

    /// Run until the function finishes, suspends, raises or is aborted.
    fn resume(
        &mut self,
        env: &mut SupervisorEnv<'_, Self::Function>,
    ) -> ExecutionState;

    /// Drop any bound call state so the context can be reused.
    fn unprepare(&mut self);

    /// Human-readable call stack of the current position.
    fn call_stack(&self) -> String;
}

/// Something that can serialize a compiled program into a [`BinaryStream`].
pub trait ProgramSource {
    fn save_program(
        &self,
        stream: &mut dyn BinaryStream,
        strip_debug: bool,
    ) -> EngineResult<()>;
}

/// Creates fresh contexts on demand; shared with the context pool.
pub type ContextFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// Function handle type of an engine.
pub type FunctionOf<E> = <<E as ScriptEngine>::Context as ScriptContext>::Function;

/// The external virtual machine.
pub trait ScriptEngine: ProgramSource {
    type Context: ScriptContext;

    /// Number of positional engine properties.
    fn property_count(&self) -> usize;

    fn property(
        &self,
        index: usize,
    ) -> u64;

    fn set_property(
        &mut self,
        index: usize,
        value: u64,
    ) -> EngineResult<()>;

    /// Factory the context pool calls when its free list is empty.
    fn context_factory(&self) -> ContextFactory<Self::Context>;

    /// Load a program from `stream`. On success returns whether the
    /// bytecode carried debug information.
    fn load_bytecode(
        &mut self,
        stream: &mut dyn BinaryStream,
    ) -> Result<bool, BytecodeRejected>;

    /// Look a function up by its declaration, e.g. `int main()`.
    fn find_function(
        &self,
        declaration: &str,
    ) -> Option<FunctionOf<Self>>;

    /// Run global variable initialisers.
    fn initialize_globals(&mut self) -> EngineResult<()>;
}

/// Bytecode produced by an external compiler, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledProgram {
    bytes: Vec<u8>,
}

impl CompiledProgram {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ProgramSource for CompiledProgram {
    fn save_program(
        &self,
        stream: &mut dyn BinaryStream,
        _strip_debug: bool,
    ) -> EngineResult<()> {
        let written = stream.write(&self.bytes);
        if written != self.bytes.len() {
            return Err(EngineError::Save(format!(
                "stream accepted {} of {} bytes",
                written,
                self.bytes.len()
            )));
        }
        Ok(())
    }
}
