//! Deterministic stand-in for the external VM
//!
//! A [`ScriptedEngine`] runs "functions" that are flat lists of [`Step`]s.
//! It serializes its program through the same [`BinaryStream`] seam as a
//! real VM, so a program saved by one engine can be packed, located and
//! loaded into a fresh one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::codec::encode_varint;
use crate::runtime::scheduler::SupervisorEnv;

use super::properties::{EnginePropertyTable, PROPERTY_COUNT};
use super::{
    BinaryStream, BytecodeRejected, ContextFactory, ContextHooks, EngineError, EngineResult,
    EventId, ExecutionState, ProgramSource, ReturnValue, ScriptContext, ScriptEngine, Suspension,
};

/// One instruction of a scripted function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Yield,
    Sleep(Duration),
    Wait(EventId),
    Signal(EventId),
    /// Start another function on its own context
    Spawn(String),
    /// Request process exit with a code
    Exit(i32),
    Throw(String),
    /// Request exit, then raise before the context can be aborted
    ExitThenThrow(i32, String),
    /// Line cue; dropped when debug info is stripped
    Line(u32),
    /// Append to the engine journal
    Log(String),
    Return(ReturnValue),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ScriptProgram {
    debug: bool,
    functions: BTreeMap<String, Arc<Vec<Step>>>,
}

impl ScriptProgram {
    fn stripped(&self) -> Self {
        let functions = self
            .functions
            .iter()
            .map(|(decl, steps)| {
                let kept: Vec<Step> = steps
                    .iter()
                    .filter(|s| !matches!(s, Step::Line(_)))
                    .cloned()
                    .collect();
                (decl.clone(), Arc::new(kept))
            })
            .collect();
        Self {
            debug: false,
            functions,
        }
    }

    fn lookup(
        &self,
        declaration: &str,
    ) -> Option<ScriptedFunction> {
        self.functions
            .get(declaration)
            .map(|steps| ScriptedFunction {
                declaration: declaration.to_string(),
                steps: Arc::clone(steps),
            })
    }
}

/// Function handle of the scripted engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedFunction {
    declaration: String,
    steps: Arc<Vec<Step>>,
}

impl ScriptedFunction {
    pub fn declaration(&self) -> &str {
        &self.declaration
    }
}

type Journal = Arc<Mutex<Vec<String>>>;

/// Scripted engine; see the module docs.
#[derive(Debug)]
pub struct ScriptedEngine {
    program: Arc<RwLock<ScriptProgram>>,
    properties: Vec<u64>,
    globals_error: Option<String>,
    rejected_property: Option<usize>,
    journal: Journal,
    contexts_created: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    /// Engine with no functions and baseline properties.
    pub fn new() -> Self {
        Self::with_property_count(PROPERTY_COUNT)
    }

    /// Engine exposing `count` property slots.
    pub fn with_property_count(count: usize) -> Self {
        let mut properties = EnginePropertyTable::baseline().values().to_vec();
        properties.resize(count, 0);
        Self {
            program: Arc::new(RwLock::new(ScriptProgram {
                debug: true,
                functions: BTreeMap::new(),
            })),
            properties,
            globals_error: None,
            rejected_property: None,
            journal: Arc::default(),
            contexts_created: Arc::default(),
        }
    }

    /// Add or replace a function.
    pub fn function(
        self,
        declaration: &str,
        steps: Vec<Step>,
    ) -> Self {
        self.program
            .write()
            .functions
            .insert(declaration.to_string(), Arc::new(steps));
        self
    }

    /// Make global initialisation fail with `reason`.
    pub fn failing_globals(
        mut self,
        reason: &str,
    ) -> Self {
        self.globals_error = Some(reason.to_string());
        self
    }

    /// Make `set_property` refuse any value for `index`.
    pub fn rejecting_property(
        mut self,
        index: usize,
    ) -> Self {
        self.rejected_property = Some(index);
        self
    }

    /// Everything logged by contexts, in order.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Shared view of the journal that outlives the engine borrow.
    pub fn journal_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.journal)
    }

    /// How many contexts the factory has built.
    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    /// Declarations of every loaded function.
    pub fn declarations(&self) -> Vec<String> {
        self.program.read().functions.keys().cloned().collect()
    }

    /// Whether the loaded program carries line cues.
    pub fn has_debug_info(&self) -> bool {
        self.program.read().debug
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramSource for ScriptedEngine {
    fn save_program(
        &self,
        stream: &mut dyn BinaryStream,
        strip_debug: bool,
    ) -> EngineResult<()> {
        let program = if strip_debug {
            self.program.read().stripped()
        } else {
            self.program.read().clone()
        };
        let body = serde_json::to_vec(&program).map_err(|e| EngineError::Save(e.to_string()))?;
        let mut out = Vec::with_capacity(body.len() + 10);
        encode_varint(body.len() as u64, &mut out);
        out.extend_from_slice(&body);
        let written = stream.write(&out);
        if written != out.len() {
            return Err(EngineError::Save(format!(
                "stream accepted {} of {} bytes",
                written,
                out.len()
            )));
        }
        Ok(())
    }
}

/// Tracks how far into the stream the loader got.
struct CountingStream<'a> {
    inner: &'a mut dyn BinaryStream,
    offset: u64,
}

impl CountingStream<'_> {
    fn read_exact(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(), BytecodeRejected> {
        let n = self.inner.read(buf);
        self.offset += n as u64;
        if n != buf.len() {
            return Err(self.reject("unexpected end of bytecode"));
        }
        Ok(())
    }

    fn reject(
        &self,
        reason: &str,
    ) -> BytecodeRejected {
        BytecodeRejected {
            offset: self.offset,
            reason: reason.to_string(),
        }
    }
}

impl ScriptEngine for ScriptedEngine {
    type Context = ScriptedContext;

    fn property_count(&self) -> usize {
        self.properties.len()
    }

    fn property(
        &self,
        index: usize,
    ) -> u64 {
        self.properties.get(index).copied().unwrap_or(0)
    }

    fn set_property(
        &mut self,
        index: usize,
        value: u64,
    ) -> EngineResult<()> {
        let count = self.properties.len();
        if self.rejected_property == Some(index) {
            return Err(EngineError::PropertyValue {
                index,
                value,
                reason: "read-only property".to_string(),
            });
        }
        match self.properties.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EngineError::PropertyIndex { index, count }),
        }
    }

    fn context_factory(&self) -> ContextFactory<ScriptedContext> {
        let program = Arc::clone(&self.program);
        let journal = Arc::clone(&self.journal);
        let created = Arc::clone(&self.contexts_created);
        Arc::new(move || {
            let id = created.fetch_add(1, Ordering::SeqCst);
            ScriptedContext {
                id,
                program: Arc::clone(&program),
                journal: Arc::clone(&journal),
                hooks: None,
                current: None,
            }
        })
    }

    fn load_bytecode(
        &mut self,
        stream: &mut dyn BinaryStream,
    ) -> Result<bool, BytecodeRejected> {
        let mut counting = CountingStream {
            inner: stream,
            offset: 0,
        };

        let mut len = 0u64;
        let mut shift = 0;
        loop {
            let mut byte = [0u8; 1];
            counting.read_exact(&mut byte)?;
            if shift > 63 {
                return Err(counting.reject("length prefix overflows"));
            }
            len |= u64::from(byte[0] & 0x7F) << shift;
            shift += 7;
            if byte[0] & 0x80 == 0 {
                break;
            }
        }

        let mut body = Vec::new();
        let mut remaining = len;
        let mut chunk = [0u8; 4096];
        while remaining > 0 {
            let take = remaining.min(chunk.len() as u64) as usize;
            counting.read_exact(&mut chunk[..take])?;
            body.extend_from_slice(&chunk[..take]);
            remaining -= take as u64;
        }

        let program: ScriptProgram =
            serde_json::from_slice(&body).map_err(|e| counting.reject(&e.to_string()))?;
        let debug = program.debug;
        *self.program.write() = program;
        Ok(debug)
    }

    fn find_function(
        &self,
        declaration: &str,
    ) -> Option<ScriptedFunction> {
        self.program.read().lookup(declaration)
    }

    fn initialize_globals(&mut self) -> EngineResult<()> {
        if let Some(reason) = &self.globals_error {
            return Err(EngineError::Globals(reason.clone()));
        }
        self.journal.lock().push("globals".to_string());
        Ok(())
    }
}

#[derive(Debug)]
struct Running {
    function: ScriptedFunction,
    pc: usize,
    line: u32,
}

/// Context of the scripted engine.
pub struct ScriptedContext {
    id: usize,
    program: Arc<RwLock<ScriptProgram>>,
    journal: Journal,
    hooks: Option<ContextHooks>,
    current: Option<Running>,
}

impl ScriptedContext {
    /// Creation order of this context within its engine.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_prepared(&self) -> bool {
        self.current.is_some()
    }

    fn raise(
        &self,
        message: String,
    ) -> ExecutionState {
        if let Some(hooks) = &self.hooks {
            hooks.exception.record(self.call_stack());
        }
        ExecutionState::Exception(message)
    }
}

impl ScriptContext for ScriptedContext {
    type Function = ScriptedFunction;

    fn install_hooks(
        &mut self,
        hooks: ContextHooks,
    ) {
        self.hooks = Some(hooks);
    }

    fn prepare(
        &mut self,
        function: &ScriptedFunction,
    ) -> EngineResult<()> {
        if self.current.is_some() {
            return Err(EngineError::Prepare(format!(
                "context {} is still bound to a function",
                self.id
            )));
        }
        self.current = Some(Running {
            function: function.clone(),
            pc: 0,
            line: 0,
        });
        Ok(())
    }

    fn resume(
        &mut self,
        env: &mut SupervisorEnv<'_, ScriptedFunction>,
    ) -> ExecutionState {
        let (steps, declaration) = match &self.current {
            Some(run) => (
                Arc::clone(&run.function.steps),
                run.function.declaration.clone(),
            ),
            None => return self.raise("context resumed without a function".to_string()),
        };

        loop {
            let Some(run) = self.current.as_mut() else {
                return ExecutionState::Finished(ReturnValue::Void);
            };
            let Some(step) = steps.get(run.pc).cloned() else {
                return ExecutionState::Finished(ReturnValue::Void);
            };
            run.pc += 1;

            match step {
                Step::Yield => return ExecutionState::Suspended(Suspension::Yield),
                Step::Sleep(d) => return ExecutionState::Suspended(Suspension::Sleep(d)),
                Step::Wait(event) => {
                    return ExecutionState::Suspended(Suspension::WaitEvent(event))
                }
                Step::Signal(event) => env.signal(event),
                Step::Spawn(target) => match self.program.read().lookup(&target) {
                    Some(function) => env.spawn(function),
                    None => {
                        return self.raise(format!("No function matching '{}'", target));
                    }
                },
                Step::Exit(code) => {
                    env.request_exit(code);
                    return ExecutionState::Aborted;
                }
                Step::Throw(message) => return self.raise(message),
                Step::ExitThenThrow(code, message) => {
                    env.request_exit(code);
                    return self.raise(message);
                }
                Step::Line(line) => {
                    run.line = line;
                    if let Some(hook) = self.hooks.as_ref().and_then(|h| h.line.as_ref()) {
                        hook.on_line(&declaration, line);
                    }
                }
                Step::Log(text) => self.journal.lock().push(text),
                Step::Return(value) => return ExecutionState::Finished(value),
            }
        }
    }

    fn unprepare(&mut self) {
        self.current = None;
    }

    fn call_stack(&self) -> String {
        match &self.current {
            Some(run) => format!(
                "{} (line {}, step {})",
                run.function.declaration, run.line, run.pc
            ),
            None => String::new(),
        }
    }
}
