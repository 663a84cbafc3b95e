//! Cooperative supervisor
//!
//! Drives a set of contexts on one thread. Each pass resumes every ready
//! context once, in FIFO order. Suspended contexts go back to the ready
//! queue, to a deadline heap, or to a per-event wait list.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::engine::{EngineResult, EventId, ExecutionState, ScriptContext, Suspension};
use crate::runtime::pool::ContextPool;

/// Longest the supervisor blocks while nothing is runnable.
pub const IDLE_POLL: Duration = Duration::from_millis(100);

/// Identifier of a context owned by a supervisor.
pub type ContextId = u64;

#[derive(Debug, Default)]
struct ExitState {
    requested: AtomicBool,
    code: AtomicI32,
}

/// Shared request to stop the whole program with an exit code.
///
/// The last requested code wins.
#[derive(Debug, Clone, Default)]
pub struct ExitHandle(Arc<ExitState>);

impl ExitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(
        &self,
        code: i32,
    ) {
        self.0.code.store(code, Ordering::SeqCst);
        self.0.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.requested.load(Ordering::SeqCst)
    }

    pub fn code(&self) -> i32 {
        self.0.code.load(Ordering::SeqCst)
    }
}

/// Delivers events to a running supervisor from other threads.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<EventId>,
    _token: Arc<()>,
}

impl EventSender {
    /// Returns false once the supervisor is gone.
    pub fn send(
        &self,
        event: EventId,
    ) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// What a context may ask of the supervisor while it is being resumed.
pub struct SupervisorEnv<'a, F> {
    spawned: Vec<F>,
    signalled: Vec<EventId>,
    exit: &'a ExitHandle,
    now: Instant,
}

impl<'a, F> SupervisorEnv<'a, F> {
    pub fn new(exit: &'a ExitHandle) -> Self {
        Self {
            spawned: Vec::new(),
            signalled: Vec::new(),
            exit,
            now: Instant::now(),
        }
    }

    /// Start `function` on a new context after this resume returns.
    pub fn spawn(
        &mut self,
        function: F,
    ) {
        self.spawned.push(function);
    }

    /// Wake every context waiting on `event`. Latched if nobody waits yet.
    pub fn signal(
        &mut self,
        event: EventId,
    ) {
        self.signalled.push(event);
    }

    /// Ask for the program to stop. The caller should return
    /// [`ExecutionState::Aborted`].
    pub fn request_exit(
        &self,
        code: i32,
    ) {
        self.exit.request(code);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit.is_requested()
    }

    /// Time the resume started.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn spawned(&self) -> &[F] {
        &self.spawned
    }

    pub fn signalled(&self) -> &[EventId] {
        &self.signalled
    }

    fn into_parts(self) -> (Vec<F>, Vec<EventId>) {
        (self.spawned, self.signalled)
    }
}

/// Single-threaded cooperative scheduler over pooled contexts.
pub struct Supervisor<'p, C: ScriptContext> {
    pool: &'p ContextPool<C>,
    exit: ExitHandle,
    active: HashMap<ContextId, Box<C>>,
    ready: VecDeque<ContextId>,
    sleeping: BinaryHeap<Reverse<(Instant, ContextId)>>,
    waiting: HashMap<EventId, Vec<ContextId>>,
    latched: HashSet<EventId>,
    retained: HashSet<ContextId>,
    finished: HashMap<ContextId, (ExecutionState, Option<Box<C>>)>,
    events_tx: Sender<EventId>,
    events_rx: Receiver<EventId>,
    sender_token: Arc<()>,
    next_id: ContextId,
    idle_poll: Duration,
}

impl<'p, C: ScriptContext> Supervisor<'p, C> {
    pub fn new(
        pool: &'p ContextPool<C>,
        exit: ExitHandle,
    ) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            pool,
            exit,
            active: HashMap::new(),
            ready: VecDeque::new(),
            sleeping: BinaryHeap::new(),
            waiting: HashMap::new(),
            latched: HashSet::new(),
            retained: HashSet::new(),
            finished: HashMap::new(),
            events_tx,
            events_rx,
            sender_token: Arc::new(()),
            next_id: 1,
            idle_poll: IDLE_POLL,
        }
    }

    /// Cap on how long one idle wait may block.
    pub fn with_idle_poll(
        mut self,
        idle_poll: Duration,
    ) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn exit_handle(&self) -> &ExitHandle {
        &self.exit
    }

    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.events_tx.clone(),
            _token: Arc::clone(&self.sender_token),
        }
    }

    /// Contexts that have not reached a terminal state.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Prepare `function` on a pooled context and queue it.
    ///
    /// A retained context keeps its final state and is not returned to the
    /// pool; see [`Supervisor::state`] and [`Supervisor::take_context`].
    pub fn add_context(
        &mut self,
        function: &C::Function,
        retain: bool,
    ) -> EngineResult<ContextId> {
        let mut ctx = self.pool.acquire();
        if let Err(e) = ctx.prepare(function) {
            self.pool.release(ctx);
            return Err(e);
        }
        let id = self.next_id;
        self.next_id += 1;
        if retain {
            self.retained.insert(id);
        }
        self.active.insert(id, ctx);
        self.ready.push_back(id);
        trace!("context {} queued for {:?}", id, function);
        Ok(id)
    }

    /// Final state of a retained context, once it has one.
    pub fn state(
        &self,
        id: ContextId,
    ) -> Option<&ExecutionState> {
        self.finished.get(&id).map(|(state, _)| state)
    }

    /// Take a retained context that finished or threw. Aborted contexts are
    /// dropped, so there is nothing to take.
    pub fn take_context(
        &mut self,
        id: ContextId,
    ) -> Option<Box<C>> {
        self.finished.get_mut(&id).and_then(|(_, ctx)| ctx.take())
    }

    /// Run one pass. Returns false once nothing can run any more, either
    /// because every context reached a terminal state, exit was requested,
    /// or the remaining contexts wait on events nobody can send.
    pub fn execute_scripts(&mut self) -> bool {
        if self.exit.is_requested() {
            self.abort_all();
            return false;
        }

        self.drain_external_events();
        self.wake_sleepers(Instant::now());

        if self.ready.is_empty() {
            if self.active.is_empty() {
                return false;
            }
            return self.wait_for_work();
        }

        let pass = std::mem::take(&mut self.ready);
        for id in pass {
            let Some(mut ctx) = self.active.remove(&id) else {
                continue;
            };

            let mut env = SupervisorEnv::new(&self.exit);
            let state = ctx.resume(&mut env);
            let now = env.now();
            let (spawned, signalled) = env.into_parts();

            for function in spawned {
                if let Err(e) = self.add_context(&function, false) {
                    warn!("could not start {:?}: {}", function, e);
                }
            }
            for event in signalled {
                self.deliver(event);
            }

            self.settle(id, ctx, state, now);

            if self.exit.is_requested() {
                self.abort_all();
                return false;
            }
        }

        !self.active.is_empty()
    }

    /// Run passes until [`Supervisor::execute_scripts`] returns false.
    pub fn run_to_completion(&mut self) {
        while self.execute_scripts() {}
    }

    /// Drop every unfinished context without returning it to the pool.
    pub fn abort_all(&mut self) {
        let aborted: Vec<ContextId> = self.active.keys().copied().collect();
        if !aborted.is_empty() {
            debug!("aborting {} contexts", aborted.len());
        }
        for id in aborted {
            self.active.remove(&id);
            if self.retained.contains(&id) {
                self.finished.insert(id, (ExecutionState::Aborted, None));
            }
        }
        self.ready.clear();
        self.sleeping.clear();
        self.waiting.clear();
    }

    fn settle(
        &mut self,
        id: ContextId,
        ctx: Box<C>,
        state: ExecutionState,
        now: Instant,
    ) {
        match state {
            ExecutionState::Suspended(suspension) => {
                self.active.insert(id, ctx);
                match suspension {
                    Suspension::Yield => self.ready.push_back(id),
                    Suspension::Sleep(duration) => {
                        self.sleeping.push(Reverse((now + duration, id)));
                    }
                    Suspension::WaitEvent(event) => {
                        if self.latched.remove(&event) {
                            self.ready.push_back(id);
                        } else {
                            self.waiting.entry(event).or_default().push(id);
                        }
                    }
                }
            }
            terminal => {
                let keep = self.retained.contains(&id);
                if let ExecutionState::Exception(message) = &terminal {
                    if !keep {
                        warn!("context {} stopped on an exception: {}", id, message);
                    }
                }
                match (keep, terminal) {
                    // aborted contexts are never reused
                    (true, ExecutionState::Aborted) => {
                        self.finished.insert(id, (ExecutionState::Aborted, None));
                    }
                    (false, ExecutionState::Aborted) => {}
                    (true, state) => {
                        self.finished.insert(id, (state, Some(ctx)));
                    }
                    (false, _) => self.pool.release(ctx),
                }
            }
        }
    }

    fn deliver(
        &mut self,
        event: EventId,
    ) {
        match self.waiting.remove(&event) {
            Some(waiters) => {
                trace!("event {:?} wakes {} contexts", event, waiters.len());
                self.ready.extend(waiters);
            }
            None => {
                self.latched.insert(event);
            }
        }
    }

    fn drain_external_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.deliver(event);
        }
    }

    fn wake_sleepers(
        &mut self,
        now: Instant,
    ) {
        while let Some(Reverse((deadline, id))) = self.sleeping.peek().copied() {
            if deadline > now {
                break;
            }
            self.sleeping.pop();
            self.ready.push_back(id);
        }
    }

    /// Block until a sleeper is due, an event arrives, or the poll cap runs
    /// out. Returns false when only event waiters remain and no sender is
    /// left that could wake them.
    fn wait_for_work(&mut self) -> bool {
        let next_deadline = self.sleeping.peek().map(|Reverse((deadline, _))| *deadline);
        if next_deadline.is_none()
            && Arc::strong_count(&self.sender_token) == 1
            && self.events_rx.is_empty()
        {
            debug!(
                "{} contexts wait on events that can no longer arrive",
                self.active.len()
            );
            return false;
        }

        let timeout = next_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .map_or(self.idle_poll, |due| due.min(self.idle_poll));
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => self.deliver(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
        true
    }
}

impl<C: ScriptContext> Drop for Supervisor<'_, C> {
    fn drop(&mut self) {
        for (_, (_, ctx)) in self.finished.drain() {
            if let Some(ctx) = ctx {
                self.pool.release(ctx);
            }
        }
        for (_, ctx) in self.active.drain() {
            self.pool.release(ctx);
        }
    }
}
