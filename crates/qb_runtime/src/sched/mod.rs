//! The process scheduler.
//!
//! A fixed pool of worker threads drains a FIFO run queue of process
//! ids. Each worker runs one process for a time slice and acts on the
//! reported outcome. The process table records states, parent/child
//! links and exit statuses; the table lock is never held across
//! instruction execution.

use std::sync::Arc;

use ahash::RandomState;
use crossbeam_deque::{Injector, Steal};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use qb_bytecode::Reg;

use crate::core::value::Value;
use crate::errors::{Fault, FaultKind};
use crate::io::{IoGateway, Wake};
use crate::modules::registry::ModuleRegistry;
use crate::modules::FunctionDef;
use crate::vm::{interp, Outcome, Process, RuntimeShared};

/// Process id. The root process is pid 1; 0 is what a forked child
/// sees, so it is never allocated.
pub type Pid = u64;

pub const ROOT_PID: Pid = 1;

/// Worker pool size when `QBRT_WORKERS` is unset.
pub const DEFAULT_WORKERS: usize = 4;

pub const WORKERS_ENV: &str = "QBRT_WORKERS";

/// Instructions per scheduling turn.
const SLICE_BUDGET: u32 = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProcState {
    Runnable,
    Running,
    Blocked,
    Terminated,
}

struct Slot {
    /// The process itself, except while a worker is running it.
    proc: Option<Process>,
    state: ProcState,
    exit: Option<i32>,
    /// Processes blocked in wait on this one: (waiter pid, dst reg).
    waiters: Vec<(Pid, Reg)>,
    /// Input that arrived while the process was running its slice.
    pending: Option<Option<String>>,
    wake_pending: bool,
}

impl Slot {
    fn runnable(proc: Process) -> Slot {
        Slot {
            proc: Some(proc),
            state: ProcState::Runnable,
            exit: None,
            waiters: Vec::new(),
            pending: None,
            wake_pending: false,
        }
    }
}

struct ProcTable {
    slots: HashMap<Pid, Slot, RandomState>,
    next_pid: Pid,
    /// Non-terminated processes. The pool shuts down at zero.
    live: usize,
    root_status: i32,
}

impl ProcTable {
    fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }
}

struct SchedState {
    queue: Injector<Pid>,
    table: Mutex<ProcTable>,
    idle: Condvar,
}

impl SchedState {
    fn enqueue(&self, table: &mut ProcTable, pid: Pid, proc: Process) {
        let slot = table.slots.get_mut(&pid).expect("enqueue of a known process");
        slot.state = ProcState::Runnable;
        slot.proc = Some(proc);
        self.queue.push(pid);
        self.idle.notify_one();
    }

    /// Records a terminal status, wakes waiters, and shuts the pool
    /// down once nothing is live.
    fn finish(&self, pid: Pid, status: i32) {
        let mut table = self.table.lock();
        let waiters = {
            let slot = table.slots.get_mut(&pid).expect("finish of a known process");
            slot.state = ProcState::Terminated;
            slot.exit = Some(status);
            slot.proc = None;
            std::mem::take(&mut slot.waiters)
        };
        for (waiter, dst) in waiters {
            let slot = table.slots.get_mut(&waiter).expect("waiter is a known process");
            if let Some(proc) = slot.proc.as_mut() {
                proc.set_reg(dst, Value::Int(status as i64));
            }
            slot.state = ProcState::Runnable;
            self.queue.push(waiter);
            self.idle.notify_one();
        }
        if pid == ROOT_PID {
            table.root_status = status;
        }
        table.live -= 1;
        if table.live == 0 {
            self.idle.notify_all();
        }
    }
}

/// Resumes processes parked on input.
impl Wake for SchedState {
    fn deliver(&self, pid: Pid, line: Option<String>) {
        let mut table = self.table.lock();
        let Some(slot) = table.slots.get_mut(&pid) else { return };
        match slot.state {
            ProcState::Blocked => {
                if let Some(proc) = slot.proc.as_mut() {
                    proc.pending_input = Some(line);
                }
                slot.state = ProcState::Runnable;
                self.queue.push(pid);
                self.idle.notify_one();
            }
            // The slice that registered the read has not been put to
            // bed yet; the worker picks this up when it parks or
            // requeues the process.
            ProcState::Running => {
                slot.pending = Some(line);
                slot.wake_pending = true;
            }
            ProcState::Runnable => {
                slot.pending = Some(line);
            }
            ProcState::Terminated => {}
        }
    }
}

pub struct Scheduler {
    shared: RuntimeShared,
    workers: usize,
}

impl Scheduler {
    pub fn new(registry: Arc<ModuleRegistry>, io: Arc<IoGateway>, workers: usize) -> Scheduler {
        Scheduler { shared: RuntimeShared { registry, io }, workers: workers.max(1) }
    }

    /// Pool size from `QBRT_WORKERS`, defaulting when unset or
    /// unparsable.
    pub fn workers_from_env() -> usize {
        std::env::var(WORKERS_ENV)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n >= 1)
            .unwrap_or(DEFAULT_WORKERS)
    }

    /// Runs the entry function as the root process and drives the pool
    /// until every process has terminated. Returns the root status.
    pub fn run(&self, entry: Arc<FunctionDef>, args: Vec<Value>) -> i32 {
        let state = Arc::new(SchedState {
            queue: Injector::new(),
            table: Mutex::new(ProcTable {
                slots: HashMap::default(),
                next_pid: ROOT_PID + 1,
                live: 1,
                root_status: 0,
            }),
            idle: Condvar::new(),
        });
        self.shared.io.set_waker(state.clone());

        {
            let mut table = state.table.lock();
            let root = Process::spawn(ROOT_PID, None, entry, args);
            table.slots.insert(ROOT_PID, Slot::runnable(root));
            state.queue.push(ROOT_PID);
        }

        std::thread::scope(|scope| {
            for _ in 0..self.workers {
                let state = &state;
                let shared = &self.shared;
                scope.spawn(move || worker_loop(state, shared));
            }
        });

        let status = state.table.lock().root_status;
        status
    }
}

fn worker_loop(state: &SchedState, shared: &RuntimeShared) {
    while let Some(pid) = next_task(state) {
        let Some(mut proc) = take_process(state, pid) else { continue };
        let outcome = interp::run(&mut proc, shared, SLICE_BUDGET);
        settle(state, shared, proc, outcome);
    }
}

/// Pops the next runnable pid, parking on the condvar when the queue
/// is dry. Returns `None` once no process is live.
fn next_task(state: &SchedState) -> Option<Pid> {
    loop {
        loop {
            match state.queue.steal() {
                Steal::Success(pid) => return Some(pid),
                Steal::Empty => break,
                Steal::Retry => {}
            }
        }
        let mut table = state.table.lock();
        if table.live == 0 {
            return None;
        }
        // Re-check under the lock: pushes happen with it held, so an
        // empty steal here really means there is nothing to run yet.
        match state.queue.steal() {
            Steal::Success(pid) => return Some(pid),
            Steal::Empty => state.idle.wait(&mut table),
            Steal::Retry => {}
        }
    }
}

fn take_process(state: &SchedState, pid: Pid) -> Option<Process> {
    let mut table = state.table.lock();
    let slot = table.slots.get_mut(&pid)?;
    let mut proc = slot.proc.take()?;
    slot.state = ProcState::Running;
    if let Some(delivered) = slot.pending.take() {
        proc.pending_input = Some(delivered);
        slot.wake_pending = false;
    }
    Some(proc)
}

/// Acts on a slice outcome. Each arm takes the table lock at most
/// once.
fn settle(state: &SchedState, shared: &RuntimeShared, mut proc: Process, outcome: Outcome) {
    let pid = proc.id;
    match outcome {
        Outcome::Yield => {
            let mut table = state.table.lock();
            state.enqueue(&mut table, pid, proc);
        }
        Outcome::Return(_) => state.finish(pid, 0),
        Outcome::Fault(fault) => {
            shared.io.error(&fault.to_string());
            state.finish(pid, 1);
        }
        Outcome::Block => {
            let mut table = state.table.lock();
            let slot = table.slots.get_mut(&pid).expect("blocking process is known");
            if slot.wake_pending {
                // The read's answer raced ahead of the park.
                slot.wake_pending = false;
                proc.pending_input = slot.pending.take();
                state.enqueue(&mut table, pid, proc);
            } else {
                slot.state = ProcState::Blocked;
                slot.proc = Some(proc);
            }
        }
        Outcome::Fork { dst } => {
            let mut table = state.table.lock();
            let child_pid = table.alloc_pid();
            let mut child = proc.fork(child_pid);
            proc.set_reg(dst, Value::Int(child_pid as i64));
            child.set_reg(dst, Value::Int(0));
            table.live += 1;
            table.slots.insert(child_pid, Slot::runnable(child));
            state.queue.push(child_pid);
            state.idle.notify_one();
            state.enqueue(&mut table, pid, proc);
        }
        Outcome::Spawn { dst, func, args } => {
            let mut table = state.table.lock();
            let child_pid = table.alloc_pid();
            let child = Process::spawn(child_pid, Some(pid), func, args);
            proc.set_reg(dst, Value::Int(child_pid as i64));
            table.live += 1;
            table.slots.insert(child_pid, Slot::runnable(child));
            state.queue.push(child_pid);
            state.idle.notify_one();
            state.enqueue(&mut table, pid, proc);
        }
        Outcome::WaitChild { dst, pid: child } => {
            let mut table = state.table.lock();
            match table.slots.get(&child).map(|s| s.exit) {
                Some(Some(status)) => {
                    proc.set_reg(dst, Value::Int(status as i64));
                    state.enqueue(&mut table, pid, proc);
                }
                Some(None) => {
                    table
                        .slots
                        .get_mut(&child)
                        .expect("child slot just observed")
                        .waiters
                        .push((pid, dst));
                    let slot = table.slots.get_mut(&pid).expect("waiting process is known");
                    slot.state = ProcState::Blocked;
                    slot.proc = Some(proc);
                }
                None => {
                    drop(table);
                    let fault = Fault::new(
                        FaultKind::TypeMismatch,
                        format!("wait on unknown pid {child}"),
                    );
                    shared.io.error(&fault.to_string());
                    state.finish(pid, 1);
                }
            }
        }
    }
}
