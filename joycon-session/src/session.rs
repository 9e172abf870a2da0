//! The session engine: poll/push threads, task queue, retry accounting.
//!
//! A [`Session`] owns one [`Transport`] and two long-lived worker threads.
//! The poll thread blocks in `recv` and offers every inbound report to the
//! queued tasks in submission order; the push thread (timed mode only)
//! re-emits the current send buffer every 16 ms so the controller keeps its
//! rumble/idle assumption.  Callers interact through [`Session::transmit`],
//! which returns a [`TaskHandle`] to wait on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{SessionError, TransportError};
use crate::Transport;

/// Verdict returned by an inspector for one inbound report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The task is satisfied; remove it from the queue.
    Done,
    /// Not this report; one retry is charged.
    Waiting,
    /// The report was handled as a side effect but the task is not finished.
    /// Does not charge the retry budget.
    Again,
    /// Protocol-level failure; the task resolves with this code.
    Error(i32),
}

/// Content predicate binding an outstanding request to inbound reports.
pub type Inspector = Box<dyn FnMut(&[u8]) -> Verdict + Send>;

/// How outgoing reports reach the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushMode {
    /// Every `transmit` sends synchronously on the caller thread.
    #[default]
    Free,
    /// `transmit` stages the report; a push thread emits it and then keeps
    /// re-emitting the last buffer at 16 ms intervals.
    Timed,
}

const PUSH_INTERVAL: Duration = Duration::from_millis(16);
const ERROR_DOZE: Duration = Duration::from_millis(100);
const MAX_CONSECUTIVE_ERRORS: u32 = 100;

// ---- Completion slots ----

/// One-shot completion cell a caller can block on.
struct Slot {
    result: Mutex<Option<Result<(), SessionError>>>,
    cond: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// First completion wins; later calls are ignored.
    fn complete(&self, outcome: Result<(), SessionError>) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(outcome);
            self.cond.notify_all();
        }
    }

    fn wait(&self) -> Result<(), SessionError> {
        let mut result = self.result.lock();
        while result.is_none() {
            self.cond.wait(&mut result);
        }
        result.clone().unwrap_or(Err(SessionError::Aborted))
    }

    fn reset(&self) {
        *self.result.lock() = None;
    }
}

/// Free list of completion slots so the transmit path does not allocate
/// once warmed up.
struct SlotPool {
    free: Mutex<Vec<Arc<Slot>>>,
    outstanding: AtomicUsize,
}

impl SlotPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn get(&self) -> Arc<Slot> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| Arc::new(Slot::new()))
    }

    fn put(&self, slot: Arc<Slot>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        // Only recycle once the session side has released its clone;
        // otherwise a queued task could complete into a reused slot.
        if Arc::strong_count(&slot) == 1 {
            slot.reset();
            self.free.lock().push(slot);
        }
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.outstanding.load(Ordering::Acquire),
            0,
            "slot pool dropped with outstanding task handles"
        );
    }
}

// ---- Tasks ----

struct Task {
    retry: i64,
    inspector: Option<Inspector>,
    slot: Arc<Slot>,
}

impl Task {
    /// One predicate invocation for one inbound report.
    /// Returns `true` when the task reached a terminal state.
    fn test(&mut self, report: &[u8]) -> bool {
        let budget = self.retry;
        self.retry -= 1;
        if budget < 1 {
            self.slot.complete(Err(SessionError::TimedOut));
            return true;
        }
        let Some(inspector) = self.inspector.as_mut() else {
            // No one cares about the content.
            self.slot.complete(Ok(()));
            return true;
        };
        match inspector(report) {
            Verdict::Done => {
                self.slot.complete(Ok(()));
                true
            }
            Verdict::Again => {
                // Undo the charge: side-effect progress is not a miss.
                self.retry += 1;
                false
            }
            Verdict::Waiting => false,
            Verdict::Error(code) => {
                self.slot.complete(Err(SessionError::Inspector(code)));
                true
            }
        }
    }

    fn abort(&self) {
        self.slot.complete(Err(SessionError::Aborted));
    }
}

// ---- Shared session state ----

struct SendState {
    buf: Vec<u8>,
    /// Timed mode: a staged task waiting for the push thread to emit it.
    pending: Option<Task>,
    /// Timed mode: the buffer holds a report worth re-emitting.
    primed: bool,
}

struct Shared {
    alive: AtomicBool,
    mode: PushMode,
    timer: AtomicU8,
    transport: Box<dyn Transport>,
    send: Mutex<SendState>,
    push_cond: Condvar,
    tasks: Mutex<VecDeque<Task>>,
    pool: Arc<SlotPool>,
}

impl Shared {
    /// Stamp the rolling timer byte and write the send buffer out.
    /// The timer is assigned here, at physical send time, so timed-mode
    /// re-emissions carry fresh values.
    fn send_locked(&self, state: &mut SendState) -> Result<usize, TransportError> {
        if state.buf.len() > 1 {
            state.buf[1] = self.timer.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        }
        self.transport.send(&state.buf)
    }

    fn enqueue(&self, task: Task) {
        if !self.alive.load(Ordering::Acquire) {
            task.abort();
            return;
        }
        self.tasks.lock().push_back(task);
    }

    /// Route a task that has just been sent: inspectors go to the poll
    /// queue, fire-and-forget resolves immediately.
    fn settle_sent(&self, task: Task) {
        if task.inspector.is_some() {
            self.enqueue(task);
        } else {
            task.slot.complete(Ok(()));
        }
    }
}

// ---- Worker loops ----

fn poll_loop(shared: Arc<Shared>) {
    debug!("enter poll thread");
    let mut buf = vec![0u8; shared.transport.recv_size()];
    let mut err_count = 0u32;
    while shared.alive.load(Ordering::Acquire) {
        match shared.transport.recv(&mut buf) {
            Ok(0) => continue, // poll tick, re-check alive
            Ok(_) => {
                err_count = 0;
                let mut tasks = shared.tasks.lock();
                let mut i = 0;
                while i < tasks.len() {
                    if tasks[i].test(&buf) {
                        tasks.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            Err(e) => {
                err_count += 1;
                debug!("recv error {e}, err_count {err_count}");
                if err_count > MAX_CONSECUTIVE_ERRORS {
                    warn!("transport keeps failing, dozing");
                    std::thread::sleep(ERROR_DOZE);
                }
            }
        }
    }
    debug!("exit poll thread");
}

fn push_loop(shared: Arc<Shared>) {
    debug!("enter push thread");
    while shared.alive.load(Ordering::Acquire) {
        {
            let mut send = shared.send.lock();
            if let Some(task) = send.pending.take() {
                match shared.send_locked(&mut send) {
                    Ok(_) => {
                        drop(send);
                        shared.settle_sent(task);
                    }
                    Err(e) => {
                        debug!("push send error {e}");
                        task.slot.complete(Err(SessionError::Transport(e)));
                        drop(send);
                    }
                }
                shared.push_cond.notify_one();
            } else if send.primed {
                if let Err(e) = shared.send_locked(&mut send) {
                    debug!("push re-emit error {e}");
                }
            }
        }
        std::thread::sleep(PUSH_INTERVAL);
    }
    debug!("exit push thread");
}

// ---- Public surface ----

/// A full-duplex request/response session over one transport.
pub struct Session {
    inner: Arc<Shared>,
    poll: Option<JoinHandle<()>>,
    push: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(transport: Box<dyn Transport>, mode: PushMode) -> Session {
        debug!("create session");
        let send_len = crate::OUTPUT_REPORT_LEN;
        let shared = Arc::new(Shared {
            alive: AtomicBool::new(true),
            mode,
            timer: AtomicU8::new(0),
            transport,
            send: Mutex::new(SendState {
                buf: vec![0u8; send_len],
                pending: None,
                primed: false,
            }),
            push_cond: Condvar::new(),
            tasks: Mutex::new(VecDeque::new()),
            pool: Arc::new(SlotPool::new()),
        });

        let poll_shared = Arc::clone(&shared);
        let poll = std::thread::Builder::new()
            .name("joycon-session-poll".into())
            .spawn(move || poll_loop(poll_shared))
            .expect("failed to spawn session poll thread");

        let push = match mode {
            PushMode::Free => None,
            PushMode::Timed => {
                let push_shared = Arc::clone(&shared);
                Some(
                    std::thread::Builder::new()
                        .name("joycon-session-push".into())
                        .spawn(move || push_loop(push_shared))
                        .expect("failed to spawn session push thread"),
                )
            }
        };

        Session {
            inner: shared,
            poll: Some(poll),
            push,
        }
    }

    /// Submit one exchange.
    ///
    /// - `bytes` + `inspector`: send, then match inbound reports until the
    ///   inspector is satisfied or `retry` evaluations are spent.
    /// - `bytes` only: fire-and-forget, resolves once the send returns.
    /// - `inspector` only: match inbound reports without sending anything.
    /// - neither: resolves immediately.
    ///
    /// Dropping the returned handle abandons the task; it still drains
    /// through its retry budget but the outcome is discarded.
    pub fn transmit(
        &self,
        retry: u32,
        bytes: Option<&[u8]>,
        inspector: Option<Inspector>,
    ) -> TaskHandle {
        let shared = &self.inner;
        let slot = shared.pool.get();
        let handle = TaskHandle {
            slot: Some(Arc::clone(&slot)),
            pool: Arc::clone(&shared.pool),
        };
        let task = Task {
            retry: i64::from(retry),
            inspector,
            slot,
        };
        if !shared.alive.load(Ordering::Acquire) {
            task.abort();
            return handle;
        }

        match bytes {
            Some(out) => match shared.mode {
                PushMode::Free => {
                    let mut send = shared.send.lock();
                    stage(&mut send.buf, out);
                    match shared.send_locked(&mut send) {
                        Ok(_) => {
                            drop(send);
                            shared.settle_sent(task);
                        }
                        Err(e) => {
                            trace!("send failed: {e}");
                            task.slot.complete(Err(SessionError::Transport(e)));
                        }
                    }
                }
                PushMode::Timed => {
                    let mut send = shared.send.lock();
                    while send.pending.is_some() {
                        if !shared.alive.load(Ordering::Acquire) {
                            task.abort();
                            return handle;
                        }
                        shared.push_cond.wait(&mut send);
                    }
                    if !shared.alive.load(Ordering::Acquire) {
                        task.abort();
                        return handle;
                    }
                    stage(&mut send.buf, out);
                    send.primed = true;
                    send.pending = Some(task);
                }
            },
            None => {
                if task.inspector.is_some() {
                    shared.enqueue(task);
                } else {
                    task.slot.complete(Ok(()));
                }
            }
        }
        handle
    }

    /// A cloneable handle that stamps the timer and writes a report straight
    /// to the transport, without touching the task queue.  Inspectors use
    /// this to emit acknowledgements from the poll thread.
    pub fn sender(&self) -> SessionSender {
        SessionSender {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("destroy session");
        self.inner.alive.store(false, Ordering::Release);
        self.inner.push_cond.notify_all();
        if let Some(handle) = self.poll.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.push.take() {
            let _ = handle.join();
        }
        if let Some(task) = self.inner.send.lock().pending.take() {
            task.abort();
        }
        let mut tasks = self.inner.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
        debug!("destroy session done");
    }
}

fn stage(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0);
}

/// Completion handle for one transmitted task.
pub struct TaskHandle {
    slot: Option<Arc<Slot>>,
    pool: Arc<SlotPool>,
}

impl TaskHandle {
    /// Block until the task reaches a terminal state.
    pub fn wait(mut self) -> Result<(), SessionError> {
        let Some(slot) = self.slot.take() else {
            return Err(SessionError::Aborted);
        };
        let result = slot.wait();
        self.pool.put(slot);
        result
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.put(slot);
        }
    }
}

/// Raw-send handle detached from the session's task machinery.
#[derive(Clone)]
pub struct SessionSender {
    inner: Arc<Shared>,
}

impl SessionSender {
    pub fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut send = self.inner.send.lock();
        stage(&mut send.buf, bytes);
        self.inner.send_locked(&mut send).map(|_| ())
    }
}
