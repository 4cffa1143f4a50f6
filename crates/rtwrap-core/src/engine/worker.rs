//! Worker offload: run a unit's slow jobs off the audio thread
//!
//! ```text
//!   audio thread                          worker thread
//!   ────────────                          ─────────────
//!   schedule(req) ──frame──► requests ──► WorkHandler::work(req, respond)
//!        │ try_lock + notify_one                         │
//!        ▼                                               ▼
//!   drain_responses ◄────── responses ◄──frame── respond(body)
//!        │
//!        ▼
//!   unit.work_response(body, ports) ... outputs ... unit.end_run()
//! ```
//!
//! The audio thread never blocks: waking the worker is a `try_lock`, and if
//! the worker is busy it will find the request on its own before it sleeps
//! again. The worker additionally polls at [`WORKER_POLL_INTERVAL`] so a wake
//! lost in that window costs at most one interval.
//!
//! While the driver is freewheeling (offline render) there is no deadline, so
//! requests are executed synchronously on the calling thread instead.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::plugin::{HostError, HostResult, WorkHandler, WorkStatus};
use crate::ring::{Consumer, FrameRead, Producer, RingBuffer};
use crate::types::{WORKER_MAX_MESSAGE, WORKER_RING_SIZE};

/// Upper bound on how long a scheduled request can sit unnoticed
pub const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lifecycle of the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Started, not yet waiting
    Idle = 0,
    /// Sleeping on the condition variable
    Waiting = 1,
    /// Running a request
    Processing = 2,
    /// Thread has exited
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Waiting,
            2 => WorkerState::Processing,
            3 => WorkerState::Stopped,
            _ => WorkerState::Idle,
        }
    }
}

/// Wake-up plumbing shared by both sides
struct WorkerShared {
    /// Held by the worker whenever it is not waiting
    lock: Mutex<()>,
    ready: Condvar,
    exit: AtomicBool,
    state: AtomicU8,
}

impl WorkerShared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

/// Handler plus the ring ends only the executing side may touch
struct WorkerCore {
    handler: Box<dyn WorkHandler>,
    requests: Consumer<u8>,
    responses: Producer<u8>,
    request_buf: Vec<u8>,
}

impl WorkerCore {
    /// Execute every complete request in the ring; returns how many ran
    fn process_pending(&mut self, shared: &WorkerShared) -> usize {
        let WorkerCore {
            handler,
            requests,
            responses,
            request_buf,
        } = self;
        let mut handled = 0;
        loop {
            match requests.read_frame(request_buf) {
                FrameRead::Empty => return handled,
                FrameRead::Discarded(len) => {
                    log::warn!("[WORKER] Discarding oversized request ({} bytes)", len);
                }
                FrameRead::Complete(len) => {
                    shared.set_state(WorkerState::Processing);
                    execute(handler.as_mut(), responses, &request_buf[..len]);
                    handled += 1;
                }
            }
        }
    }
}

fn execute(handler: &mut dyn WorkHandler, responses: &mut Producer<u8>, request: &[u8]) {
    let mut respond = |body: &[u8]| {
        if body.len() > WORKER_MAX_MESSAGE {
            log::warn!("[WORKER] Response of {} bytes exceeds limit", body.len());
            return false;
        }
        responses.write_frame(body)
    };
    match handler.work(request, &mut respond) {
        WorkStatus::Success => {}
        WorkStatus::NoSpace => log::warn!("[WORKER] Response ring full, response dropped"),
        WorkStatus::Error => log::warn!("[WORKER] Work request failed ({} bytes)", request.len()),
    }
}

/// Owner of the worker thread (lives on the control thread)
pub struct Worker {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

/// Audio-thread half: schedule requests, collect responses
pub struct WorkScheduler {
    requests: Producer<u8>,
    responses: Consumer<u8>,
    shared: Arc<WorkerShared>,
    core: Arc<Mutex<WorkerCore>>,
    freewheel: bool,
    response_buf: Box<[u8]>,
}

impl Worker {
    /// Start the worker thread for `handler`
    pub fn spawn(handler: Box<dyn WorkHandler>) -> HostResult<(Worker, WorkScheduler)> {
        let (request_tx, request_rx) = RingBuffer::<u8>::new(WORKER_RING_SIZE);
        let (response_tx, response_rx) = RingBuffer::<u8>::new(WORKER_RING_SIZE);

        let shared = Arc::new(WorkerShared {
            lock: Mutex::new(()),
            ready: Condvar::new(),
            exit: AtomicBool::new(false),
            state: AtomicU8::new(WorkerState::Idle as u8),
        });
        let core = Arc::new(Mutex::new(WorkerCore {
            handler,
            requests: request_rx,
            responses: response_tx,
            request_buf: vec![0; WORKER_MAX_MESSAGE],
        }));

        let thread = {
            let shared = Arc::clone(&shared);
            let core = Arc::clone(&core);
            thread::Builder::new()
                .name("rtwrap-worker".to_string())
                .spawn(move || worker_loop(&shared, &core))
                .map_err(|source| HostError::ThreadSpawn {
                    name: "worker",
                    source,
                })?
        };
        log::info!("[WORKER] Worker thread started");

        let scheduler = WorkScheduler {
            requests: request_tx,
            responses: response_rx,
            shared: Arc::clone(&shared),
            core,
            freewheel: false,
            response_buf: vec![0; WORKER_MAX_MESSAGE].into_boxed_slice(),
        };
        Ok((
            Worker {
                shared,
                thread: Some(thread),
            },
            scheduler,
        ))
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.shared.state.load(Ordering::Relaxed))
    }

    /// Stop the thread; requests still queued are abandoned
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        {
            // Taking the lock means the worker is waiting (or hasn't started)
            let _guard = self.shared.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.shared.exit.store(true, Ordering::Release);
            self.shared.ready.notify_all();
        }
        if thread.join().is_err() {
            log::error!("[WORKER] Worker thread panicked");
        }
        log::info!("[WORKER] Worker thread stopped");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &WorkerShared, core: &Mutex<WorkerCore>) {
    let mut guard = shared.lock.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if shared.exit.load(Ordering::Acquire) {
            break;
        }
        let handled = core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .process_pending(shared);
        if handled > 0 {
            log::trace!("[WORKER] Handled {} request(s)", handled);
            continue;
        }
        shared.set_state(WorkerState::Waiting);
        // Timed wait: `schedule` only notifies if its try_lock wins, so a
        // request written while we held the lock would otherwise sleep here
        // until the next one arrives.
        guard = match shared.ready.wait_timeout(guard, WORKER_POLL_INTERVAL) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
    shared.set_state(WorkerState::Stopped);
}

impl WorkScheduler {
    /// Queue `request` for the worker (or run it now when freewheeling)
    ///
    /// Returns `false` if the request is too large or the ring is full.
    pub fn schedule(&mut self, request: &[u8]) -> bool {
        if request.len() > WORKER_MAX_MESSAGE {
            return false;
        }
        if self.freewheel {
            let mut core = self.core.lock().unwrap_or_else(PoisonError::into_inner);
            let WorkerCore {
                handler, responses, ..
            } = &mut *core;
            execute(handler.as_mut(), responses, request);
            return true;
        }
        if !self.requests.write_frame(request) {
            return false;
        }
        self.wake();
        true
    }

    fn wake(&self) {
        if let Ok(_guard) = self.shared.lock.try_lock() {
            self.shared.ready.notify_one();
        }
    }

    /// Run requests synchronously from now on (offline mode)
    pub fn set_freewheel(&mut self, freewheel: bool) {
        self.freewheel = freewheel;
    }

    /// Deliver every pending response to `deliver`; returns how many
    pub fn drain_responses(&mut self, mut deliver: impl FnMut(&[u8])) -> usize {
        let mut count = 0;
        loop {
            match self.responses.read_frame(&mut self.response_buf) {
                FrameRead::Empty => return count,
                FrameRead::Discarded(_) => {}
                FrameRead::Complete(len) => {
                    deliver(&self.response_buf[..len]);
                    count += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Answers every request with the request bytes reversed
    struct Reverse;

    impl WorkHandler for Reverse {
        fn work(&mut self, request: &[u8], respond: &mut dyn FnMut(&[u8]) -> bool) -> WorkStatus {
            if request.is_empty() {
                return WorkStatus::Error;
            }
            let reversed: Vec<u8> = request.iter().rev().copied().collect();
            if respond(&reversed) {
                WorkStatus::Success
            } else {
                WorkStatus::NoSpace
            }
        }
    }

    fn wait_for_responses(scheduler: &mut WorkScheduler, want: usize) -> Vec<Vec<u8>> {
        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while got.len() < want && Instant::now() < deadline {
            scheduler.drain_responses(|body| got.push(body.to_vec()));
            thread::sleep(Duration::from_millis(1));
        }
        got
    }

    #[test]
    fn test_request_response_round_trip() {
        let (worker, mut scheduler) = Worker::spawn(Box::new(Reverse)).unwrap();
        assert!(scheduler.schedule(&[1, 2, 3]));
        assert!(scheduler.schedule(&[4, 5]));

        let got = wait_for_responses(&mut scheduler, 2);
        assert_eq!(got, vec![vec![3, 2, 1], vec![5, 4]]);
        worker.shutdown();
    }

    #[test]
    fn test_failed_request_produces_no_response() {
        let (worker, mut scheduler) = Worker::spawn(Box::new(Reverse)).unwrap();
        assert!(scheduler.schedule(&[]));
        assert!(scheduler.schedule(&[9]));
        let got = wait_for_responses(&mut scheduler, 1);
        assert_eq!(got, vec![vec![9]]);
        drop(worker);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let (_worker, mut scheduler) = Worker::spawn(Box::new(Reverse)).unwrap();
        assert!(!scheduler.schedule(&vec![0u8; WORKER_MAX_MESSAGE + 1]));
    }

    #[test]
    fn test_freewheel_runs_synchronously() {
        let (worker, mut scheduler) = Worker::spawn(Box::new(Reverse)).unwrap();
        scheduler.set_freewheel(true);
        assert!(scheduler.schedule(&[7, 8]));
        // No waiting: the response is already in the ring
        let mut got = Vec::new();
        assert_eq!(scheduler.drain_responses(|b| got.push(b.to_vec())), 1);
        assert_eq!(got, vec![vec![8, 7]]);
        worker.shutdown();
    }

    #[test]
    fn test_worker_waits_when_idle_and_stops() {
        let (worker, _scheduler) = Worker::spawn(Box::new(Reverse)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.state() != WorkerState::Waiting && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.state(), WorkerState::Waiting);
        let shared = Arc::clone(&worker.shared);
        worker.shutdown();
        assert_eq!(
            WorkerState::from_u8(shared.state.load(Ordering::Relaxed)),
            WorkerState::Stopped
        );
    }
}
