//! Worker lifecycle for the scroll tap.
//!
//! Owns zero-or-one background worker thread. Each worker opens its own tap,
//! dispatches events until its stop signal is raised, releases the tap on its
//! own thread, and acknowledges over a one-shot channel. The supervisor only
//! reports `Stopped` after that acknowledgment and the join, so a fast
//! toggle/toggle sequence can never observe `Stopped` while the old tap is
//! still installed and restarts always produce exactly one fresh worker.
//!
//! All methods take `&mut self`: the supervisor expects a single controller
//! thread, and the worker never mutates supervisor state.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::scroll::LineStep;
use crate::tap::{ActiveTap, StopSignal, TapError, TapSource};

/// How long `stop` waits for the worker's acknowledgment.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Delivery attempts for one stop request before falling back to the
/// acknowledgment timeout.
const STOP_SIGNAL_RETRIES: u32 = 3;

type StopOf<S> = <<S as TapSource>::Tap as ActiveTap>::Stop;

/// Identity token for one worker. Restarts always yield a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    /// The raw token value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Stopped,
    Running,
    /// A stop request is in flight and not yet acknowledged.
    Stopping,
}

/// Snapshot returned by [`TapSupervisor::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapStatus {
    pub state: TapState,
    /// Identity of the active worker while `Running` or `Stopping`.
    pub worker: Option<WorkerId>,
}

/// What a [`TapSupervisor::toggle`] call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Started(WorkerId),
    Stopped,
}

/// Errors surfaced by the lifecycle operations.
#[derive(Debug)]
pub enum SupervisorError {
    /// The hook could not be stood up for this start attempt. The state is
    /// back at `Stopped`; the caller may retry after remediation.
    HookUnavailable(TapError),
    /// The worker did not acknowledge the stop request within the timeout.
    /// The state stays `Stopping`; the caller can retry `stop`.
    StopTimeout,
    /// `start` while a worker is running or still tearing down.
    AlreadyRunning,
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::HookUnavailable(e) => write!(f, "input hook unavailable: {}", e),
            SupervisorError::StopTimeout => {
                write!(f, "worker did not acknowledge stop in time")
            }
            SupervisorError::AlreadyRunning => {
                write!(f, "a worker is already running or still shutting down")
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::HookUnavailable(e) => Some(e),
            _ => None,
        }
    }
}

/// One running worker: thread handle, its stop signal, and the channel it
/// completes after releasing its tap.
struct TapWorker<P: StopSignal> {
    id: WorkerId,
    stop: P,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

enum Slot<P: StopSignal> {
    Stopped,
    Running(TapWorker<P>),
    Stopping(TapWorker<P>),
}

/// Start/stop/restart control over the single background scroll worker.
pub struct TapSupervisor<S: TapSource> {
    source: Arc<S>,
    slot: Slot<StopOf<S>>,
    next_worker: u64,
    stop_timeout: Duration,
}

impl<S: TapSource> TapSupervisor<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            slot: Slot::Stopped,
            next_worker: 1,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Overrides the acknowledgment timeout used by [`stop`](Self::stop).
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Spawns a fresh worker with a fresh tap. The worker opens the tap on
    /// its own thread and reports readiness (or the open error) before any
    /// event is dispatched.
    pub fn start(&mut self, step: LineStep) -> Result<WorkerId, SupervisorError> {
        if !matches!(self.slot, Slot::Stopped) {
            return Err(SupervisorError::AlreadyRunning);
        }

        let id = WorkerId(self.next_worker);
        self.next_worker += 1;

        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let source = Arc::clone(&self.source);

        let handle = thread::Builder::new()
            .name(format!("scroll-tap-{}", id))
            .spawn(move || {
                let mut tap = match source.open(step) {
                    Ok(tap) => tap,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let stop = tap.stop_signal();
                if ready_tx.send(Ok(stop)).is_err() {
                    // Controller went away before the start completed.
                    return;
                }
                tracing::debug!(worker = %id, "scroll worker dispatching");
                tap.run();
                drop(tap);
                tracing::debug!(worker = %id, "scroll worker released its tap");
                let _ = done_tx.send(());
            })
            .map_err(|e| SupervisorError::HookUnavailable(TapError::WorkerSpawn(e)))?;

        match ready_rx.recv() {
            Ok(Ok(stop)) => {
                tracing::info!(worker = %id, lines = step.lines(), "scroll worker started");
                self.slot = Slot::Running(TapWorker {
                    id,
                    stop,
                    done_rx,
                    handle,
                });
                Ok(id)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                tracing::warn!(worker = %id, error = %e, "scroll worker failed to open tap");
                Err(SupervisorError::HookUnavailable(e))
            }
            Err(_) => {
                // Worker died before reporting readiness.
                if handle.join().is_err() {
                    tracing::error!(worker = %id, "scroll worker panicked during open");
                }
                Err(SupervisorError::HookUnavailable(TapError::CreateFailed))
            }
        }
    }

    /// Requests termination of the active worker and waits, bounded by the
    /// stop timeout, until it has released its tap and exited. Calling while
    /// `Stopping` retries the pending teardown; calling while `Stopped` is a
    /// no-op.
    pub fn stop(&mut self) -> Result<(), SupervisorError> {
        match std::mem::replace(&mut self.slot, Slot::Stopped) {
            Slot::Stopped => Ok(()),
            Slot::Running(worker) | Slot::Stopping(worker) => self.signal_and_reap(worker),
        }
    }

    /// `stop` when a worker exists, `start` otherwise. While `Stopping` it
    /// retries the teardown so a caller can converge after a timeout.
    pub fn toggle(&mut self, step: LineStep) -> Result<Toggle, SupervisorError> {
        match self.slot {
            Slot::Stopped => self.start(step).map(Toggle::Started),
            Slot::Running(_) | Slot::Stopping(_) => self.stop().map(|()| Toggle::Stopped),
        }
    }

    /// Current state plus the active worker's identity, if any.
    pub fn status(&self) -> TapStatus {
        match &self.slot {
            Slot::Stopped => TapStatus {
                state: TapState::Stopped,
                worker: None,
            },
            Slot::Running(w) => TapStatus {
                state: TapState::Running,
                worker: Some(w.id),
            },
            Slot::Stopping(w) => TapStatus {
                state: TapState::Stopping,
                worker: Some(w.id),
            },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.slot, Slot::Running(_))
    }

    fn signal_and_reap(&mut self, worker: TapWorker<StopOf<S>>) -> Result<(), SupervisorError> {
        let mut delivered = false;
        for attempt in 1..=STOP_SIGNAL_RETRIES {
            match worker.stop.raise() {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        worker = %worker.id,
                        attempt,
                        error = %e,
                        "stop signal delivery failed"
                    );
                }
            }
        }

        // The acknowledgment arrives only after the worker has dropped its
        // tap; a closed channel means the worker is already gone.
        match worker.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let id = worker.id;
                if worker.handle.join().is_err() {
                    tracing::error!(worker = %id, "scroll worker panicked");
                }
                tracing::info!(worker = %id, "scroll worker stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    worker = %worker.id,
                    delivered,
                    "scroll worker did not acknowledge stop in time"
                );
                self.slot = Slot::Stopping(worker);
                Err(SupervisorError::StopTimeout)
            }
        }
    }
}

impl<S: TapSource> Drop for TapSupervisor<S> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Stopped) {
            Slot::Stopped => {}
            Slot::Running(worker) | Slot::Stopping(worker) => {
                if self.signal_and_reap(worker).is_err() {
                    tracing::warn!("scroll worker left behind at supervisor drop");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tap::SignalError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Counters shared between a fake host and the test body.
    #[derive(Default)]
    struct LiveStats {
        current: AtomicUsize,
        max: AtomicUsize,
        released: AtomicUsize,
    }

    /// In-process stand-in for the host input subsystem.
    #[derive(Default)]
    struct FakeHost {
        fail_open: AtomicBool,
        /// The next tap ignores its stop channel until [`wake_deaf`] fires.
        deaf: AtomicBool,
        /// Raises that report failure before deliveries start succeeding.
        failing_raises: Arc<AtomicUsize>,
        raises: Arc<AtomicUsize>,
        opened: AtomicUsize,
        live: Arc<LiveStats>,
        deaf_wake: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl FakeHost {
        fn wake_deaf(&self) {
            if let Some(tx) = self.deaf_wake.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }
    }

    struct FakeTap {
        stop_tx: mpsc::Sender<()>,
        stop_rx: mpsc::Receiver<()>,
        deaf_rx: Option<mpsc::Receiver<()>>,
        failing_raises: Arc<AtomicUsize>,
        raises: Arc<AtomicUsize>,
        live: Arc<LiveStats>,
    }

    struct FakeStop {
        tx: mpsc::Sender<()>,
        failing_raises: Arc<AtomicUsize>,
        raises: Arc<AtomicUsize>,
    }

    impl TapSource for FakeHost {
        type Tap = FakeTap;

        fn open(&self, _step: LineStep) -> Result<FakeTap, TapError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(TapError::PermissionDenied);
            }
            let deaf_rx = if self.deaf.load(Ordering::SeqCst) {
                let (tx, rx) = mpsc::channel();
                *self.deaf_wake.lock().unwrap() = Some(tx);
                Some(rx)
            } else {
                None
            };
            let (stop_tx, stop_rx) = mpsc::channel();
            Ok(FakeTap {
                stop_tx,
                stop_rx,
                deaf_rx,
                failing_raises: Arc::clone(&self.failing_raises),
                raises: Arc::clone(&self.raises),
                live: Arc::clone(&self.live),
            })
        }
    }

    impl ActiveTap for FakeTap {
        type Stop = FakeStop;

        fn stop_signal(&self) -> FakeStop {
            FakeStop {
                tx: self.stop_tx.clone(),
                failing_raises: Arc::clone(&self.failing_raises),
                raises: Arc::clone(&self.raises),
            }
        }

        fn run(&mut self) {
            let n = self.live.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.live.max.fetch_max(n, Ordering::SeqCst);
            match &self.deaf_rx {
                Some(rx) => {
                    let _ = rx.recv();
                }
                None => {
                    let _ = self.stop_rx.recv();
                }
            }
            self.live.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Drop for FakeTap {
        fn drop(&mut self) {
            self.live.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl StopSignal for FakeStop {
        fn raise(&self) -> Result<(), SignalError> {
            self.raises.fetch_add(1, Ordering::SeqCst);
            let budget = &self.failing_raises;
            if budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SignalError);
            }
            self.tx.send(()).map_err(|_| SignalError)
        }
    }

    fn supervisor(host: &Arc<FakeHost>) -> TapSupervisor<Arc<FakeHost>> {
        TapSupervisor::new(Arc::clone(host))
    }

    #[test]
    fn test_start_then_stop_releases_tap() {
        let host = Arc::new(FakeHost::default());
        let mut sup = supervisor(&host);

        let id = sup.start(LineStep::default()).expect("start failed");
        assert_eq!(
            sup.status(),
            TapStatus {
                state: TapState::Running,
                worker: Some(id),
            }
        );

        sup.stop().expect("stop failed");
        assert_eq!(sup.status().state, TapState::Stopped);
        assert_eq!(host.live.released.load(Ordering::SeqCst), 1);
        assert_eq!(host.live.current.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_start_rejected() {
        let host = Arc::new(FakeHost::default());
        let mut sup = supervisor(&host);

        let id = sup.start(LineStep::default()).unwrap();
        assert!(matches!(
            sup.start(LineStep::default()),
            Err(SupervisorError::AlreadyRunning)
        ));
        // The running worker is untouched by the rejected start.
        assert_eq!(sup.status().worker, Some(id));
        assert_eq!(host.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let host = Arc::new(FakeHost::default());
        let mut sup = supervisor(&host);
        sup.stop().expect("stop on stopped supervisor errored");
        assert_eq!(sup.status().state, TapState::Stopped);
    }

    #[test]
    fn test_restart_yields_fresh_worker() {
        let host = Arc::new(FakeHost::default());
        let mut sup = supervisor(&host);

        let first = sup.start(LineStep::default()).unwrap();
        sup.stop().unwrap();
        let second = sup.start(LineStep::default()).unwrap();

        assert_ne!(first, second);
        assert_eq!(host.opened.load(Ordering::SeqCst), 2);
        assert_eq!(host.live.released.load(Ordering::SeqCst), 1);
        sup.stop().unwrap();
    }

    #[test]
    fn test_failed_open_leaves_stopped() {
        let host = Arc::new(FakeHost::default());
        host.fail_open.store(true, Ordering::SeqCst);
        let mut sup = supervisor(&host);

        match sup.start(LineStep::default()) {
            Err(SupervisorError::HookUnavailable(TapError::PermissionDenied)) => {}
            other => panic!("expected HookUnavailable, got {:?}", other),
        }
        assert_eq!(sup.status().state, TapState::Stopped);
        assert_eq!(sup.status().worker, None);

        // Remediated: the next start succeeds.
        host.fail_open.store(false, Ordering::SeqCst);
        sup.start(LineStep::default()).expect("retry after remediation failed");
        sup.stop().unwrap();
    }

    #[test]
    fn test_rapid_toggles_never_overlap_workers() {
        let host = Arc::new(FakeHost::default());
        let mut sup = supervisor(&host);
        let step = LineStep::default();

        let first = match sup.toggle(step).unwrap() {
            Toggle::Started(id) => id,
            other => panic!("expected start, got {:?}", other),
        };
        assert_eq!(sup.status().state, TapState::Running);

        assert_eq!(sup.toggle(step).unwrap(), Toggle::Stopped);
        assert_eq!(sup.status().state, TapState::Stopped);

        let second = match sup.toggle(step).unwrap() {
            Toggle::Started(id) => id,
            other => panic!("expected start, got {:?}", other),
        };
        assert_eq!(sup.status().state, TapState::Running);
        assert_ne!(first, second);

        // One Running -> Stopped -> Running cycle, never two live loops.
        assert_eq!(host.live.max.load(Ordering::SeqCst), 1);
        sup.stop().unwrap();
    }

    #[test]
    fn test_many_toggles_single_live_worker() {
        let host = Arc::new(FakeHost::default());
        let mut sup = supervisor(&host);
        for _ in 0..20 {
            sup.toggle(LineStep::default()).unwrap();
        }
        assert!(host.live.max.load(Ordering::SeqCst) <= 1);
        sup.stop().unwrap();
        assert_eq!(host.live.current.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_signal_delivery_retried() {
        let host = Arc::new(FakeHost::default());
        host.failing_raises.store(2, Ordering::SeqCst);
        let mut sup = supervisor(&host);

        sup.start(LineStep::default()).unwrap();
        sup.stop().expect("stop should succeed on the third delivery");
        assert_eq!(host.raises.load(Ordering::SeqCst), 3);
        assert_eq!(sup.status().state, TapState::Stopped);
    }

    #[test]
    fn test_exhausted_deliveries_time_out_then_recover() {
        let host = Arc::new(FakeHost::default());
        host.failing_raises.store(4, Ordering::SeqCst);
        let mut sup = supervisor(&host).with_stop_timeout(Duration::from_millis(50));

        let id = sup.start(LineStep::default()).unwrap();
        assert!(matches!(sup.stop(), Err(SupervisorError::StopTimeout)));
        assert_eq!(
            sup.status(),
            TapStatus {
                state: TapState::Stopping,
                worker: Some(id),
            }
        );

        // One failing raise left; the retry delivers on its second attempt.
        sup.stop().expect("retried stop failed");
        assert_eq!(sup.status().state, TapState::Stopped);
    }

    #[test]
    fn test_unacknowledged_stop_stays_stopping() {
        let host = Arc::new(FakeHost::default());
        host.deaf.store(true, Ordering::SeqCst);
        let mut sup = supervisor(&host).with_stop_timeout(Duration::from_millis(50));

        let id = sup.start(LineStep::default()).unwrap();
        assert!(matches!(sup.stop(), Err(SupervisorError::StopTimeout)));
        assert_eq!(sup.status().state, TapState::Stopping);
        assert_eq!(sup.status().worker, Some(id));

        // No second worker while the first is still tearing down.
        assert!(matches!(
            sup.start(LineStep::default()),
            Err(SupervisorError::AlreadyRunning)
        ));
        assert_eq!(host.opened.load(Ordering::SeqCst), 1);

        host.wake_deaf();
        sup.stop().expect("stop after wake failed");
        assert_eq!(sup.status().state, TapState::Stopped);
        assert_eq!(host.live.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_toggle_while_stopping_retries_teardown() {
        let host = Arc::new(FakeHost::default());
        host.deaf.store(true, Ordering::SeqCst);
        let mut sup = supervisor(&host).with_stop_timeout(Duration::from_millis(50));

        sup.start(LineStep::default()).unwrap();
        assert!(matches!(sup.stop(), Err(SupervisorError::StopTimeout)));

        host.wake_deaf();
        assert_eq!(sup.toggle(LineStep::default()).unwrap(), Toggle::Stopped);
        assert_eq!(sup.status().state, TapState::Stopped);
    }
}
