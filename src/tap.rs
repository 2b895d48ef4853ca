//! Host input-subsystem capability contract.
//!
//! The supervisor never talks to Quartz directly; it drives anything that can
//! open a scroll tap, run it on a dedicated thread, and tear it down on
//! request. The macOS backend lives in [`crate::macos`]; tests drive the same
//! traits with in-process fakes.
//!
//! Thread contract: `open`, `run`, and the final drop all happen on the
//! worker thread, since run-loop registrations are not thread-transferable.
//! Only the [`StopSignal`] crosses back to the controller.

use crate::scroll::LineStep;

/// Factory for live taps. One call per worker start; every worker gets a
/// fresh registration.
pub trait TapSource: Send + Sync + 'static {
    type Tap: ActiveTap;

    /// Registers a scroll-rewrite callback with the host. Runs on the worker
    /// thread. Fails when the host denies the registration.
    fn open(&self, step: LineStep) -> Result<Self::Tap, TapError>;
}

/// A live, installed tap owned by exactly one worker thread.
///
/// Dropping the tap (same thread, after [`run`](ActiveTap::run) returns)
/// unregisters the callback and frees the host resources.
pub trait ActiveTap {
    type Stop: StopSignal;

    /// Hands out the cross-thread stop signal for this tap. Raised at most
    /// once per worker by the supervisor.
    fn stop_signal(&self) -> Self::Stop;

    /// Dispatches events on the calling thread until the stop signal is
    /// raised. This is the worker thread's entire body once installed.
    fn run(&mut self);
}

/// Cross-thread request for a running tap to wind down.
pub trait StopSignal: Send + 'static {
    /// Delivers the stop request. Delivery failure is reported so the
    /// supervisor can retry rather than assume the worker heard it.
    fn raise(&self) -> Result<(), SignalError>;
}

impl<S: TapSource> TapSource for std::sync::Arc<S> {
    type Tap = S::Tap;

    fn open(&self, step: LineStep) -> Result<Self::Tap, TapError> {
        (**self).open(step)
    }
}

/// Reasons the host refused to stand a tap up.
#[derive(Debug)]
pub enum TapError {
    /// The process lacks accessibility / input-monitoring trust.
    PermissionDenied,
    /// The host rejected the tap registration for another reason.
    CreateFailed,
    /// The tap registered but its run-loop source could not be created.
    RunLoopSource,
    /// The worker thread itself could not be spawned.
    WorkerSpawn(std::io::Error),
}

impl std::fmt::Display for TapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapError::PermissionDenied => {
                write!(
                    f,
                    "input monitoring permission denied; grant access in \
                     System Settings > Privacy & Security > Accessibility"
                )
            }
            TapError::CreateFailed => write!(f, "event tap registration failed"),
            TapError::RunLoopSource => write!(f, "run loop source creation failed"),
            TapError::WorkerSpawn(e) => write!(f, "worker thread spawn failed: {}", e),
        }
    }
}

impl std::error::Error for TapError {}

/// The stop request could not be delivered to the worker.
#[derive(Debug)]
pub struct SignalError;

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stop signal could not be delivered")
    }
}

impl std::error::Error for SignalError {}
