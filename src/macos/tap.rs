//! Scroll-wheel event tap on Quartz Event Services.
//!
//! The tap intercepts session-level scroll events head-of-queue, rewrites
//! the line delta of discrete wheel notches in place, and leaves continuous
//! (trackpad) scrolling alone. Everything here runs on the worker thread
//! that called [`WheelTapSource::open`]; only [`RunLoopStop`] crosses back
//! to the controller.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_foundation::base::TCFType;
use core_foundation::runloop::{
    kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopSource,
};
use core_graphics::event::{
    CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType, EventField,
};

use super::runloop::SendRunLoop;
use crate::scroll::LineStep;
use crate::tap::{ActiveTap, SignalError, StopSignal, TapError, TapSource};

extern "C" {
    /// CoreGraphics: enable or disable an existing event tap.
    fn CGEventTapEnable(tap: *mut c_void, enable: bool);
}

/// CFRunLoopStop is a no-op while the loop is not running, so the worker
/// runs the loop in bounded slices and re-checks its stop flag in between.
const RUN_SLICE: Duration = Duration::from_millis(200);

/// Opens one session scroll tap per worker start.
#[derive(Debug, Default)]
pub struct WheelTapSource;

impl WheelTapSource {
    pub fn new() -> Self {
        Self
    }
}

impl TapSource for WheelTapSource {
    type Tap = ActiveWheelTap;

    fn open(&self, step: LineStep) -> Result<ActiveWheelTap, TapError> {
        // The tap port is shared with the callback so it can re-enable the
        // tap when macOS disables it for timeout or user input.
        let port = Arc::new(AtomicUsize::new(0));
        let callback_port = Arc::clone(&port);

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            vec![CGEventType::ScrollWheel],
            move |_proxy, event_type, event| {
                if matches!(
                    event_type,
                    CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput
                ) {
                    tracing::warn!(?event_type, "event tap disabled by the system, re-enabling");
                    reenable(&callback_port);
                    return None;
                }

                // Continuous scrolls are trackpad-style; only the discrete
                // wheel gets its line delta pinned.
                if event.get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_IS_CONTINUOUS) == 0
                {
                    let raw = event
                        .get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_1);
                    event.set_integer_value_field(
                        EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS_1,
                        step.quantize(raw),
                    );
                }
                None
            },
        )
        .map_err(|()| {
            if accessibility_trusted() {
                TapError::CreateFailed
            } else {
                TapError::PermissionDenied
            }
        })?;

        port.store(
            tap.mach_port.as_concrete_TypeRef() as usize,
            Ordering::SeqCst,
        );

        let run_loop = CFRunLoop::get_current();
        unsafe {
            let source = tap
                .mach_port
                .create_runloop_source(0)
                .map_err(|()| TapError::RunLoopSource)?;
            run_loop.add_source(&source, kCFRunLoopCommonModes);
            tap.enable();

            tracing::info!(lines = step.lines(), "scroll tap installed");
            Ok(ActiveWheelTap {
                _tap: tap,
                _source: source,
                run_loop,
                stop: Arc::new(AtomicBool::new(false)),
                port,
            })
        }
    }
}

/// A live scroll tap attached to the worker thread's run loop.
pub struct ActiveWheelTap {
    _tap: CGEventTap<'static>,
    _source: CFRunLoopSource,
    run_loop: CFRunLoop,
    stop: Arc<AtomicBool>,
    port: Arc<AtomicUsize>,
}

impl ActiveTap for ActiveWheelTap {
    type Stop = RunLoopStop;

    fn stop_signal(&self) -> RunLoopStop {
        RunLoopStop {
            flag: Arc::clone(&self.stop),
            run_loop: SendRunLoop(self.run_loop.clone()),
        }
    }

    fn run(&mut self) {
        tracing::debug!("scroll tap run loop entered");
        while !self.stop.load(Ordering::SeqCst) {
            unsafe {
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_SLICE, false);
            }
        }
        tracing::debug!("scroll tap run loop exited");
    }
}

impl Drop for ActiveWheelTap {
    fn drop(&mut self) {
        let port = self.port.load(Ordering::SeqCst);
        if port != 0 {
            unsafe { CGEventTapEnable(port as *mut c_void, false) };
        }
        tracing::info!("scroll tap released");
    }
}

/// Stop request for one worker: flag first, then kick its run loop awake.
pub struct RunLoopStop {
    flag: Arc<AtomicBool>,
    run_loop: SendRunLoop,
}

impl StopSignal for RunLoopStop {
    fn raise(&self) -> Result<(), SignalError> {
        self.flag.store(true, Ordering::SeqCst);
        self.run_loop.0.stop();
        Ok(())
    }
}

fn reenable(port: &AtomicUsize) {
    let port = port.load(Ordering::SeqCst);
    if port != 0 {
        unsafe { CGEventTapEnable(port as *mut c_void, true) };
    }
}

fn accessibility_trusted() -> bool {
    extern "C" {
        fn AXIsProcessTrusted() -> bool;
    }
    unsafe { AXIsProcessTrusted() }
}
