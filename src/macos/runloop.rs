//! Main-thread run loop control.
//!
//! The menu bar and the controller loop live on the main thread, while the
//! quit paths (Ctrl-C handler, Quit menu item) may fire elsewhere. The main
//! run loop is registered once at startup so any thread can stop it.

use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop};
use once_cell::sync::OnceCell;

/// Wrapper limited to the CFRunLoop calls that are documented thread-safe
/// (`CFRunLoopStop`, `CFRunLoopWakeUp`).
pub(crate) struct SendRunLoop(pub(crate) CFRunLoop);

unsafe impl Send for SendRunLoop {}
unsafe impl Sync for SendRunLoop {}

static MAIN_LOOP: OnceCell<SendRunLoop> = OnceCell::new();

/// Records the calling thread's run loop as the main loop. Call once from
/// `main` before any quit path can fire.
pub fn register_main() {
    if MAIN_LOOP.set(SendRunLoop(CFRunLoop::get_current())).is_err() {
        tracing::warn!("main run loop already registered");
    }
}

/// Drives the main run loop for one bounded slice, returning early once a
/// source was handled or the loop was stopped.
pub fn pump(slice: Duration) {
    unsafe {
        CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, slice, true);
    }
}

/// Stops the registered main run loop. Callable from any thread.
pub fn post_quit() {
    match MAIN_LOOP.get() {
        Some(run_loop) => run_loop.0.stop(),
        None => tracing::warn!("main run loop not registered, cannot post quit"),
    }
}
