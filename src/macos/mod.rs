//! macOS backend: Quartz event tap and run loop plumbing.

pub mod runloop;
pub mod tap;

pub use tap::WheelTapSource;
