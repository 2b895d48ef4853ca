//! scrollstep - pins discrete scroll-wheel input to a fixed line count.
//!
//! The crate splits into a portable core and a macOS backend. The core is
//! the [`supervisor`] lifecycle driving anything that satisfies the [`tap`]
//! capability traits with the [`scroll`] transform; the backend implements
//! those traits with a Quartz event tap and feeds the menu bar UI.

pub mod scroll;
pub mod supervisor;
pub mod tap;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub mod tray;

pub use scroll::LineStep;
pub use supervisor::{TapState, TapStatus, TapSupervisor, Toggle, WorkerId};
