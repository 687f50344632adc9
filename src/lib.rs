//! # Weft
//!
//! CSP-style concurrency for Rust: lightweight fibers that communicate
//! exclusively over typed rendezvous channels, with guarded choice across
//! channel operations, on top of a work-stealing M:N scheduler.
//!
//! - **Fibers**: stackful, cooperatively scheduled tasks multiplexed over a
//!   fixed pool of OS threads ([`Runtime`], [`spawn`]).
//! - **Channels**: unbuffered point-to-point rendezvous; a send and a
//!   receive complete together or not at all ([`channel::create`]).
//! - **Alt**: selection over sends, receives, timeouts and skip, with
//!   uniform tie-breaking and safe sharing of channels between selections
//!   ([`Alt`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! use weft::{channel, Runtime};
//!
//! let mut rt = Runtime::new();
//! let (tx, rx) = channel::create::<i32>();
//! rt.spawn(move || {
//!     tx.send(42).unwrap();
//! });
//! rt.spawn(move || {
//!     assert_eq!(rx.recv().unwrap(), 42);
//! });
//! rt.run();
//! ```
//!
//! Suspension is cooperative and happens only at channel operations,
//! `Alt::select`, joins, sleeps and explicit yields; code between
//! suspension points runs without preemption on its worker.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod alt;
pub mod channel;
pub mod config;
mod context;
pub mod fiber;
pub mod log;
mod policy;
mod remote;
pub mod scheduler;
pub mod spinlock;
pub mod timer;

pub use alt::Alt;
pub use channel::{ChanId, RecvError, Rx, SendError, Tx};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use fiber::{FiberHandle, FiberId, FiberKind};
pub use log::LogLevel;
pub use scheduler::{shutdown, sleep_for, sleep_until, spawn, yield_now, Runtime};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
