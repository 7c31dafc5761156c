//! The listener side of the supervisord event notification protocol.
//!
//! A listener tells the supervisor it is ready with `READY\n`, receives one event as a header line of
//! `key:value` tokens followed by `len` bytes of payload in the same format, and acknowledges it with `RESULT 2\nOK`.
//! [`Listener`] runs that loop and asks a [`Supervisor`] handle to stop the supervisor when a watched process exits.
//!
//! ```rust
//! use supervisor_listener::{Listener, ListenerConfig, Supervisor};
//!
//! struct Noop;
//!
//! impl Supervisor for Noop {
//!     fn stop(&mut self) -> nix::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async {
//! let input: &[u8] = b"eventname:TICK_5 len:0\n";
//! let mut output = vec![];
//! let mut diagnostics = vec![];
//! Listener::new(ListenerConfig::default(), input, &mut output, &mut diagnostics, Noop)
//!     .run()
//!     .await
//!     .unwrap();
//! assert_eq!(output, b"READY\nRESULT 2\nOKREADY\n");
//! # };
//! ```
pub mod event;
mod error;
mod listener;

pub use error::{Error, Result};
pub use listener::{Listener, ListenerConfig, ParentProcess, Supervisor, DEFAULT_PROCESS_NAME};
