//! Palisade channel server.
//!
//! Accepts encrypted TCP connections, dispatches the game protocol and
//! coordinates the shared state players act on together: stages, their
//! objects and binary blobs, and semaphores.
//!
//! # Architecture
//!
//! Every connection is a [`Session`] with two tokio tasks: a receive loop
//! that reads frames and hands them to the [`HandlerTable`], and a send loop
//! that drains the session's bounded [`SendQueue`]. Handlers never write to a
//! socket; they enqueue on one or more sessions. The [`Server`] registry owns
//! sessions, stages and semaphores behind `parking_lot` locks that are never
//! held across an `.await`.
//!
//! # Components
//!
//! - [`Server`]: registry, accept loop, idle sweeper, broadcast helpers
//! - [`Session`]: per-connection actor and enqueue policies
//! - [`Stage`]: membership state machine, objects and binary relay
//! - [`Semaphore`]: capacity gate across stages
//! - [`HandlerTable`]: immutable opcode → handler routes with a fault
//!   boundary
//! - [`transport`]: encrypted framing over any `AsyncRead + AsyncWrite`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatch;
mod error;
pub mod handlers;
mod semaphore;
mod send_queue;
mod server;
mod session;
mod stage;
pub mod transport;

pub use config::ServerConfig;
pub use dispatch::HandlerTable;
pub use error::{ServerError, TransportError};
pub use handlers::HandlerError;
pub use semaphore::{SEMAPHORE_ID_SEED, Semaphore, SemaphoreError, next_semaphore_id};
pub use send_queue::{PushOutcome, SendQueue};
pub use server::Server;
pub use session::{Session, SessionState};
pub use stage::{Stage, StageError, StageKind, StageObject};
