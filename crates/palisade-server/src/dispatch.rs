//! Opcode dispatch.
//!
//! A [`HandlerTable`] maps each request opcode to a parser and an async
//! handler. It is built once before the server starts and never mutated.
//!
//! A decrypted frame holds one or more packets back to back. Dispatch walks
//! them in order until the `End` opcode, the end of the buffer, an opcode
//! with no route, or a packet that fails to parse; the last two drop the rest
//! of the frame. Every handler runs behind a fault boundary: an error return
//! or a panic is logged with the session id and the session carries on.

use std::{any::Any, collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use bytes::{Buf, Bytes};
use futures::{FutureExt, future::BoxFuture};
use palisade_proto::{ClientContext, Opcode, Packet, ProtocolError};

use crate::{handlers::HandlerError, server::Server, session::Session};

type HandlerResult = Result<(), HandlerError>;

type RouteFn = dyn Fn(Arc<Server>, Arc<Session>, &mut Bytes, &ClientContext) -> Result<BoxFuture<'static, HandlerResult>, ProtocolError>
    + Send
    + Sync;

struct Route {
    name: &'static str,
    call: Box<RouteFn>,
}

enum Fault {
    Parse(ProtocolError),
    Handler(HandlerError),
}

/// Immutable opcode → handler table.
#[derive(Default)]
pub struct HandlerTable {
    routes: HashMap<u16, Route>,
}

impl HandlerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `R::OPCODE` to `handler`. Replaces an existing route.
    #[must_use]
    pub fn register<R, F, Fut>(mut self, name: &'static str, handler: F) -> Self
    where
        R: Packet + Send + 'static,
        F: Fn(Arc<Server>, Arc<Session>, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let call = move |server: Arc<Server>,
                         session: Arc<Session>,
                         src: &mut Bytes,
                         ctx: &ClientContext|
              -> Result<BoxFuture<'static, HandlerResult>, ProtocolError> {
            let request = R::parse(src, ctx)?;
            Ok(handler(server, session, request).boxed())
        };
        self.routes.insert(R::OPCODE.to_u16(), Route { name, call: Box::new(call) });
        self
    }

    /// Whether `opcode` has a route.
    #[must_use]
    pub fn contains(&self, opcode: Opcode) -> bool {
        self.routes.contains_key(&opcode.to_u16())
    }

    /// Number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Run every packet in `frame` through its handler, in order.
    pub async fn dispatch(&self, server: &Arc<Server>, session: &Arc<Session>, mut frame: Bytes) {
        while frame.remaining() >= 2 {
            if session.is_closed() {
                tracing::debug!(session = session.id(), dropped = frame.remaining(), "session closed mid-frame");
                break;
            }
            let raw = frame.get_u16();
            if raw == Opcode::End.to_u16() {
                break;
            }

            let Some(route) = self.routes.get(&raw) else {
                tracing::warn!(
                    session = session.id(),
                    opcode = format_args!("{raw:#06x}"),
                    dropped = frame.remaining(),
                    "no handler for opcode; dropping rest of frame"
                );
                break;
            };

            let ctx = session.context();
            let outcome = AssertUnwindSafe(async {
                let handler = (route.call)(Arc::clone(server), Arc::clone(session), &mut frame, &ctx)
                    .map_err(Fault::Parse)?;
                handler.await.map_err(Fault::Handler)
            })
            .catch_unwind()
            .await;

            match outcome {
                Ok(Ok(())) => {},
                Ok(Err(Fault::Parse(e))) => {
                    tracing::warn!(
                        session = session.id(),
                        handler = route.name,
                        error = %e,
                        "malformed request; dropping rest of frame"
                    );
                    break;
                },
                Ok(Err(Fault::Handler(e))) => {
                    tracing::error!(session = session.id(), handler = route.name, error = %e, "handler failed");
                },
                Err(panic) => {
                    tracing::error!(
                        session = session.id(),
                        handler = route.name,
                        panic = panic_message(panic.as_ref()),
                        "handler panicked"
                    );
                },
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.routes.values().map(|route| route.name).collect();
        names.sort_unstable();
        f.debug_struct("HandlerTable").field("routes", &names).finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
