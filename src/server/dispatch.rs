//! Request dispatch: parse → route → middleware chain → handler → serialize.
//!
//! Every failure is mapped to a status code by [`DispatchError::status`].
//! Parse and routing failures are recovered: the client gets a `400`/`404`
//! and the connection keeps reading. Handler-chain failures still produce a
//! `500` for the client but are handed back to the connection worker as
//! fatal.

use std::any::Any;

use bytes::BytesMut;
use thiserror::Error;
use tracing::{debug, warn};

use crate::handler::BoxError;
use crate::http::{InvalidReply, Method, Request, RequestError, Response, StatusCode};
use crate::router::RouteTable;

/// Everything that can go wrong between receiving bytes and having a response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] RequestError),

    #[error("no route for {method} {path}")]
    RouteNotFound { method: Method, path: String },

    #[error("handler returned an invalid result: {0}")]
    InvalidHandlerResult(#[from] InvalidReply),

    #[error("handler failed: {0}")]
    HandlerFailure(BoxError),

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

impl DispatchError {
    /// The status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidHandlerResult(_) | Self::HandlerFailure(_) | Self::HandlerPanicked(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the connection worker must stop after answering.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidHandlerResult(_) | Self::HandlerFailure(_) | Self::HandlerPanicked(_)
        )
    }
}

/// The bytes to write back for one request, plus the error that must end the
/// connection, if any.
#[derive(Debug)]
pub struct Exchange {
    pub response: BytesMut,
    pub fatal: Option<DispatchError>,
}

/// The immutable, fully composed application: the route table with every
/// handler already wrapped in its middleware.
///
/// Produced by [`ServerBuilder::into_service`](crate::ServerBuilder::into_service)
/// and shared by all connection tasks.
pub struct Service {
    routes: RouteTable,
    default_content_type: String,
}

impl Service {
    pub(crate) fn new(routes: RouteTable, default_content_type: String) -> Self {
        Self {
            routes,
            default_content_type,
        }
    }

    /// Returns the route table, every handler already wrapped.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handles one raw request chunk and produces the bytes to send back.
    pub async fn respond(&self, raw: &[u8]) -> Exchange {
        match self.dispatch(raw).await {
            Ok(response) => Exchange {
                response: response.into_bytes(),
                fatal: None,
            },
            Err(err) => {
                let response = Response::empty(err.status(), &self.default_content_type).into_bytes();
                if err.is_fatal() {
                    Exchange {
                        response,
                        fatal: Some(err),
                    }
                } else {
                    warn!(error = %err, status = err.status().as_u16(), "request rejected");
                    Exchange {
                        response,
                        fatal: None,
                    }
                }
            }
        }
    }

    /// Runs the pipeline for one request chunk.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`]; the variant decides the status code.
    pub async fn dispatch(&self, raw: &[u8]) -> Result<Response, DispatchError> {
        let mut request = Request::parse(raw)?;

        let found = self
            .routes
            .lookup(request.method(), request.path())
            .ok_or_else(|| DispatchError::RouteNotFound {
                method: request.method().clone(),
                path: request.path().to_owned(),
            })?;

        debug!(method = %request.method(), path = %request.path(), "dispatching request");
        request.set_params(found.params);

        // Run the chain on its own task so a panicking handler is caught and
        // answered like any other failure.
        let reply = match tokio::spawn((found.handler)(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(DispatchError::HandlerFailure(e)),
            Err(e) if e.is_panic() => {
                return Err(DispatchError::HandlerPanicked(panic_message(e.into_panic())));
            }
            Err(e) => return Err(DispatchError::HandlerFailure(Box::new(e))),
        };

        Ok(Response::from_reply(reply, &self.default_content_type)?)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
