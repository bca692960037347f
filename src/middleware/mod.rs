//! Middleware pipeline: composable before/after request handler logic.
//!
//! A middleware receives the [`Request`] and a [`Next`] handle to the handler
//! it wraps. It may:
//!
//! - **Pass through**: `next.run(req).await`.
//! - **Short-circuit**: return its own reply without calling `next`
//!   (e.g. an auth failure).
//! - **Decorate**: inspect or change the request before, or the reply after,
//!   calling `next`.
//!
//! [`compose`] wraps a handler in a list of middlewares with onion ordering:
//! the first middleware is the outermost layer, so for `[A, B]` around `H` the
//! order is `A-pre, B-pre, H, B-post, A-post`.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::handler::{BoxFuture, Handler, HandlerResult};
use crate::http::{IntoReply, Request};

/// The core trait for all middleware.
///
/// Implemented for any `Fn(Request, Next) -> impl Future<Output = R>` where
/// `R: IntoReply`, so most middleware is written as a closure:
///
/// ```rust
/// use microhttp::{Request, http::IntoReply, middleware::{Next, layer}};
///
/// let require_token = layer(|req: Request, next: Next| async move {
///     if req.headers().get("Authorization").is_none() {
///         return ("token not found", 401).into_reply();
///     }
///     next.run(req).await
/// });
/// ```
///
/// # Contract
///
/// Implementations are shared across connection tasks, so they must be
/// `Send + Sync` and return a `Send` future.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<HandlerResult>;
}

impl<F, Fut, R> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        let fut = (self)(req, next);
        Box::pin(async move { fut.await.into_reply() })
    }
}

/// A type-erased, reference-counted middleware.
pub type BoxMiddleware = Arc<dyn Middleware>;

impl Middleware for BoxMiddleware {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        (**self).handle(req, next)
    }
}

/// Boxes a middleware for registration.
pub fn layer(middleware: impl Middleware) -> BoxMiddleware {
    Arc::new(middleware)
}

/// The handler wrapped by a middleware layer.
///
/// Consumed by [`Next::run`], so a middleware can forward a request at most
/// once.
pub struct Next {
    inner: Handler,
}

impl Next {
    /// Wraps the handler that [`run`](Self::run) will call.
    pub fn new(inner: Handler) -> Self {
        Self { inner }
    }

    /// Invokes the wrapped handler (and every layer inside it).
    pub fn run(self, req: Request) -> BoxFuture<HandlerResult> {
        (self.inner)(req)
    }
}

/// One middleware or an ordered list of them, as accepted by per-route
/// registration.
pub trait IntoMiddlewares {
    fn into_middlewares(self) -> Vec<BoxMiddleware>;
}

impl IntoMiddlewares for BoxMiddleware {
    fn into_middlewares(self) -> Vec<BoxMiddleware> {
        vec![self]
    }
}

impl IntoMiddlewares for Vec<BoxMiddleware> {
    fn into_middlewares(self) -> Vec<BoxMiddleware> {
        self
    }
}

impl<const N: usize> IntoMiddlewares for [BoxMiddleware; N] {
    fn into_middlewares(self) -> Vec<BoxMiddleware> {
        Vec::from(self)
    }
}

/// Wraps `endpoint` in `middlewares`, first middleware outermost.
///
/// Built by folding from the last middleware to the first, each step taking a
/// handler and returning a new one.
pub fn compose(middlewares: &[BoxMiddleware], endpoint: Handler) -> Handler {
    middlewares.iter().rev().fold(endpoint, |inner, middleware| {
        let middleware = Arc::clone(middleware);
        let wrapped: Handler =
            Arc::new(move |req: Request| middleware.handle(req, Next::new(Arc::clone(&inner))));
        wrapped
    })
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the downstream handler completes,
/// in the format:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// Failed handlers are logged at `warn` and the error is passed on unchanged.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<HandlerResult> {
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method().to_string();
            let path = req.path().to_owned();

            let result = next.run(req).await;

            let duration = start.elapsed();
            match &result {
                Ok(reply) => info!("{} {} - {} ({:?})", method, path, reply.status(), duration),
                Err(e) => warn!(error = %e, "{} {} - failed ({:?})", method, path, duration),
            }

            result
        })
    }
}
