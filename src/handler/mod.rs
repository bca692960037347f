//! Handler types shared by the router, the middleware chain and the server.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::http::{IntoReply, Reply, Request};

/// Error type for failing handlers and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a handler (or a middleware wrapping one) resolves to.
pub type HandlerResult = Result<Reply, BoxError>;

/// A boxed, `Send` future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Type-erased, heap-allocated async handler that processes a [`Request`] and
/// resolves to a [`HandlerResult`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned into
/// middleware layers and shared across connection tasks without copying the
/// underlying closure. Registration methods accept `impl IntoHandler`; this
/// type only shows up when writing middleware by hand.
pub type Handler = Arc<dyn Fn(Request) -> BoxFuture<HandlerResult> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = R>` where `R: IntoReply` implements
/// this trait through the blanket impl below, so handlers can return a bare
/// body, a `(body, status)` pair, a `(body, status, headers)` triple or a
/// `Result` of any of those.
///
/// # Examples
///
/// ```rust
/// use microhttp::{Request, handler::IntoHandler};
///
/// fn assert_handler(_: impl IntoHandler) {}
///
/// assert_handler(|_req: Request| async { "pong" });
/// assert_handler(|req: Request| async move {
///     match req.param("id") {
///         Some(id) => (format!("todo {id}"), 200),
///         None => ("missing id".to_owned(), 400),
///     }
/// });
/// ```
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given request, boxing the returned future.
    fn call(&self, req: Request) -> BoxFuture<HandlerResult>;
}

impl<T, F, R> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = R> + Send + 'static,
    R: IntoReply,
{
    fn call(&self, req: Request) -> BoxFuture<HandlerResult> {
        let fut = (self)(req);
        Box::pin(async move { fut.await.into_reply() })
    }
}

/// Erase the concrete handler type into a [`Handler`].
pub fn handler(h: impl IntoHandler) -> Handler {
    Arc::new(move |req| h.call(req))
}
