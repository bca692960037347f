//! Async TCP server using Tokio.
//!
//! A [`ServerBuilder`] collects routes and middleware; [`ServerBuilder::bind`]
//! freezes them into a shared [`Service`] and opens the listener. The
//! resulting [`Server`] accepts connections forever (or until a shutdown
//! future resolves) and serves each one on its own task.

pub mod connection;
pub mod dispatch;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::handler::{IntoHandler, handler};
use crate::http::Method;
use crate::middleware::{BoxMiddleware, IntoMiddlewares, Middleware, compose, layer};
use crate::router::{Pattern, RouteError, RouteTable, parse_key};

pub use connection::{ConnectionError, handle_connection};
pub use dispatch::{DispatchError, Exchange, Service};

/// Pending-connection queue length passed to `listen(2)`.
const LISTEN_BACKLOG: u32 = 1024;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not resolve {addr}")]
    Resolve { addr: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Collects routes and middleware before the server starts.
///
/// # Examples
///
/// ```rust
/// use microhttp::{Request, ServerBuilder};
/// use microhttp::middleware::LoggerMiddleware;
///
/// let mut app = ServerBuilder::new();
/// app.before_all(LoggerMiddleware);
/// app.route("GET /ping", |_req: Request| async {
///     serde_json::json!({ "resp": "pong" })
/// })?
/// .get("/todos/:id", |req: Request| async move {
///     format!("todo {}", req.param("id").unwrap_or_default())
/// })?;
///
/// let service = app.into_service();
/// assert_eq!(service.routes().len(), 2);
/// # Ok::<(), microhttp::router::RouteError>(())
/// ```
#[derive(Default)]
pub struct ServerBuilder {
    routes: RouteTable,
    global: Vec<BoxMiddleware>,
}

impl ServerBuilder {
    /// Creates a builder with no routes and no global middleware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `endpoint` under a `"VERB /pattern"` key.
    ///
    /// Registering the same key twice replaces the earlier handler.
    ///
    /// # Errors
    ///
    /// Any [`RouteError`] from [`parse_key`].
    pub fn route(&mut self, key: &str, endpoint: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.route_with(key, Vec::<BoxMiddleware>::new(), endpoint)
    }

    /// Registers `endpoint` behind one or more route-level middlewares.
    ///
    /// Route middlewares run inside the global ones, in the order given.
    ///
    /// # Errors
    ///
    /// Any [`RouteError`] from [`parse_key`].
    pub fn route_with(
        &mut self,
        key: &str,
        middlewares: impl IntoMiddlewares,
        endpoint: impl IntoHandler,
    ) -> Result<&mut Self, RouteError> {
        let (method, pattern) = parse_key(key)?;
        let chain = compose(&middlewares.into_middlewares(), handler(endpoint));
        self.routes.insert(method, pattern, chain);
        Ok(self)
    }

    /// Registers `endpoint` for an already-parsed method.
    ///
    /// # Errors
    ///
    /// [`RouteError::UnsupportedMethod`] for methods outside
    /// [`Method::ROUTABLE`], or any [`Pattern::parse`] error.
    pub fn add_route(
        &mut self,
        method: Method,
        pattern: &str,
        endpoint: impl IntoHandler,
    ) -> Result<&mut Self, RouteError> {
        if !method.is_routable() {
            return Err(RouteError::UnsupportedMethod(method.to_string()));
        }
        let pattern = Pattern::parse(pattern)?;
        self.routes.insert(method, pattern, handler(endpoint));
        Ok(self)
    }

    /// Registers a `GET` route. Shorthand for
    /// [`add_route`](Self::add_route)`(Method::Get, ..)`.
    ///
    /// # Arguments
    ///
    /// - `pattern`: the path pattern, e.g. `/todos/:id`.
    /// - `h`: the async handler.
    ///
    /// # Errors
    ///
    /// Any [`Pattern::parse`] error.
    pub fn get(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.add_route(Method::Get, pattern, h)
    }

    /// Registers a `POST` route. See [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// Any [`Pattern::parse`] error.
    pub fn post(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.add_route(Method::Post, pattern, h)
    }

    /// Registers a `PUT` route. See [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// Any [`Pattern::parse`] error.
    pub fn put(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.add_route(Method::Put, pattern, h)
    }

    /// Registers a `PATCH` route. See [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// Any [`Pattern::parse`] error.
    pub fn patch(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.add_route(Method::Patch, pattern, h)
    }

    /// Registers a `DELETE` route. See [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// Any [`Pattern::parse`] error.
    pub fn delete(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.add_route(Method::Delete, pattern, h)
    }

    /// Adds a middleware that wraps every route, outside its route-level
    /// middlewares. Global middlewares nest in registration order.
    pub fn before_all(&mut self, middleware: impl Middleware) -> &mut Self {
        self.global.push(layer(middleware));
        self
    }

    /// Freezes the routes with the default configuration.
    pub fn into_service(self) -> Service {
        self.compile(&ServerConfig::default())
    }

    fn compile(self, config: &ServerConfig) -> Service {
        let Self { mut routes, global } = self;
        if !global.is_empty() {
            routes.map_handlers(|h| compose(&global, h));
        }
        Service::new(routes, config.default_content_type.clone())
    }

    /// Freezes the routes and binds a listener.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] if the config fails
    /// [`ServerConfig::validate`], [`ServerError::Resolve`] if `host:port` does
    /// not resolve, [`ServerError::Bind`] if no resolved address can be bound.
    pub async fn bind(self, config: ServerConfig) -> Result<Server, ServerError> {
        config.validate()?;
        let addr = config.address();
        let listener = listen(&addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Server {
            listener,
            local_addr,
            read_buffer_size: config.read_buffer_size,
            service: Arc::new(self.compile(&config)),
        })
    }

    /// Binds on `host:port` with otherwise default settings and serves forever.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind) and [`Server::run`].
    pub async fn serve(self, host: &str, port: u16) -> Result<(), ServerError> {
        self.bind(ServerConfig::new(host, port)).await?.run().await
    }
}

// Tries each resolved address in turn with SO_REUSEADDR set.
async fn listen(addr: &str) -> Result<TcpListener, ServerError> {
    let candidates = tokio::net::lookup_host(addr)
        .await
        .map_err(|_| ServerError::Resolve {
            addr: addr.to_owned(),
        })?;

    let mut last_err = None;
    for candidate in candidates {
        match bind_reuse(candidate) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(address = %candidate, error = %e, "bind attempt failed");
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(source) => Err(ServerError::Bind {
            addr: addr.to_owned(),
            source,
        }),
        None => Err(ServerError::Resolve {
            addr: addr.to_owned(),
        }),
    }
}

fn bind_reuse(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// A bound server.
///
/// # Examples
///
/// ```rust,no_run
/// use microhttp::{Request, ServerBuilder, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut app = ServerBuilder::new();
///     app.route("GET /", |_req: Request| async { "Hello!" })?;
///
///     let server = app.bind(ServerConfig::new("127.0.0.1", 8080)).await?;
///     server.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    read_buffer_size: usize,
    service: Arc<Service>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("routes", &self.service.routes().len())
            .finish()
    }
}

impl Server {
    /// Shorthand for [`ServerBuilder::new`].
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the frozen routes this server dispatches to.
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Accepts connections until the process is terminated.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and skipped, so this only returns on a
    /// listener-level failure.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections already being served keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(address = %self.local_addr, "microhttp listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutting down listener");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    debug!(peer = %peer_addr, "connection accepted");
                    let service = Arc::clone(&self.service);
                    let read_buffer_size = self.read_buffer_size;

                    tokio::spawn(async move {
                        match handle_connection(stream, peer_addr, &service, read_buffer_size).await {
                            Ok(()) => {}
                            Err(ConnectionError::Fatal(e)) => {
                                error!(peer = %peer_addr, error = %e, "connection worker failed");
                            }
                            Err(e) => {
                                warn!(peer = %peer_addr, error = %e, "connection closed with error");
                            }
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::http::Request;
    use crate::middleware::Next;

    #[test]
    fn bad_keys_are_rejected() {
        let mut app = ServerBuilder::new();
        let ok = |_req: Request| async { "" };
        assert!(matches!(
            app.route("GET/ping", ok),
            Err(RouteError::InvalidKey(_))
        ));
        assert!(matches!(
            app.route("FETCH /ping", ok),
            Err(RouteError::UnsupportedMethod(m)) if m == "FETCH"
        ));
        assert!(matches!(
            app.add_route(Method::Trace, "/", ok),
            Err(RouteError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            app.get("ping", ok),
            Err(RouteError::InvalidPattern(_))
        ));
        assert!(app.into_service().routes().is_empty());
    }

    #[tokio::test]
    async fn global_middleware_wraps_route_middleware() {
        let trace: Arc<Mutex<Vec<&'static str>>> = Arc::default();

        let mark = |name: &'static str, trace: &Arc<Mutex<Vec<&'static str>>>| {
            let trace = Arc::clone(trace);
            layer(move |req: Request, next: Next| {
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().unwrap().push(name);
                    next.run(req).await
                }
            })
        };

        let mut app = ServerBuilder::new();
        app.route_with("GET /", mark("route", &trace), |_req: Request| async { "ok" })
            .unwrap();
        app.before_all(mark("global", &trace));

        let response = app
            .into_service()
            .dispatch(b"GET / HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(response.body(), "ok");
        assert_eq!(*trace.lock().unwrap(), vec!["global", "route"]);
    }

    #[tokio::test]
    async fn bind_uses_config_and_reports_local_addr() {
        let mut app = Server::builder();
        app.get("/", |_req: Request| async { "hi" }).unwrap();

        let mut config = ServerConfig::new("127.0.0.1", 0);
        config.default_content_type = "text/plain".into();
        let server = app.bind(config).await.unwrap();

        assert_ne!(server.local_addr().port(), 0);
        let response = server
            .service()
            .dispatch(b"GET / HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(response.content_type(), "text/plain");
    }

    #[tokio::test]
    async fn run_until_returns_on_shutdown() {
        let server = Server::builder()
            .bind(ServerConfig::new("127.0.0.1", 0))
            .await
            .unwrap();
        server.run_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn zero_read_buffer_is_refused_at_bind() {
        let mut config = ServerConfig::new("127.0.0.1", 0);
        config.read_buffer_size = 0;
        let err = Server::builder().bind(config).await.unwrap_err();
        assert!(matches!(err, ServerError::Config(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn unresolvable_host_is_an_error() {
        let err = Server::builder()
            .bind(ServerConfig::new("no such host", 80))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Resolve { .. }));
    }
}
