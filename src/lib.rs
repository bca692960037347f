//! # microhttp
//!
//! A tiny async HTTP/1.1 server core: request parsing, `VERB /pattern`
//! routing with `:param` captures, onion-ordered middleware and reply
//! serialization, on top of Tokio.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use microhttp::{Request, ServerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = ServerBuilder::new();
//!     app.route("GET /ping", |_req: Request| async {
//!         serde_json::json!({ "resp": "pong" })
//!     })?;
//!     app.route("DELETE /todos/:id", |_req: Request| async { ("", 204) })?;
//!
//!     app.serve("127.0.0.1", 9090).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use handler::{BoxError, Handler, HandlerResult, IntoHandler};
pub use http::{Body, Headers, IntoReply, Json, Method, Reply, Request, Response, StatusCode};
pub use middleware::{LoggerMiddleware, Middleware, Next};
pub use router::RouteError;
pub use server::{DispatchError, Server, ServerBuilder, ServerError};
