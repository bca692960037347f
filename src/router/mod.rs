//! Request routing: map `VERB /pattern` keys to handlers.
//!
//! Patterns are `/`-separated segments; a segment starting with `:` is a named
//! capture:
//!
//! | Pattern              | Example match   | Captured params |
//! |----------------------|-----------------|-----------------|
//! | `/ping`              | `/ping`         | *(none)*        |
//! | `/todos/:id`         | `/todos/42`     | `id → "42"`     |
//! | `/:user/posts/:post` | `/ada/posts/7`  | `user → "ada"`, `post → "7"` |
//!
//! Lookup first tries the literal `VERB PATH` key (only for patterns without
//! captures), then scans the routes registered under the request's verb in
//! registration order. The first route whose segment count matches and whose
//! literal segments are equal wins; a literal route registered *after* a
//! parameterized one that also matches is never reached through the scan.
//! Paths are not normalized: `/todos/` has one more (empty) segment than
//! `/todos`.

use std::collections::HashMap;

use thiserror::Error;

use crate::context::PathParams;
use crate::handler::Handler;
use crate::http::Method;

/// Sigil marking a named segment in a route pattern.
pub const PARAM_SIGIL: char = ':';

/// Rejected route registrations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route key must look like \"VERB /path\", got {0:?}")]
    InvalidKey(String),

    #[error("routes cannot be registered under method {0}")]
    UnsupportedMethod(String),

    #[error("invalid route pattern {0:?}: must start with '/' and contain no whitespace")]
    InvalidPattern(String),

    #[error("invalid route pattern {0:?}: named segment has no name")]
    EmptyParamName(String),
}

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Parameter(String),
}

/// Compiled representation of a route pattern string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse a route pattern string such as `"/todos/:id"`.
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidPattern`] if the pattern does not start with `/`
    /// or contains whitespace, [`RouteError::EmptyParamName`] for a bare `:`
    /// segment.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if !pattern.starts_with('/') || pattern.chars().any(char::is_whitespace) {
            return Err(RouteError::InvalidPattern(pattern.to_owned()));
        }

        let segments = pattern
            .split('/')
            .map(|s| match s.strip_prefix(PARAM_SIGIL) {
                Some("") => Err(RouteError::EmptyParamName(pattern.to_owned())),
                Some(name) => Ok(Segment::Parameter(name.to_owned())),
                None => Ok(Segment::Static(s.to_owned())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: pattern.to_owned(),
            segments,
        })
    }

    /// Returns the pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns `true` if the pattern has at least one named segment.
    pub fn has_params(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Parameter(_)))
    }

    /// Try to match `path` against this pattern, returning captured params.
    pub fn captures(&self, path: &str) -> Option<PathParams> {
        let path_segments: Vec<&str> = path.split('/').collect();
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::new();
        for (seg, path_seg) in self.segments.iter().zip(path_segments) {
            match seg {
                Segment::Static(s) => {
                    if s != path_seg {
                        return None;
                    }
                }
                Segment::Parameter(name) => params.insert(name.as_str(), path_seg),
            }
        }
        Some(params)
    }
}

/// Splits a `"VERB /path"` registration key.
///
/// # Errors
///
/// [`RouteError::InvalidKey`] without a single separating space,
/// [`RouteError::UnsupportedMethod`] for verbs outside [`Method::ROUTABLE`],
/// or any [`Pattern::parse`] error.
pub fn parse_key(key: &str) -> Result<(Method, Pattern), RouteError> {
    let (verb, pattern) = key
        .split_once(' ')
        .ok_or_else(|| RouteError::InvalidKey(key.to_owned()))?;
    let method = Method::from_token(verb);
    if !method.is_routable() {
        return Err(RouteError::UnsupportedMethod(verb.to_owned()));
    }
    Ok((method, Pattern::parse(pattern)?))
}

// A single registered route binding a method + pattern to a handler.
struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// A successful lookup: the route's handler and the captured parameters.
pub struct RouteMatch {
    pub handler: Handler,
    pub params: PathParams,
}

/// The route table.
///
/// Populated while the server is being built and read-only afterwards.
///
/// # Examples
///
/// ```rust
/// use microhttp::http::{Method, Request};
/// use microhttp::router::{RouteTable, parse_key};
/// use microhttp::handler::handler;
///
/// let mut table = RouteTable::new();
/// let (method, pattern) = parse_key("GET /todos/:id").unwrap();
/// table.insert(method, pattern, handler(|_req: Request| async { "todo" }));
///
/// let found = table.lookup(&Method::Get, "/todos/42").unwrap();
/// assert_eq!(found.params.get("id"), Some("42"));
/// assert!(table.lookup(&Method::Get, "/todos/42/x").is_none());
/// ```
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    // "VERB /pattern" → index into `routes`
    keys: HashMap<String, usize>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. Re-registering the same method and pattern replaces
    /// the handler and keeps the original position.
    pub fn insert(&mut self, method: Method, pattern: Pattern, handler: Handler) {
        let key = route_key(&method, pattern.as_str());
        match self.keys.get(&key) {
            Some(&idx) => self.routes[idx].handler = handler,
            None => {
                self.keys.insert(key, self.routes.len());
                self.routes.push(Route {
                    method,
                    pattern,
                    handler,
                });
            }
        }
    }

    /// Finds the route for `method` and `path` (query already stripped).
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let exact = self
            .keys
            .get(&route_key(method, path))
            .map(|&idx| &self.routes[idx])
            .filter(|route| !route.pattern.has_params());
        if let Some(route) = exact {
            return Some(RouteMatch {
                handler: route.handler.clone(),
                params: PathParams::new(),
            });
        }

        self.routes
            .iter()
            .filter(|route| &route.method == method)
            .find_map(|route| {
                route.pattern.captures(path).map(|params| RouteMatch {
                    handler: route.handler.clone(),
                    params,
                })
            })
    }

    /// Rewrites every handler, e.g. to wrap it in global middleware.
    pub fn map_handlers(&mut self, mut f: impl FnMut(Handler) -> Handler) {
        for route in &mut self.routes {
            route.handler = f(route.handler.clone());
        }
    }

    /// Iterates over `(method, pattern)` in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.routes
            .iter()
            .map(|route| (&route.method, route.pattern.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn route_key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}
