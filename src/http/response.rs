//! Handler replies and HTTP/1.1 response serialization.
//!
//! Handlers return any [`IntoReply`] value. The accepted shapes are:
//!
//! | Shape                         | Status | Extra headers |
//! |-------------------------------|--------|---------------|
//! | `body`                        | 200    | none          |
//! | `(body, status)`              | status | none          |
//! | `(body, status, headers)`     | status | headers       |
//!
//! where `body` is text (`String`, `&'static str`) or a structured value
//! (`serde_json::Value`, [`Json<T>`]). The resulting [`Reply`] is turned into a
//! [`Response`] by [`Response::from_reply`]. Any status code is written; codes
//! missing from the reason table get a filler phrase.

use std::io;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::Formatter;
use thiserror::Error;

use super::{Headers, StatusCode};
use crate::handler::{BoxError, HandlerResult};

/// Content type written for structured bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A reply broke the handler contract.
#[derive(Debug, Error)]
pub enum InvalidReply {
    #[error("failed to encode JSON body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The body of a [`Reply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Written verbatim with the default (or overridden) content type.
    Text(String),
    /// Encoded as JSON text and written as `application/json`.
    Json(Value),
}

impl Body {
    /// An empty text body.
    pub fn empty() -> Self {
        Body::Text(String::new())
    }

    /// Returns `true` for a structured body.
    pub fn is_json(&self) -> bool {
        matches!(self, Body::Json(_))
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_owned())
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

/// Serializes any `T: Serialize` as a structured reply body.
///
/// ```
/// use microhttp::http::{IntoReply, Json};
///
/// #[derive(serde::Serialize)]
/// struct Todo { id: String, checked: bool }
///
/// let reply = Json(Todo { id: "0".into(), checked: false }).into_reply().unwrap();
/// assert!(reply.body().is_json());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

/// Conversion into a [`Body`].
///
/// Fails only when a [`Json`] value cannot be serialized.
pub trait IntoBody {
    fn into_body(self) -> Result<Body, BoxError>;
}

impl IntoBody for Body {
    fn into_body(self) -> Result<Body, BoxError> {
        Ok(self)
    }
}

impl IntoBody for String {
    fn into_body(self) -> Result<Body, BoxError> {
        Ok(Body::Text(self))
    }
}

impl IntoBody for &'static str {
    fn into_body(self) -> Result<Body, BoxError> {
        Ok(Body::from(self))
    }
}

impl IntoBody for Value {
    fn into_body(self) -> Result<Body, BoxError> {
        Ok(Body::Json(self))
    }
}

impl<T: Serialize> IntoBody for Json<T> {
    fn into_body(self) -> Result<Body, BoxError> {
        Ok(Body::Json(serde_json::to_value(self.0)?))
    }
}

/// The value produced by a handler or a short-circuiting middleware.
///
/// # Examples
///
/// ```
/// use microhttp::http::Reply;
///
/// let reply = Reply::new("")
///     .with_status(200)
///     .header("Authorization", "token");
/// assert_eq!(reply.status(), 200);
/// assert_eq!(reply.headers().get("Authorization"), Some("token"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    body: Body,
    status: u16,
    headers: Headers,
    content_type: Option<String>,
}

impl Reply {
    /// Creates a `200` reply with the given body.
    pub fn new(body: impl Into<Body>) -> Self {
        Self {
            body: body.into(),
            status: StatusCode::OK.as_u16(),
            headers: Headers::new(),
            content_type: None,
        }
    }

    /// Creates an empty-bodied reply with the given status.
    pub fn empty(status: u16) -> Self {
        Self::new(Body::empty()).with_status(status)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Appends an extra response header; they are written in insertion order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Overrides the server's default content type for a text body.
    ///
    /// Structured bodies are always written as `application/json`.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Returns the numeric status as given by the handler.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the body, not yet encoded.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the extra headers written after `Content-Length`.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    fn with_body(body: Body, status: u16, headers: Headers) -> Self {
        Self {
            body,
            status,
            headers,
            content_type: None,
        }
    }
}

/// Conversion from a handler's return value into a [`Reply`].
///
/// Returning `Err` from a handler (through the `Result` impl) is a handler
/// failure and is answered with `500`.
pub trait IntoReply {
    fn into_reply(self) -> HandlerResult;
}

impl IntoReply for Reply {
    fn into_reply(self) -> HandlerResult {
        Ok(self)
    }
}

macro_rules! body_into_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> HandlerResult {
                    Ok(Reply::new(self.into_body()?))
                }
            }
        )*
    };
}

body_into_reply!(Body, String, &'static str, Value);

impl<T: Serialize> IntoReply for Json<T> {
    fn into_reply(self) -> HandlerResult {
        Ok(Reply::new(self.into_body()?))
    }
}

impl<B: IntoBody> IntoReply for (B, u16) {
    fn into_reply(self) -> HandlerResult {
        let (body, status) = self;
        Ok(Reply::with_body(body.into_body()?, status, Headers::new()))
    }
}

impl<B, H> IntoReply for (B, u16, H)
where
    B: IntoBody,
    H: Into<Headers>,
{
    fn into_reply(self) -> HandlerResult {
        let (body, status, headers) = self;
        Ok(Reply::with_body(body.into_body()?, status, headers.into()))
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<BoxError>,
{
    fn into_reply(self) -> HandlerResult {
        match self {
            Ok(value) => value.into_reply(),
            Err(err) => Err(err.into()),
        }
    }
}

/// A response ready to be written: status, content type, extra headers and
/// encoded body.
///
/// # Examples
///
/// ```
/// use microhttp::http::{Reply, Response};
///
/// let reply = Reply::new(serde_json::json!({"resp": "pong"}));
/// let response = Response::from_reply(reply, "application/json").unwrap();
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert_eq!(
///     text,
///     "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n{\"resp\": \"pong\"}"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    content_type: String,
    headers: Headers,
    body: String,
}

impl Response {
    /// Creates an empty-bodied response, as used for `400`, `404` and `500`.
    pub fn empty(status: StatusCode, content_type: &str) -> Self {
        Self {
            status,
            content_type: content_type.to_owned(),
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Builds a response from a handler reply.
    ///
    /// # Errors
    ///
    /// [`InvalidReply::Encode`] if a structured body cannot be encoded.
    pub fn from_reply(reply: Reply, default_content_type: &str) -> Result<Self, InvalidReply> {
        let status = StatusCode::from_u16(reply.status);

        let (content_type, body) = match reply.body {
            Body::Json(value) => (JSON_CONTENT_TYPE.to_owned(), encode_json(&value)?),
            Body::Text(text) => (
                reply
                    .content_type
                    .unwrap_or_else(|| default_content_type.to_owned()),
                text,
            ),
        };

        Ok(Self {
            status,
            content_type,
            headers: reply.headers,
            body,
        })
    }

    /// Returns the status written on the status line.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the `Content-Type` value.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Returns the extra headers in write order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the encoded body text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// `Content-Type` and `Content-Length` (the body's byte length) come first,
    /// followed by the extra headers in the order they were supplied.
    pub fn into_bytes(self) -> BytesMut {
        let content_length = self.body.len();
        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), self.status.reason()).as_bytes());

        buf.put(format!("Content-Type: {}\r\n", self.content_type).as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(self.headers.to_string().as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_bytes());

        buf
    }
}

/// Writes JSON with `", "` between items and `": "` after keys, e.g.
/// `{"id": "0", "tags": [1, 2]}`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn encode_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut out = Vec::with_capacity(128);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut ser)?;
    String::from_utf8(out).map_err(|e| <serde_json::Error as serde::ser::Error>::custom(e))
}
