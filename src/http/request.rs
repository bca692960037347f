//! HTTP/1.1 request parsing.
//!
//! The parser works on one read chunk at a time and follows a deliberately
//! small wire contract:
//!
//! ```text
//! VERB SP PATH SP VERSION CRLF
//! Name: value CRLF        (zero or more)
//! CRLF
//! body...
//! ```
//!
//! Everything after the first blank line is the body; `Content-Length` is not
//! consulted.

use std::collections::HashMap;
use std::str;

use thiserror::Error;

use super::{Headers, Method};
use crate::context::{Extensions, PathParams};

const LINE_SEP: &str = "\r\n";
const HEAD_SEP: &str = "\r\n\r\n";
const HEADER_SEP: char = ':';

/// Structural violations of the request wire format.
///
/// All variants are answered with `400 Bad Request`; the distinction only
/// shows up in logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request is not valid UTF-8")]
    InvalidUtf8(#[from] str::Utf8Error),

    #[error("missing blank line between head and body")]
    MissingSeparator,

    #[error("malformed request line: {0:?}")]
    InvalidRequestLine(String),

    #[error("malformed header line: {0:?}")]
    InvalidHeader(String),
}

/// A parsed HTTP request.
///
/// Created by [`Request::parse`]. Path parameters are empty until the router
/// fills them in.
///
/// # Examples
///
/// ```
/// use microhttp::http::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.headers().get("Host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    version: String,
    headers: Headers,
    raw_query: Option<String>,
    query: HashMap<String, String>,
    params: PathParams,
    body: String,
    extensions: Extensions,
}

impl Request {
    /// Parses one raw request chunk.
    ///
    /// Trailing NUL bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] when the bytes are not UTF-8, the blank-line
    /// separator is missing, the request line does not hold exactly three
    /// tokens, or a header line has no `:`. One space after the colon is
    /// dropped from the value.
    pub fn parse(buf: &[u8]) -> Result<Self, RequestError> {
        let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let text = str::from_utf8(&buf[..end])?;

        let (head, body) = text
            .split_once(HEAD_SEP)
            .ok_or(RequestError::MissingSeparator)?;

        let mut lines = head.split(LINE_SEP);
        let request_line = lines.next().unwrap_or_default();

        let tokens: Vec<&str> = request_line.split(' ').collect();
        let [verb, target, version] = tokens.as_slice() else {
            return Err(RequestError::InvalidRequestLine(request_line.to_owned()));
        };
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(RequestError::InvalidRequestLine(request_line.to_owned()));
        }

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = line
                .split_once(HEADER_SEP)
                .ok_or_else(|| RequestError::InvalidHeader(line.to_owned()))?;
            headers.insert(name, value.strip_prefix(' ').unwrap_or(value));
        }

        let (path, raw_query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (*target, None),
        };

        Ok(Self {
            method: Method::from_token(verb),
            path: path.to_owned(),
            version: (*version).to_owned(),
            headers,
            raw_query: raw_query.map(str::to_owned),
            query: raw_query.map(parse_query_string).unwrap_or_default(),
            params: PathParams::new(),
            body: body.to_owned(),
            extensions: Extensions::new(),
        })
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the protocol token of the request line, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the request headers, names exactly as received.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    /// Returns all parsed query parameters.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Returns the path parameters captured by the matched route.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Returns a single captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Returns the raw request body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// The `serde_json` error if the body is not valid JSON for `T`.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_str(&self.body)
    }

    /// Returns the values middleware attached to this request.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the request extensions.
    ///
    /// # Examples
    ///
    /// ```
    /// use microhttp::http::Request;
    ///
    /// #[derive(Clone)]
    /// struct User(String);
    ///
    /// let mut req = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    /// req.extensions_mut().insert(User("ada".into()));
    /// assert_eq!(req.extensions().get::<User>().map(|u| u.0.as_str()), Some("ada"));
    /// ```
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }
}

/// Parses a URL query string (`key=value&flag`) into a `HashMap`.
///
/// A pair without `=` maps to an empty value and empty pairs are skipped.
/// Nothing is percent-decoded.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_wire(verb: &str, target: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut raw = format!("{verb} {target} HTTP/1.1\r\n");
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        raw.push_str(body);
        raw
    }

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), "HTTP/1.1");
        assert_eq!(req.headers().get("Host"), Some("localhost"));
        assert_eq!(req.body(), "");
        assert!(req.params().is_empty());
    }

    #[test]
    fn round_trip_preserves_fields() {
        let headers = [
            ("Host", "example.com"),
            ("authorization", "token: with colon"),
            ("X-Empty", ""),
        ];
        let body = "{\"title\": \"buy milk\"}\r\n\r\ntrailing";
        let raw = to_wire("POST", "/todos", &headers, body);

        let req = Request::parse(raw.as_bytes()).unwrap();
        assert_eq!(req.method().as_str(), "POST");
        assert_eq!(req.path(), "/todos");
        assert_eq!(req.body(), body);
        assert_eq!(req.headers().len(), headers.len());
        for (name, value) in headers {
            assert_eq!(req.headers().get(name), Some(value));
        }
    }

    #[test]
    fn query_string_is_split_from_path() {
        let req = Request::parse(b"GET /?checked=true&x HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path(), "/");
        assert_eq!(req.query_string(), Some("checked=true&x"));
        assert_eq!(req.query_param("checked"), Some("true"));
        assert_eq!(req.query_param("x"), Some(""));
        assert_eq!(req.query().len(), 2);
    }

    #[test]
    fn query_value_keeps_later_equals_signs() {
        let req = Request::parse(b"GET /s?q=a=b&&k= HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.query_param("q"), Some("a=b"));
        assert_eq!(req.query_param("k"), Some(""));
        assert_eq!(req.query().len(), 2);
    }

    #[test]
    fn query_and_header_keys_keep_case() {
        let raw = b"GET /?Flag=1 HTTP/1.1\r\nX-Token: abc\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("flag"), None);
        assert_eq!(req.query_param("Flag"), Some("1"));
        assert_eq!(req.headers().get("x-token"), None);
    }

    #[test]
    fn trailing_nul_bytes_are_ignored() {
        let mut raw = b"GET /ping HTTP/1.1\r\n\r\nbody".to_vec();
        raw.extend_from_slice(&[0, 0, 0]);
        let req = Request::parse(&raw).unwrap();
        assert_eq!(req.body(), "body");
    }

    #[test]
    fn missing_separator_is_rejected() {
        let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
        assert_eq!(Request::parse(raw).unwrap_err(), RequestError::MissingSeparator);
    }

    #[test]
    fn request_line_needs_three_tokens() {
        for line in ["GET /", "GET / HTTP/1.1 extra", "GET  / HTTP/1.1", " / HTTP/1.1"] {
            let raw = format!("{line}\r\n\r\n");
            assert!(
                matches!(
                    Request::parse(raw.as_bytes()),
                    Err(RequestError::InvalidRequestLine(_))
                ),
                "{line:?} should be rejected"
            );
        }
    }

    #[test]
    fn header_space_after_colon_is_optional() {
        let raw = b"GET / HTTP/1.1\r\nHost:localhost\r\nContent-Type:  text/plain\r\n\r\n";
        let request = Request::parse(raw).unwrap();
        assert_eq!(request.headers().get("Host"), Some("localhost"));
        assert_eq!(request.headers().get("Content-Type"), Some(" text/plain"));
    }

    #[test]
    fn header_without_colon_is_rejected() {
        let raw = b"GET / HTTP/1.1\r\nHost localhost\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidHeader(line)) if line == "Host localhost"
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let raw = b"GET /\xff HTTP/1.1\r\n\r\n";
        assert!(matches!(Request::parse(raw), Err(RequestError::InvalidUtf8(_))));
    }

    #[test]
    fn unknown_verb_is_kept() {
        let req = Request::parse(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method(), &Method::Custom("BREW".into()));
    }

    #[test]
    fn json_body() {
        let raw = b"POST / HTTP/1.1\r\n\r\n{\"title\": \"x\"}";
        let req = Request::parse(raw).unwrap();
        let value: serde_json::Value = req.json().unwrap();
        assert_eq!(value["title"], "x");
    }
}
