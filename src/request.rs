//! Incoming HTTP request type.
//!
//! A [`Request`] is built by the transport (or by hand in tests), flows
//! through the pipeline by value, and is consumed by whichever stage or
//! terminal handler produces the response.
//!
//! # The attachment map
//!
//! Stages pass data forward through a typed attachment map: each stage
//! declares its own key *type* and owns the values it writes under it.
//! `attach` a `RequestTag`, a parsed `JsonBody`, an authenticated identity —
//! later stages and the terminal handler read them back by type with
//! [`attachment`](Request::attachment). TypeId keys mean two stages cannot
//! collide unless they share a type on purpose.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::method::Method;

// ── RequestMeta ───────────────────────────────────────────────────────────────

/// The part of a request that outlives the request itself.
///
/// Snapshotted by the pipeline at dispatch entry and handed to error
/// stages and the access logger — the `Request` proper may already have
/// been consumed by the chain (or dropped with it) by the time a fault or
/// an abandoned connection needs describing.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    /// Client identity: first `x-forwarded-for` entry, else the peer IP.
    pub client: String,
    /// The `user-agent` header, if the client sent one.
    pub agent: Option<String>,
    /// When the transport finished parsing the request.
    pub received_at: Instant,
    /// Absolute deadline, if the transport set one. The pipeline applies
    /// its own default when this is `None`.
    pub deadline: Option<Instant>,
}

// ── Request ───────────────────────────────────────────────────────────────────

/// An incoming HTTP request.
pub struct Request {
    meta: RequestMeta,
    headers: Vec<(String, String)>,
    query: String,
    body: Bytes,
    params: HashMap<String, String>,
    attachments: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Request {
    /// Creates a request with empty headers, body, and query.
    ///
    /// The transport layers the rest on with the `with_*` builders; tests
    /// use the same surface.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            meta: RequestMeta {
                method,
                path: path.into(),
                client: "unknown".to_owned(),
                agent: None,
                received_at: Instant::now(),
                deadline: None,
            },
            headers: Vec::new(),
            query: String::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            attachments: HashMap::new(),
        }
    }

    /// Replaces the header list and re-derives the `user-agent` snapshot.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.meta.agent = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
            .map(|(_, v)| v.clone());
        self.headers = headers;
        self
    }

    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut headers = self.headers.clone();
        headers.push((name.into(), value.into()));
        self.with_headers(headers)
    }

    /// Raw query string, without the leading `?`.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.meta.client = client.into();
        self
    }

    /// Sets an absolute deadline, overriding the pipeline default.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.meta.deadline = Some(deadline);
        self
    }

    pub fn method(&self) -> Method {
        self.meta.method
    }

    pub fn path(&self) -> &str {
        &self.meta.path
    }

    /// Client identity this request is attributed to (rate limiting, logs).
    pub fn client(&self) -> &str {
        &self.meta.client
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a query parameter, undecoded.
    ///
    /// For `?page=2&sort=name`, `req.query("sort")` returns `Some("name")`.
    /// Values are the raw wire bytes — percent-decoding is the caller's
    /// business, same as body bytes.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn raw_query(&self) -> &str {
        &self.query
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    // ── Attachments ───────────────────────────────────────────────────────────

    /// Stores a typed attachment, replacing any previous value of the same type.
    pub fn attach<T: Send + Sync + 'static>(&mut self, value: T) {
        self.attachments.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Reads a typed attachment left by an earlier stage.
    pub fn attachment<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.attachments
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed attachment.
    pub fn detach<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.attachments
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|boxed| *boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::new(Method::Get, "/")
            .with_header("Content-Type", "application/json");
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn agent_is_snapshotted_from_headers() {
        let req = Request::new(Method::Get, "/").with_header("User-Agent", "curl/8.5");
        assert_eq!(req.meta().agent.as_deref(), Some("curl/8.5"));
    }

    #[test]
    fn query_parameters() {
        let req = Request::new(Method::Get, "/users").with_query("page=2&sort=name");
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.query("sort"), Some("name"));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn attachments_round_trip_by_type() {
        #[derive(Debug, PartialEq)]
        struct Who(String);

        let mut req = Request::new(Method::Get, "/");
        assert!(req.attachment::<Who>().is_none());

        req.attach(Who("alice".into()));
        assert_eq!(req.attachment::<Who>(), Some(&Who("alice".into())));

        assert_eq!(req.detach::<Who>(), Some(Who("alice".into())));
        assert!(req.attachment::<Who>().is_none());
    }

    #[test]
    fn attach_replaces_same_type() {
        let mut req = Request::new(Method::Get, "/");
        req.attach(7_u32);
        req.attach(9_u32);
        assert_eq!(req.attachment::<u32>(), Some(&9));
    }
}
