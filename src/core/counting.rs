//! Purpose: Tally the bytes a response sink accepts without changing what the sink sees.
//! Exports: `ResponseSink`, `SinkWrite`, `ByteCounter`, `BufferedResponse`.
//! Role: Response-size accounting for the HTTP host's access log.
//! Invariants: `ByteCounter` never synthesizes errors; outcomes pass through unchanged.
//! Invariants: The tally is the sum of `accepted` across writes since the last reset,
//!             including partial counts reported alongside an error.
//! Notes: No locking; a counter is exactly as thread-safe as the sink it wraps.
use std::io;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

/// Outcome of a single body write: bytes the sink took, plus the error that cut it short.
#[derive(Debug)]
pub struct SinkWrite {
    pub accepted: usize,
    pub error: Option<io::Error>,
}

impl SinkWrite {
    pub fn complete(accepted: usize) -> Self {
        Self {
            accepted,
            error: None,
        }
    }

    pub fn short(accepted: usize, error: io::Error) -> Self {
        Self {
            accepted,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A byte-oriented HTTP response target: status, mutable headers, body writes.
pub trait ResponseSink {
    fn headers(&mut self) -> &mut HeaderMap;
    fn write_status(&mut self, status: StatusCode);
    fn write(&mut self, buf: &[u8]) -> SinkWrite;
}

impl<S: ResponseSink + ?Sized> ResponseSink for &mut S {
    fn headers(&mut self) -> &mut HeaderMap {
        (**self).headers()
    }

    fn write_status(&mut self, status: StatusCode) {
        (**self).write_status(status)
    }

    fn write(&mut self, buf: &[u8]) -> SinkWrite {
        (**self).write(buf)
    }
}

#[derive(Debug)]
pub struct ByteCounter<S> {
    inner: S,
    count: i64,
}

impl<S: ResponseSink> ByteCounter<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, count: 0 }
    }

    pub fn counter(&self) -> i64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ResponseSink> ResponseSink for ByteCounter<S> {
    fn headers(&mut self) -> &mut HeaderMap {
        self.inner.headers()
    }

    fn write_status(&mut self, status: StatusCode) {
        self.inner.write_status(status)
    }

    fn write(&mut self, buf: &[u8]) -> SinkWrite {
        let outcome = self.inner.write(buf);
        self.count = self
            .count
            .saturating_add(i64::try_from(outcome.accepted).unwrap_or(i64::MAX));
        outcome
    }
}

/// In-memory sink that becomes an axum response once the handler is done writing.
#[derive(Debug)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    limit: Option<usize>,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            limit: None,
        }
    }

    /// Caps the body; writes past the cap are accepted partially and report an error.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl ResponseSink for BufferedResponse {
    fn headers(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn write(&mut self, buf: &[u8]) -> SinkWrite {
        let room = match self.limit {
            Some(limit) => limit.saturating_sub(self.body.len()),
            None => buf.len(),
        };
        let accepted = room.min(buf.len());
        self.body.extend_from_slice(&buf[..accepted]);
        if accepted < buf.len() {
            return SinkWrite::short(
                accepted,
                io::Error::new(io::ErrorKind::WriteZero, "response body limit reached"),
            );
        }
        SinkWrite::complete(accepted)
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferedResponse, ByteCounter, ResponseSink, SinkWrite};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use std::io;

    /// Accepts at most `take` bytes per write and fails when it accepts fewer than offered.
    struct ShortSink {
        headers: HeaderMap,
        status: Option<StatusCode>,
        take: usize,
    }

    impl ShortSink {
        fn new(take: usize) -> Self {
            Self {
                headers: HeaderMap::new(),
                status: None,
                take,
            }
        }
    }

    impl ResponseSink for ShortSink {
        fn headers(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_status(&mut self, status: StatusCode) {
            self.status = Some(status);
        }

        fn write(&mut self, buf: &[u8]) -> SinkWrite {
            if buf.len() <= self.take {
                SinkWrite::complete(buf.len())
            } else {
                SinkWrite::short(self.take, io::Error::other("peer closed"))
            }
        }
    }

    #[test]
    fn counts_every_accepted_byte() {
        let mut counter = ByteCounter::new(BufferedResponse::new());
        assert!(counter.write(b"hello").is_ok());
        assert!(counter.write(b"!").is_ok());
        assert_eq!(counter.counter(), 6);
        assert_eq!(counter.get_ref().body(), b"hello!");

        counter.reset();
        assert_eq!(counter.counter(), 0);
        counter.reset();
        assert_eq!(counter.counter(), 0);
    }

    #[test]
    fn short_write_counts_partial_bytes_and_passes_error() {
        let mut counter = ByteCounter::new(ShortSink::new(3));
        let outcome = counter.write(b"hello");
        assert_eq!(outcome.accepted, 3);
        let err = outcome.error.expect("error passed through");
        assert_eq!(err.to_string(), "peer closed");
        assert_eq!(counter.counter(), 3);
    }

    #[test]
    fn write_outcomes_match_the_wrapped_sink() {
        let inputs: [&[u8]; 4] = [b"", b"ab", b"abcd", b"abcdefgh"];
        let mut direct = ShortSink::new(4);
        let mut counted = ByteCounter::new(ShortSink::new(4));
        let mut expected_total = 0;
        for input in inputs {
            let want = direct.write(input);
            let got = counted.write(input);
            assert_eq!(got.accepted, want.accepted);
            assert_eq!(
                got.error.as_ref().map(|err| (err.kind(), err.to_string())),
                want.error.as_ref().map(|err| (err.kind(), err.to_string()))
            );
            expected_total += want.accepted as i64;
        }
        assert_eq!(counted.counter(), expected_total);
    }

    #[test]
    fn headers_and_status_are_delegated() {
        let mut counter = ByteCounter::new(ShortSink::new(16));
        counter
            .headers()
            .insert("content-type", HeaderValue::from_static("application/json"));
        counter.write_status(StatusCode::CREATED);
        assert_eq!(counter.counter(), 0);

        let inner = counter.into_inner();
        assert_eq!(inner.status, Some(StatusCode::CREATED));
        assert_eq!(
            inner.headers.get("content-type"),
            Some(&HeaderValue::from_static("application/json"))
        );
    }

    #[test]
    fn writes_before_status_are_counted() {
        let mut counter = ByteCounter::new(BufferedResponse::new());
        counter.write(b"early");
        counter.write_status(StatusCode::ACCEPTED);
        counter.write(b"late");
        assert_eq!(counter.counter(), 9);
        assert_eq!(counter.get_ref().status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn buffered_limit_produces_short_write() {
        let mut counter = ByteCounter::new(BufferedResponse::new().with_limit(4));
        let first = counter.write(b"abc");
        assert!(first.is_ok());
        let second = counter.write(b"def");
        assert_eq!(second.accepted, 1);
        assert_eq!(
            second.error.as_ref().map(|err| err.kind()),
            Some(io::ErrorKind::WriteZero)
        );
        assert_eq!(counter.counter(), 4);
        assert_eq!(counter.get_ref().body(), b"abcd");
    }
}
