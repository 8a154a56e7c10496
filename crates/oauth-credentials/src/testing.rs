//! Test doubles: a scripted HTTP requester and a log capture.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::http::{HttpRequest, HttpRequester, HttpResponse};

/// Scripted body that makes the mock answer with the request body.
pub const ECHO_REQUEST_BODY: &str = "echo_request_body";

/// A request as the mock saw it, body fully read.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn form(&self) -> HashMap<String, String> {
        form_urlencoded::parse(&self.body).into_owned().collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Replays canned `(status, body)` responses in order and records every request.
///
/// Running out of responses is a transport error, so an unexpected extra
/// request fails the test instead of hanging it.
#[derive(Debug, Default)]
pub struct HttpMockSequence {
    responses: Mutex<VecDeque<(StatusCode, &'static str)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl HttpMockSequence {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = (StatusCode, &'static str)>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl HttpRequester for HttpMockSequence {
    fn request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let body = request.body.buffer().await?;
            let body = Bytes::copy_from_slice(body.as_bytes().unwrap_or_default());
            self.requests.lock().unwrap().push(RecordedRequest {
                method: request.method,
                uri: request.uri,
                headers: request.headers,
                body: body.clone(),
            });

            let (status, scripted) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Http("no scripted response left".into()))?;
            let response_body = if scripted == ECHO_REQUEST_BODY {
                body
            } else {
                Bytes::from_static(scripted.as_bytes())
            };
            Ok(HttpResponse::new(status, response_body))
        })
    }
}

/// Formatted log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains("WARN"))
            .map(str::to_owned)
            .collect()
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Route this thread's `tracing` output into a buffer until the guard drops.
///
/// Only sees events emitted on the current thread, so use it with the
/// default current-thread `#[tokio::test]` runtime.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, LogCapture) {
    let capture = LogCapture::default();
    let buffer = capture.0.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || CaptureWriter(buffer.clone()))
        .finish();
    (tracing::subscriber::set_default(subscriber), capture)
}
