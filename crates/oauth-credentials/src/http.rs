//! HTTP requester capability
//!
//! The library never opens sockets itself. Everything that talks to a token
//! endpoint, revoke endpoint or protected API goes through an
//! [`HttpRequester`], so callers choose the client, TLS stack and timeout
//! policy. `reqwest::Client` implements it out of the box, and the
//! authorize-and-retry decorator implements it again on top of any requester.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};

use crate::error::{Error, Result};

/// Request body.
///
/// `Stream` bodies can only be read once. Anything that may need to replay a
/// request has to [`Body::buffer`] it first.
pub enum Body {
    Empty,
    Bytes(Bytes),
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

impl Body {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Body::Stream(Box::pin(stream))
    }

    /// Read a stream body fully into memory. Other bodies are returned as-is.
    pub async fn buffer(self) -> Result<Body> {
        match self {
            Body::Stream(stream) => {
                let buffered = stream
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok::<_, std::io::Error>(acc)
                    })
                    .await
                    .map_err(|e| Error::Body(e.to_string()))?;
                Ok(Body::Bytes(buffered.freeze()))
            }
            other => Ok(other),
        }
    }

    /// Clone a replayable body. Returns `None` for unbuffered streams.
    pub fn try_clone(&self) -> Option<Body> {
        match self {
            Body::Empty => Some(Body::Empty),
            Body::Bytes(bytes) => Some(Body::Bytes(bytes.clone())),
            Body::Stream(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(&[][..]),
            Body::Bytes(bytes) => Some(bytes.as_ref()),
            Body::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Empty"),
            Body::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Body::Stream(_) => write!(f, "Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// An outgoing request.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// `application/x-www-form-urlencoded` POST, as token endpoints expect.
    pub fn post_form(uri: impl Into<String>, form: String) -> Self {
        let mut request = Self::new(Method::POST, uri).with_body(form);
        request.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        request
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the `User-Agent` header, skipping values that are not valid header text.
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        if let Some(value) = user_agent.and_then(|ua| HeaderValue::from_str(ua).ok()) {
            self.headers.insert(USER_AGENT, value);
        }
        self
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Something that can send an [`HttpRequest`] and return the full response.
///
/// Uses a boxed future so the trait stays dyn-compatible (`Arc<dyn HttpRequester>`).
/// Only transport failures are errors; any HTTP status is a successful response.
pub trait HttpRequester: Send + Sync {
    fn request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

impl<T: HttpRequester + ?Sized> HttpRequester for Arc<T> {
    fn request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        (**self).request(request)
    }
}

impl<T: HttpRequester + ?Sized> HttpRequester for &T {
    fn request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        (**self).request(request)
    }
}

impl HttpRequester for reqwest::Client {
    fn request(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let HttpRequest {
                method,
                uri,
                headers,
                body,
            } = request;

            let mut builder = reqwest::Client::request(self, method, &uri).headers(headers);
            builder = match body {
                Body::Empty => builder,
                Body::Bytes(bytes) => builder.body(bytes),
                Body::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
            };

            let response = builder
                .send()
                .await
                .map_err(|e| Error::Http(format!("request to {uri} failed: {e}")))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Http(format!("reading response from {uri} failed: {e}")))?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}
