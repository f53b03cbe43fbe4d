//! Request handlers.
//!
//! Every handler, whatever its shape, is stored as an `Arc<dyn Handler>` and
//! invoked the same way: payload in, future out. Typed and blocking closures
//! are adapted here.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use cgilink_message::{ErrorCode, ErrorInfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'static>>;

/// A request handler for one message type.
pub trait Handler: Send + Sync + 'static {
    /// Handle one decoded request payload.
    fn call(&self, payload: Value) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn call(&self, payload: Value) -> HandlerFuture {
        Box::pin(self(payload))
    }
}

/// Failure reported by a handler; becomes the payload of an `Error` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    code: ErrorCode,
    message: String,
    detail: Option<String>,
}

impl HandlerError {
    /// A plain handler failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::HandlerFailed,
            message: message.into(),
            detail: None,
        }
    }

    /// Build from any error, keeping its source chain as the detail string.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        let mut out = Self::new(err.to_string());
        if !causes.is_empty() {
            out.detail = Some(format!("caused by: {}", causes.join(": ")));
        }
        out
    }

    /// The request payload could not be deserialized.
    pub fn invalid_payload(err: &serde_json::Error) -> Self {
        Self {
            code: ErrorCode::InvalidPayload,
            message: format!("invalid request payload: {err}"),
            detail: None,
        }
    }

    /// The handler panicked.
    pub fn panicked(panic: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(text) = panic.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = panic.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            code: ErrorCode::HandlerPanicked,
            message: format!("handler panicked: {reason}"),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Convert into the wire description.
    pub fn into_info(self) -> ErrorInfo {
        ErrorInfo {
            code: self.code,
            message: self.message,
            detail: self.detail,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(&err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(&err)
    }
}

fn to_payload<T: Serialize>(value: T) -> Result<Value, HandlerError> {
    serde_json::to_value(value)
        .map_err(|err| HandlerError::new(format!("failed to serialize response: {err}")))
}

/// Async closure taking and returning serde types.
pub(crate) struct TypedHandler<Req, Resp, F> {
    f: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> TypedHandler<Req, Resp, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F, Fut> Handler for TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
{
    fn call(&self, payload: Value) -> HandlerFuture {
        let request = match serde_json::from_value::<Req>(payload) {
            Ok(request) => request,
            Err(err) => {
                let err = HandlerError::invalid_payload(&err);
                return Box::pin(async move { Err(err) });
            }
        };
        let pending = (self.f)(request);
        Box::pin(async move { to_payload(pending.await?) })
    }
}

/// Synchronous closure run on the blocking pool.
pub(crate) struct BlockingHandler<Req, Resp, F> {
    f: Arc<F>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> BlockingHandler<Req, Resp, F> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, F> Handler for BlockingHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Result<Resp, HandlerError> + Send + Sync + 'static,
{
    fn call(&self, payload: Value) -> HandlerFuture {
        let f = Arc::clone(&self.f);
        Box::pin(async move {
            let request = serde_json::from_value::<Req>(payload)
                .map_err(|err| HandlerError::invalid_payload(&err))?;
            match tokio::task::spawn_blocking(move || f(request)).await {
                Ok(result) => to_payload(result?),
                Err(join_err) if join_err.is_panic() => {
                    Err(HandlerError::panicked(join_err.into_panic()))
                }
                Err(join_err) => Err(HandlerError::new(format!(
                    "blocking handler cancelled: {join_err}"
                ))),
            }
        })
    }
}
