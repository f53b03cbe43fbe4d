use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cgilink_frame::{Frame, FrameError, LineCodec, LineEvent, DEFAULT_MAX_LINE_LENGTH};
use cgilink_message::{Envelope, ErrorCode, ErrorInfo, MessageError, MessageFactory};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::{ConnectionError, Result};
use crate::handler::{BlockingHandler, Handler, HandlerError, TypedHandler};

/// Default bound on frames waiting for the writer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Default time in-flight handlers get to finish after the peer hangs up.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time the writer gets to flush queued frames once the connection
/// closes.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection behavior configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Longest accepted line, inbound and outbound.
    pub max_line_length: usize,
    /// Frames that may wait for the writer before senders are suspended.
    pub outbound_capacity: usize,
    /// Upper bound for `send_request`; `None` waits until the connection closes.
    pub request_timeout: Option<Duration>,
    /// Grace period for in-flight handlers once the inbound stream ends.
    pub drain_timeout: Duration,
    /// Bound on writing out queued frames after close. A peer that stops
    /// reading loses whatever is still unwritten when it expires.
    pub flush_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            request_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// Lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Listening,
    Closed,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side of the stream.
    EndOfStream,
    /// [`Connection::close`] was called.
    Shutdown,
    /// The stream failed; `listen` returned the error.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EndOfStream => f.write_str("end of stream"),
            CloseReason::Shutdown => f.write_str("shutdown"),
            CloseReason::Failed(reason) => write!(f, "stream failed: {reason}"),
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    dispatcher: Dispatcher,
    factory: MessageFactory,
    state: Mutex<ConnectionState>,
    outbound: mpsc::Sender<Frame>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    close_reason: watch::Sender<Option<CloseReason>>,
    finished: watch::Sender<bool>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.borrow().as_ref().cloned()
    }

    fn encode(&self, envelope: &Envelope) -> Result<Frame> {
        let line = cgilink_message::encode(envelope)?;
        let max = self.config.max_line_length;
        if line.len() > max {
            return Err(ConnectionError::Frame(FrameError::LineTooLong {
                size: line.len(),
                max,
            }));
        }
        Ok(Frame::new(line))
    }

    async fn push(&self, frame: Frame) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Queue a frame without awaiting.
    ///
    /// Only a thread outside any runtime waits for queue space. Inside a
    /// runtime a full queue hands the frame to a spawned send, so it may land
    /// after frames queued later.
    fn blocking_push(&self, frame: Frame) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        let frame = match self.outbound.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(ConnectionError::Closed),
            Err(TrySendError::Full(frame)) => frame,
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("outbound queue full, deferring notification");
                let outbound = self.outbound.clone();
                handle.spawn(async move {
                    if outbound.send(frame).await.is_err() {
                        debug!("dropping deferred notification, connection closed");
                    }
                });
                Ok(())
            }
            Err(_) => self
                .outbound
                .blocking_send(frame)
                .map_err(|_| ConnectionError::Closed),
        }
    }

    fn notification(&self, msg_type: &str, payload: Value) -> Result<Frame> {
        self.encode(&MessageFactory::new_notification(msg_type, payload))
    }

    /// Write a handler's reply. A reply that cannot be encoded is replaced by
    /// an error so the caller is not left waiting.
    async fn deliver(&self, reply: Envelope) {
        let frame = match self.encode(&reply) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(msg_type = %reply.msg_type, error = %err, "reply could not be encoded");
                let Some(correlation_id) = reply.correlation_id else {
                    return;
                };
                let info = ErrorInfo::new(
                    ErrorCode::HandlerFailed,
                    format!("reply could not be encoded: {err}"),
                );
                match self.encode(&MessageFactory::new_error(reply.msg_type, correlation_id, info)) {
                    Ok(frame) => frame,
                    Err(_) => return,
                }
            }
        };
        if let Err(err) = self.push(frame).await {
            debug!(error = %err, "dropping reply");
        }
    }

    /// Move to `Closed` once. Fails pending calls and stops the loops.
    fn begin_close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == ConnectionState::Closed {
                return false;
            }
            *state = ConnectionState::Closed;
        }
        let failed = self.dispatcher.pending().fail_all();
        info!(reason = %reason, failed_calls = failed, "connection closed");
        self.close_reason.send_replace(Some(reason));
        self.shutdown.cancel();
        true
    }
}

enum ReadOutcome {
    EndOfStream,
    Cancelled,
}

/// One side of a cgilink stream.
///
/// Cheap to clone; clones share the same state. Handlers and listeners may be
/// registered before or during `listen`.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("handlers", self.inner.dispatcher.handlers())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (close_reason, _) = watch::channel(None);
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                dispatcher: Dispatcher::new(),
                factory: MessageFactory::new(),
                state: Mutex::new(ConnectionState::Created),
                outbound,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                close_reason,
                finished,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Outbound requests still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.dispatcher.pending().len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }

    /// Register a handler object for `msg_type`.
    ///
    /// Fails with [`ConnectionError::HandlerAlreadyRegistered`] if the type
    /// already has one.
    pub fn on_handler(&self, msg_type: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.ensure_open()?;
        self.inner.dispatcher.handlers().register(msg_type, handler)?;
        debug!(msg_type, "handler registered");
        Ok(())
    }

    /// Register an async handler taking and returning serde types.
    ///
    /// A payload that does not deserialize into `Req` is answered with an
    /// `invalid_payload` error without calling `f`.
    pub fn on<Req, Resp, F, Fut>(&self, msg_type: &str, f: F) -> Result<()>
    where
        Req: DeserializeOwned + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Resp, HandlerError>> + Send + 'static,
    {
        self.on_handler(msg_type, Arc::new(TypedHandler::new(f)))
    }

    /// Register a synchronous handler; it runs on the blocking pool.
    pub fn on_blocking<Req, Resp, F>(&self, msg_type: &str, f: F) -> Result<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> std::result::Result<Resp, HandlerError> + Send + Sync + 'static,
    {
        self.on_handler(msg_type, Arc::new(BlockingHandler::new(f)))
    }

    /// Add a listener for notifications of `msg_type`.
    ///
    /// Listeners run on the read loop in registration order and must not block.
    pub fn on_notification<F>(&self, msg_type: &str, f: F) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.inner.dispatcher.listeners().add(msg_type, Arc::new(f));
        debug!(msg_type, "notification listener added");
        Ok(())
    }

    /// Send a notification. Frames leave in the order they were sent.
    pub async fn send<T>(&self, msg_type: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let frame = self
            .inner
            .notification(msg_type, serde_json::to_value(payload)?)?;
        self.inner.push(frame).await
    }

    /// Send a request and wait for its reply.
    pub async fn send_request(&self, msg_type: &str, payload: Value) -> Result<Value> {
        let envelope = self.inner.factory.new_request(msg_type, payload);
        let frame = self.inner.encode(&envelope)?;
        let Some(correlation_id) = envelope.correlation_id else {
            return Err(MessageError::MissingField("correlationId").into());
        };

        let pending = self.inner.dispatcher.pending();
        let reply = pending.insert(correlation_id.clone(), msg_type)?;
        if let Err(err) = self.inner.push(frame).await {
            pending.remove(&correlation_id);
            return Err(err);
        }
        debug!(msg_type, %correlation_id, "request sent");

        let outcome = match self.inner.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    pending.remove(&correlation_id);
                    warn!(msg_type, %correlation_id, ?limit, "request timed out");
                    return Err(ConnectionError::Timeout(limit));
                }
            },
            None => reply.await,
        };
        outcome.unwrap_or(Err(ConnectionError::Closed))
    }

    /// Typed [`send_request`](Self::send_request).
    pub async fn request<Req, Resp>(&self, msg_type: &str, payload: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let value = self
            .send_request(msg_type, serde_json::to_value(payload)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Handle for sending notifications from services and handlers.
    pub fn notifier(&self) -> Notifier {
        Notifier {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Run the connection over `reader`/`writer` until it closes.
    ///
    /// Returns [`CloseReason::EndOfStream`] when the peer hangs up (after
    /// in-flight handlers had `drain_timeout` to finish),
    /// [`CloseReason::Shutdown`] after [`close`](Self::close), or the I/O
    /// error that broke the stream.
    pub async fn listen<R, W>(&self, reader: R, writer: W) -> Result<CloseReason>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound = self.start_listening()?;
        let max = self.inner.config.max_line_length;

        let writer_task = tokio::spawn(write_loop(
            Arc::clone(&self.inner),
            FramedWrite::new(writer, LineCodec::new(max)),
            outbound,
        ));

        let read_error = match self
            .read_loop(FramedRead::new(reader, LineCodec::new(max)))
            .await
        {
            Ok(ReadOutcome::EndOfStream) => {
                self.drain_handlers().await;
                self.inner.begin_close(CloseReason::EndOfStream);
                None
            }
            Ok(ReadOutcome::Cancelled) => None,
            Err(err) => {
                warn!(error = %err, "inbound stream failed");
                self.inner
                    .begin_close(CloseReason::Failed(err.to_string()));
                Some(err)
            }
        };

        let write_result = match writer_task.await {
            Ok(result) => result,
            Err(join_err) => Err(ConnectionError::Io(std::io::Error::other(format!(
                "writer task failed: {join_err}"
            )))),
        };
        self.inner.finished.send_replace(true);

        if let Some(err) = read_error {
            return Err(err);
        }
        write_result?;
        Ok(self.inner.close_reason().unwrap_or(CloseReason::Shutdown))
    }

    /// [`listen`](Self::listen) on the process's stdin and stdout.
    pub async fn listen_stdio(&self) -> Result<CloseReason> {
        self.listen(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Close the connection.
    ///
    /// Pending calls fail with [`ConnectionError::Closed`], in-flight handlers
    /// are abandoned, frames already queued are written and the writer is shut
    /// down. Returns once `listen` has finished.
    pub async fn close(&self) {
        let was_listening = self.state() == ConnectionState::Listening;
        self.inner.begin_close(CloseReason::Shutdown);
        if was_listening {
            let mut finished = self.inner.finished.subscribe();
            let _ = finished.wait_for(|done| *done).await;
        }
    }

    /// Resolves when the connection has closed.
    pub async fn closed(&self) -> CloseReason {
        let mut reason = self.inner.close_reason.subscribe();
        let closed = match reason.wait_for(Option::is_some).await {
            Ok(current) => (*current).clone().unwrap_or(CloseReason::Shutdown),
            Err(_) => CloseReason::Shutdown,
        };
        closed
    }

    fn start_listening(&self) -> Result<mpsc::Receiver<Frame>> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut slot = self
            .inner
            .outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slot.is_none() || *state == ConnectionState::Listening {
            return Err(ConnectionError::AlreadyListening);
        }
        if *state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        let outbound = slot.take().ok_or(ConnectionError::AlreadyListening)?;
        *state = ConnectionState::Listening;
        info!("connection listening");
        Ok(outbound)
    }

    async fn read_loop<R>(&self, mut frames: FramedRead<R, LineCodec>) -> Result<ReadOutcome>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let event = tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => return Ok(ReadOutcome::Cancelled),
                event = frames.next() => event,
            };
            match event {
                Some(Ok(LineEvent::Frame(frame))) => self.handle_frame(frame),
                Some(Ok(LineEvent::Malformed(err))) => {
                    warn!(error = %err, "dropping malformed frame");
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    debug!("inbound stream ended");
                    return Ok(ReadOutcome::EndOfStream);
                }
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        let envelope = match cgilink_message::decode(frame.as_str()) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, line = %preview(frame.as_str()), "dropping undecodable frame");
                return;
            }
        };
        trace!(
            msg_type = %envelope.msg_type,
            correlation_id = ?envelope.correlation_id,
            kind = %envelope.kind,
            "frame received"
        );

        if let Dispatch::Reply(reply) = self.inner.dispatcher.route(envelope) {
            let inner = Arc::clone(&self.inner);
            self.inner.tasks.spawn(async move {
                tokio::select! {
                    reply = reply => inner.deliver(reply).await,
                    () = inner.shutdown.cancelled() => debug!("abandoning in-flight handler"),
                }
            });
        }
    }

    async fn drain_handlers(&self) {
        let tasks = &self.inner.tasks;
        tasks.close();
        if tasks.is_empty() {
            return;
        }
        debug!(in_flight = tasks.len(), "waiting for in-flight handlers");
        tokio::select! {
            () = tasks.wait() => {}
            () = tokio::time::sleep(self.inner.config.drain_timeout) => {
                warn!(in_flight = tasks.len(), "drain timeout elapsed, abandoning handlers");
            }
            () = self.inner.shutdown.cancelled() => {}
        }
    }
}

/// Cloneable notification sender.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("state", &self.inner.state())
            .finish()
    }
}

impl Notifier {
    pub async fn notify<T>(&self, msg_type: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let frame = self
            .inner
            .notification(msg_type, serde_json::to_value(payload)?)?;
        self.inner.push(frame).await
    }

    /// Send without awaiting, from synchronous code such as a blocking
    /// handler or a log sink. Safe to call from any thread, including async
    /// tasks.
    pub fn blocking_notify<T>(&self, msg_type: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let frame = self
            .inner
            .notification(msg_type, serde_json::to_value(payload)?)?;
        self.inner.blocking_push(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state() == ConnectionState::Closed
    }
}

async fn write_loop<W>(
    inner: Arc<Inner>,
    mut sink: FramedWrite<W, LineCodec>,
    mut outbound: mpsc::Receiver<Frame>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let flush_timeout = inner.config.flush_timeout;
    let flush_deadline = async {
        inner.shutdown.cancelled().await;
        tokio::time::sleep(flush_timeout).await;
    };

    let result = tokio::select! {
        result = pump(&inner, &mut sink, &mut outbound) => result,
        () = flush_deadline => {
            warn!(?flush_timeout, "peer stopped reading, dropping unflushed frames");
            Ok(())
        }
    };
    if let Err(err) = &result {
        warn!(error = %err, "outbound stream failed");
        inner.begin_close(CloseReason::Failed(err.to_string()));
    }
    result
}

async fn pump<W>(
    inner: &Inner,
    sink: &mut FramedWrite<W, LineCodec>,
    outbound: &mut mpsc::Receiver<Frame>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            () = inner.shutdown.cancelled() => break,
        };
        match frame {
            Some(frame) => write_frame(sink, frame).await?,
            None => break,
        }
    }

    // Frames queued before the close still go out.
    outbound.close();
    while let Some(frame) = outbound.recv().await {
        write_frame(sink, frame).await?;
    }
    sink.close().await?;
    debug!("writer shut down");
    Ok(())
}

async fn write_frame<W>(sink: &mut FramedWrite<W, LineCodec>, frame: Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match sink.send(frame).await {
        Ok(()) => Ok(()),
        Err(FrameError::Io(err)) => Err(ConnectionError::Io(err)),
        Err(err) => {
            warn!(error = %err, "dropping unwritable frame");
            Ok(())
        }
    }
}

fn preview(line: &str) -> String {
    const LIMIT: usize = 80;
    if line.len() <= LIMIT {
        return line.to_string();
    }
    let mut cut = LIMIT;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &line[..cut])
}
