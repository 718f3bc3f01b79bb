//! Newline-delimited JSON transport over any byte stream.
//!
//! The host holds a [`StreamClient`]; the plugin runs [`serve`]. Both sides
//! allow many calls in flight at once: requests carry ids, the plugin
//! answers each in its own task, and the client routes replies back to the
//! waiting caller by id.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use super::frame::{
    decode_frame, encode_frame, recover_id, FrameCodec, Line, RpcRequest, RpcResponse,
    MAX_FRAME_BYTES,
};
use super::{Dispatch, RpcClient};
use crate::error::{CallError, CallResult, Result, TransportError};

type PendingCalls = DashMap<u64, oneshot::Sender<CallResult<Value>>>;
type Outgoing = (Bytes, oneshot::Sender<CallResult<()>>);

const OUTGOING_QUEUE: usize = 64;

pub struct StreamClient {
    outgoing: mpsc::Sender<Outgoing>,
    pending: Arc<PendingCalls>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    timeout: Option<Duration>,
    reader_task: JoinHandle<()>,
}

impl StreamClient {
    /// Must be called inside a tokio runtime: it spawns the reply reader
    /// and the frame writer.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = Arc::new(PendingCalls::new());
        let closed = Arc::new(AtomicBool::new(false));
        let lines = FramedRead::new(reader, FrameCodec::new());
        let reader_task = tokio::spawn(route_replies(lines, pending.clone(), closed.clone()));

        let (outgoing, queue) = mpsc::channel(OUTGOING_QUEUE);
        tokio::spawn(write_frames(writer, queue));

        Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            timeout: None,
            reader_task,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Hands the frame to the writer task. Once queued, the frame is written
    /// whole even if this future is dropped.
    async fn send(&self, frame: Bytes) -> CallResult<()> {
        let (ack, written) = oneshot::channel();
        self.outgoing
            .send((frame, ack))
            .await
            .map_err(|_| TransportError::SendFailed("writer stopped".into()))?;
        written
            .await
            .map_err(|_| TransportError::SendFailed("writer stopped".into()))?
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Removes a call from the pending map however the call ends.
struct PendingEntry<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[async_trait]
impl RpcClient for StreamClient {
    async fn call(&self, mut request: RpcRequest) -> CallResult<Value> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request.id = id;
        let frame = encode_frame(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _entry = PendingEntry {
            pending: &self.pending,
            id,
        };
        // The reader may have shut down between the first check and the insert.
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }

        debug!(id, kind = %request.kind, method = %request.method, "Sending plugin call");
        self.send(frame).await?;

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    warn!(id, timeout_ms, "Plugin call timed out");
                    return Err(TransportError::Timeout(timeout_ms).into());
                }
            },
            None => rx.await,
        };

        reply.map_err(|_| CallError::from(TransportError::Closed))?
    }
}

/// Owns the write half. Frames are written one at a time and never
/// interleaved. Stops at the first write error or when the client is gone.
async fn write_frames<W>(mut writer: W, mut queue: mpsc::Receiver<Outgoing>)
where
    W: AsyncWrite + Unpin,
{
    while let Some((frame, ack)) = queue.recv().await {
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            Err(e) => {
                error!(error = %e, "Failed to write plugin call");
                let _ = ack.send(Err(TransportError::SendFailed(e.to_string()).into()));
                break;
            }
        }
    }
    debug!("Plugin call writer stopped");
}

async fn route_replies<R>(
    mut lines: FramedRead<R, FrameCodec>,
    pending: Arc<PendingCalls>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(Line::Frame(line)) => line,
            Ok(Line::Oversized) => {
                warn!(limit = MAX_FRAME_BYTES, "Skipping oversized reply frame");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Plugin reply stream failed");
                break;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match decode_frame::<RpcResponse>(&line) {
            Ok(response) => match pending.remove(&response.id) {
                Some((_, tx)) => {
                    let _ = tx.send(response.into_result());
                }
                None => warn!(id = response.id, "Dropping reply for unknown or expired call"),
            },
            Err(e) => match recover_id(&line) {
                Some(id) => {
                    if let Some((_, tx)) = pending.remove(&id) {
                        let _ = tx.send(Err(e));
                    }
                }
                None => warn!(error = %e, "Discarding unreadable reply frame"),
            },
        }
    }

    closed.store(true, Ordering::SeqCst);
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(TransportError::Closed.into()));
        }
    }
    debug!("Plugin reply stream closed");
}

/// Answers requests read from `reader` until it reaches end of stream.
///
/// Each request runs in its own task; replies are written whole, one per
/// line, in completion order. Unreadable and oversized lines are skipped.
/// Returns once every in-flight request has been answered.
pub async fn serve<R, W>(reader: R, writer: W, dispatch: Arc<dyn Dispatch>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let writer = Arc::new(Mutex::new(writer));
    let mut lines = FramedRead::new(reader, FrameCodec::new());
    let mut tasks = JoinSet::new();
    let mut outcome = Ok(());

    info!(kind = %dispatch.kind(), "Serving plugin");

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(Line::Frame(line)) => line,
            Ok(Line::Oversized) => {
                warn!(limit = MAX_FRAME_BYTES, "Skipping oversized request frame");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Request stream failed");
                outcome = Err(e.into());
                break;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        while let Some(joined) = tasks.try_join_next() {
            log_task_failure(joined);
        }

        let dispatch = dispatch.clone();
        let writer = writer.clone();
        tasks.spawn(async move {
            if let Some(response) = answer(dispatch.as_ref(), &line).await {
                write_reply(&writer, response).await;
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        log_task_failure(joined);
    }
    debug!("Request stream closed");
    outcome
}

/// Serves on the process's own stdin and stdout. Logging must go to stderr.
pub async fn serve_stdio(dispatch: Arc<dyn Dispatch>) -> Result<()> {
    serve(tokio::io::stdin(), tokio::io::stdout(), dispatch).await
}

fn log_task_failure(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Request task failed");
    }
}

async fn answer(dispatch: &dyn Dispatch, line: &[u8]) -> Option<RpcResponse> {
    match decode_frame::<RpcRequest>(line) {
        Ok(request) => {
            let id = request.id;
            let result = match AssertUnwindSafe(dispatch.dispatch(request))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let reason = panic_message(&*panic);
                    error!(id, panic = %reason, "Plugin implementation panicked");
                    Err(TransportError::ReceiveFailed(format!("plugin panicked: {reason}")).into())
                }
            };
            Some(RpcResponse::from_result(id, result))
        }
        Err(err) => match recover_id(line) {
            Some(id) => {
                warn!(id, error = %err, "Rejecting malformed request frame");
                Some(RpcResponse::from_result(id, Err(err)))
            }
            None => {
                warn!(error = %err, "Discarding unreadable request frame");
                None
            }
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn write_reply<W>(writer: &Mutex<W>, response: RpcResponse)
where
    W: AsyncWrite + Unpin,
{
    let id = response.id;
    let frame = match encode_frame(&response) {
        Ok(frame) => frame,
        Err(err) => match encode_frame(&RpcResponse::from_result(id, Err(err))) {
            Ok(frame) => frame,
            Err(e) => {
                error!(id, error = %e, "Failed to encode reply");
                return;
            }
        },
    };

    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_all(&frame).await {
        error!(id, error = %e, "Failed to write reply");
        return;
    }
    if let Err(e) = writer.flush().await {
        error!(id, error = %e, "Failed to flush reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Kind, Method};
    use crate::error::ApplicationError;
    use serde_json::json;
    use tokio::io::{duplex, split, AsyncBufReadExt, BufReader};

    struct Echo;

    #[async_trait]
    impl Dispatch for Echo {
        fn kind(&self) -> Kind {
            Kind::Transformation
        }

        async fn dispatch(&self, request: RpcRequest) -> CallResult<Value> {
            if request.params["fail"] == json!(true) {
                return Err(ApplicationError::new("asked to fail").into());
            }
            if let Some(ms) = request.params["sleep_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(request.params)
        }
    }

    fn connect() -> StreamClient {
        connect_with_buffer(64 * 1024)
    }

    fn connect_with_buffer(size: usize) -> StreamClient {
        let (host, plugin) = duplex(size);
        let (plugin_read, plugin_write) = split(plugin);
        tokio::spawn(serve(plugin_read, plugin_write, Arc::new(Echo)));
        let (host_read, host_write) = split(host);
        StreamClient::new(host_read, host_write)
    }

    fn request(params: Value) -> RpcRequest {
        RpcRequest::new(Kind::Transformation, Method::Execute, params)
    }

    #[tokio::test]
    async fn round_trip_and_errors() {
        let client = connect();

        let reply = client.call(request(json!({ "n": 1 }))).await.unwrap();
        assert_eq!(reply, json!({ "n": 1 }));

        let err = client.call(request(json!({ "fail": true }))).await.unwrap_err();
        assert_eq!(err, ApplicationError::new("asked to fail").into());
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn replies_are_routed_by_id() {
        let client = Arc::new(connect());

        // The slow call is answered last but must still get its own reply.
        let slow = {
            let client = client.clone();
            tokio::spawn(async move { client.call(request(json!({ "sleep_ms": 50, "n": 0 }))).await })
        };
        let fast = client.call(request(json!({ "n": 1 }))).await.unwrap();
        assert_eq!(fast["n"], 1);
        assert_eq!(slow.await.unwrap().unwrap()["n"], 0);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_transport_error() {
        let client = connect().with_timeout(Duration::from_millis(20));
        let err = client
            .call(request(json!({ "sleep_ms": 500 })))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(20).into());
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn peer_going_away_fails_pending_calls() {
        let (host, plugin) = duplex(1024);
        let (host_read, host_write) = split(host);
        let client = StreamClient::new(host_read, host_write);

        let (plugin_read, _plugin_write) = split(plugin);
        let mut incoming = BufReader::new(plugin_read);
        let call = tokio::spawn(async move { client.call(request(json!({}))).await });

        // Read the request, then drop the plugin end without answering.
        let mut line = String::new();
        incoming.read_line(&mut line).await.unwrap();
        assert!(line.contains("Plugin.Execute"));
        drop(incoming);
        drop(_plugin_write);

        assert_eq!(call.await.unwrap().unwrap_err(), TransportError::Closed.into());
    }

    #[tokio::test]
    async fn malformed_request_gets_codec_error() {
        let (host, plugin) = duplex(1024);
        let (plugin_read, plugin_write) = split(plugin);
        tokio::spawn(serve(plugin_read, plugin_write, Arc::new(Echo)));

        let (host_read, mut host_write) = split(host);
        host_write.write_all(b"{\"id\":7,\"kind\":1}\n").await.unwrap();

        let mut replies = BufReader::new(host_read);
        let mut line = String::new();
        replies.read_line(&mut line).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, 7);
        assert!(matches!(
            response.error,
            Some(CallError::Transport(TransportError::Codec(_)))
        ));
    }

    #[tokio::test]
    async fn cancelled_call_does_not_corrupt_the_next_one() {
        // A tiny pipe forces the large frame to be written in many chunks.
        let client = connect_with_buffer(16);
        let big = json!({ "blob": "x".repeat(10 * 1024) });

        let cancelled = tokio::time::timeout(Duration::ZERO, client.call(request(big))).await;
        assert!(cancelled.is_err());

        let reply = tokio::time::timeout(
            Duration::from_secs(5),
            client.call(request(json!({ "n": 2 }))),
        )
        .await
        .expect("second call hung")
        .unwrap();
        assert_eq!(reply, json!({ "n": 2 }));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn server_survives_frames_that_are_not_utf8() {
        let (host, plugin) = duplex(1024);
        let (plugin_read, plugin_write) = split(plugin);
        let server = tokio::spawn(serve(plugin_read, plugin_write, Arc::new(Echo)));

        let (host_read, mut host_write) = split(host);
        host_write.write_all(b"\xff\xfe garbage\n").await.unwrap();
        let valid = encode_frame(&RpcRequest {
            id: 5,
            ..request(json!({ "n": 5 }))
        })
        .unwrap();
        host_write.write_all(&valid).await.unwrap();

        let mut replies = BufReader::new(host_read);
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), replies.read_line(&mut line))
            .await
            .expect("no reply after the bad frame")
            .unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response.id, 5);
        assert_eq!(response.result, Some(json!({ "n": 5 })));
        assert!(!server.is_finished());
    }

    struct Explodes;

    #[async_trait]
    impl Dispatch for Explodes {
        fn kind(&self) -> Kind {
            Kind::Transformation
        }

        async fn dispatch(&self, _request: RpcRequest) -> CallResult<Value> {
            panic!("dispatch exploded");
        }
    }

    #[tokio::test]
    async fn panicking_dispatch_is_answered_with_transport_error() {
        let (host, plugin) = duplex(1024);
        let (plugin_read, plugin_write) = split(plugin);
        tokio::spawn(serve(plugin_read, plugin_write, Arc::new(Explodes)));
        let (host_read, host_write) = split(host);
        let client = StreamClient::new(host_read, host_write);

        let err = client.call(request(json!({}))).await.unwrap_err();
        assert!(
            matches!(
                &err,
                CallError::Transport(TransportError::ReceiveFailed(reason))
                    if reason.contains("dispatch exploded")
            ),
            "unexpected error: {err:?}"
        );

        // The server keeps serving after the panic.
        assert!(client.call(request(json!({}))).await.unwrap_err().is_transport());
    }
}
