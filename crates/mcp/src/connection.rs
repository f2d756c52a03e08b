use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::Error;
use crate::protocol::{
    Incoming, JSONRPC_VERSION, Notification, Request, RequestId, Response,
};

/// How long a protocol request may wait for its response. Tool calls set
/// their own limit.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// `None` once the server side is gone; pending senders are dropped then,
// which wakes their requests with `Error::Closed`.
type Pending = Option<HashMap<u64, oneshot::Sender<Response>>>;

/// A JSON-RPC connection over a pair of byte streams, one message per
/// line.
///
/// A reader task routes responses to the requests waiting for them and
/// answers server-initiated requests with "method not found". A writer
/// task serializes all outgoing lines.
pub struct Connection {
    name: String,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(Some(HashMap::new())));

        let writer_task =
            tokio::spawn(write_loop(name.clone(), writer, outgoing_rx));
        let reader_task = tokio::spawn(read_loop(
            name.clone(),
            reader,
            Arc::clone(&pending),
            outgoing_tx.downgrade(),
        ));

        Self {
            name,
            outgoing: Mutex::new(Some(outgoing_tx)),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: REQUEST_TIMEOUT,
            reader_task,
            writer_task: Mutex::new(Some(writer_task)),
        }
    }

    #[cfg(test)]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the server stopped answering for good.
    pub fn is_closed(&self) -> bool {
        lock(&self.pending).is_none()
    }

    /// Sends a request and waits for its result, at most
    /// [`REQUEST_TIMEOUT`].
    #[inline]
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, Error> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Sends a request and waits at most `limit` for its result.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        limit: Duration,
    ) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending)
            .as_mut()
            .ok_or(Error::Closed)?
            .insert(id, tx);

        let line = serde_json::to_string(&Request {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        })?;
        trace!("[{}] -> {line}", self.name);
        if let Err(err) = self.send_line(line) {
            self.forget(id);
            return Err(err);
        }

        let response = match timeout(limit, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::Closed),
            Err(_) => {
                self.forget(id);
                return Err(Error::Timeout(method.to_owned()));
            }
        };

        if let Some(error) = response.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or_else(|| Error::InvalidResponse {
            method: method.to_owned(),
            reason: "neither result nor error".to_owned(),
        })
    }

    /// Sends a notification, which has no response.
    pub fn notify(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), Error> {
        let line = serde_json::to_string(&Notification {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        })?;
        trace!("[{}] -> {line}", self.name);
        self.send_line(line)
    }

    /// Stops sending. The writer flushes what is queued and then shuts
    /// its stream down, which tells a stdio server to exit.
    pub async fn close(&self) {
        lock(&self.outgoing).take();
        let writer_task = lock(&self.writer_task).take();
        if let Some(writer_task) = writer_task {
            writer_task.await.ok();
        }
    }

    fn send_line(&self, line: String) -> Result<(), Error> {
        let outgoing = lock(&self.outgoing);
        let sender = outgoing.as_ref().ok_or(Error::Closed)?;
        sender.send(line).map_err(|_| Error::Closed)
    }

    fn forget(&self, id: u64) {
        if let Some(pending) = lock(&self.pending).as_mut() {
            pending.remove(&id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

async fn write_loop<W>(
    name: String,
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = outgoing.recv().await {
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(err) = written.await {
            warn!("[{name}] failed to write: {err}");
            return;
        }
    }
    writer.shutdown().await.ok();
    debug!("[{name}] writer closed");
}

async fn read_loop<R>(
    name: String,
    reader: R,
    pending: Arc<Mutex<Pending>>,
    outgoing: mpsc::WeakUnboundedSender<String>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("[{name}] failed to read: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        trace!("[{name}] <- {line}");

        match Incoming::parse(&line) {
            Ok(Incoming::Response(response)) => {
                let RequestId::Number(id) = response.id else {
                    warn!(
                        "[{name}] response with a foreign id: {:?}",
                        response.id
                    );
                    continue;
                };
                let waiter =
                    lock(&pending).as_mut().and_then(|p| p.remove(&id));
                match waiter {
                    Some(waiter) => {
                        waiter.send(response).ok();
                    }
                    None => warn!("[{name}] response to unknown request {id}"),
                }
            }
            Ok(Incoming::Request { id, method }) => {
                debug!("[{name}] declining server request `{method}`");
                let response = Response::method_not_found(id, &method);
                let (Ok(line), Some(outgoing)) =
                    (serde_json::to_string(&response), outgoing.upgrade())
                else {
                    continue;
                };
                outgoing.send(line).ok();
            }
            Ok(Incoming::Notification { method }) => {
                debug!("[{name}] notification `{method}`");
            }
            Err(err) => warn!("[{name}] ignoring malformed message: {err}"),
        }
    }

    debug!("[{name}] connection closed by server");
    lock(&pending).take();
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};

    use super::*;

    /// The server end of an in-memory connection.
    pub(crate) struct FakeServer {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        pub(crate) async fn recv(&mut self) -> Option<Value> {
            let line = self.lines.next_line().await.unwrap()?;
            Some(serde_json::from_str(&line).unwrap())
        }

        pub(crate) async fn send(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        /// Answers the next request with `result`, returning the request.
        pub(crate) async fn reply(&mut self, result: Value) -> Value {
            let request = self.recv().await.unwrap();
            self.send(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": result
            }))
            .await;
            request
        }
    }

    pub(crate) fn pair() -> (Connection, FakeServer) {
        let (client_end, server_end) = duplex(64 * 1024);
        let (client_read, client_write) = split(client_end);
        let (server_read, server_write) = split(server_end);
        let connection = Connection::new("fake", client_read, client_write);
        let server = FakeServer {
            lines: BufReader::new(server_read).lines(),
            writer: server_write,
        };
        (connection, server)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (connection, mut server) = pair();
        let server_task = tokio::spawn(async move {
            let request = server.reply(json!({ "ok": true })).await;
            (request, server)
        });

        let result = connection.request("ping", None).await.unwrap();
        assert_eq!(result, json!({ "ok": true }));

        let (request, _server) = server_task.await.unwrap();
        assert_eq!(
            request,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })
        );
    }

    #[tokio::test]
    async fn test_rpc_error() {
        let (connection, mut server) = pair();
        tokio::spawn(async move {
            let request = server.recv().await.unwrap();
            server
                .send(json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": { "code": -32602, "message": "bad params" }
                }))
                .await;
            server
        });

        let err = connection.request("tools/call", None).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_server_requests_are_declined() {
        let (connection, mut server) = pair();
        server
            .send(json!({
                "jsonrpc": "2.0",
                "id": "s1",
                "method": "sampling/createMessage"
            }))
            .await;
        let reply = server.recv().await.unwrap();
        assert_eq!(reply["id"], "s1");
        assert_eq!(reply["error"]["code"], -32601);
        drop(connection);
    }

    #[tokio::test]
    async fn test_closed_by_server() {
        let (connection, server) = pair();
        let request = connection.request("tools/list", None);
        drop(server);

        assert!(matches!(request.await, Err(Error::Closed)));
        assert!(connection.is_closed());
        assert!(matches!(
            connection.request("tools/list", None).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (connection, mut server) = pair();
        let connection =
            connection.with_request_timeout(Duration::from_secs(1));
        let err = connection.request("slow", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(ref method) if method == "slow"));
        // The server saw the request but never answered.
        assert!(server.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_close_ends_the_stream() {
        let (connection, mut server) = pair();
        connection.notify("notifications/initialized", None).unwrap();
        connection.close().await;

        let notification = server.recv().await.unwrap();
        assert_eq!(notification["method"], "notifications/initialized");
        assert!(notification.get("id").is_none());
        assert!(server.recv().await.is_none());
        assert!(matches!(connection.notify("x", None), Err(Error::Closed)));
    }
}
