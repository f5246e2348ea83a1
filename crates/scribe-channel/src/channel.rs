//! Single agent connection with reconnect-with-delay.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::stream::SplitStream;
use futures_util::SinkExt;
use futures_util::StreamExt;
use scribe_core::ConnectionState;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::error::ChannelError;
use crate::error::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;
type TaskSlot = StdMutex<Option<JoinHandle<()>>>;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// One received text frame. `seq` counts frames over the channel lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u64,
    pub text: String,
}

/// Handle to the agent connection. Clones share the same connection.
///
/// Only the most recent frame is retained; a consumer that falls behind sees
/// the latest frame, not a backlog.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    config: ChannelConfig,
    status: watch::Sender<ConnectionState>,
    frames: watch::Sender<Option<Frame>>,
    writer: Mutex<Option<WsWriter>>,
    connecting: Mutex<()>,
    recv_task: TaskSlot,
    reconnect_task: TaskSlot,
    closing: AtomicBool,
    next_seq: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

impl Channel {
    pub fn new(url: &str, config: ChannelConfig) -> Result<Self> {
        let parsed_url = Url::parse(url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ChannelError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let (frames, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                url: parsed_url,
                config,
                status,
                frames,
                writer: Mutex::new(None),
                connecting: Mutex::new(()),
                recv_task: StdMutex::new(None),
                reconnect_task: StdMutex::new(None),
                closing: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
                reconnects_scheduled: AtomicU64::new(0),
            }),
        })
    }

    pub fn url(&self) -> &str {
        self.inner.url.as_str()
    }

    pub fn status(&self) -> ConnectionState {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }

    pub fn last_message(&self) -> Option<Frame> {
        self.inner.frames.borrow().clone()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Option<Frame>> {
        self.inner.frames.subscribe()
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.inner.reconnects_scheduled.load(Ordering::SeqCst)
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .reconnect_slot()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Opens the connection unless one is already open.
    ///
    /// A failed attempt is treated like an unexpected close: the channel stays
    /// disconnected and one reconnect is scheduled.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.inner.connecting.lock().await;
        if self.status() == ConnectionState::Connected {
            return Ok(());
        }
        self.inner.closing.store(false, Ordering::SeqCst);
        self.inner.cancel_reconnect();

        match self.inner.open().await {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!("connect to {} failed: {}", self.inner.url, error);
                self.inner.schedule_reconnect();
                Err(error)
            }
        }
    }

    /// Serializes and sends `message`. Returns `Ok(false)` when the message
    /// was dropped because the channel is not connected.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<bool> {
        let text = serde_json::to_string(message)?;
        self.send_text(text).await
    }

    pub async fn send_text(&self, text: String) -> Result<bool> {
        if self.status() != ConnectionState::Connected {
            warn!("dropping outgoing message to {}: not connected", self.inner.url);
            return Ok(false);
        }

        let mut writer_guard = self.inner.writer.lock().await;
        let Some(writer) = writer_guard.as_mut() else {
            warn!("dropping outgoing message to {}: no writer", self.inner.url);
            return Ok(false);
        };
        let len = text.len();
        writer
            .send(Message::Text(text))
            .await
            .map_err(|error| ChannelError::WebSocket(error.to_string()))?;
        debug!("sent {} bytes to {}", len, self.inner.url);
        Ok(true)
    }

    /// Deliberate teardown. Cancels any pending reconnect.
    pub async fn close(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.cancel_reconnect();

        let _connecting = self.inner.connecting.lock().await;
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(error) = writer.send(Message::Close(None)).await {
                debug!("close frame to {} not sent: {}", self.inner.url, error);
            }
        }
        if let Some(task) = self.inner.recv_slot().take() {
            task.abort();
        }
        self.inner.cancel_reconnect();
        self.inner.set_status(ConnectionState::Disconnected);
        info!("closed channel to {}", self.inner.url);
    }
}

impl Inner {
    fn recv_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.recv_task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconnect_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reconnect_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, next: ConnectionState) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!("channel to {} is {}", self.url, next.label());
        }
    }

    async fn open(self: &Arc<Self>) -> Result<()> {
        self.set_status(ConnectionState::Connecting);

        let attempt = timeout(self.config.connect_timeout, connect_async(self.url.as_str())).await;
        let stream = match attempt {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(error)) => {
                self.set_status(ConnectionState::Disconnected);
                return Err(ChannelError::WebSocket(error.to_string()));
            }
            Err(_) => {
                self.set_status(ConnectionState::Disconnected);
                return Err(ChannelError::Timeout(format!(
                    "connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        self.set_status(ConnectionState::Connected);
        info!("connected to {}", self.url);

        let task = tokio::spawn(read_loop(Arc::downgrade(self), reader));
        if let Some(previous) = self.recv_slot().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn publish(&self, text: String) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("frame #{} from {} ({} bytes)", seq, self.url, text.len());
        self.frames.send_replace(Some(Frame { seq, text }));
    }

    async fn connection_lost(self: &Arc<Self>) {
        self.writer.lock().await.take();
        if !self.closing.load(Ordering::SeqCst) {
            warn!("connection to {} lost", self.url);
            self.schedule_reconnect();
        }
        self.set_status(ConnectionState::Disconnected);
    }

    /// Arms the single reconnect timer, replacing any earlier one.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }

        let delay = self.config.reconnect_delay;
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect().await;
            }
        });
        if let Some(previous) = self.reconnect_slot().replace(task) {
            previous.abort();
        }
        let scheduled = self.reconnects_scheduled.fetch_add(1, Ordering::SeqCst) + 1;
        info!("reconnect #{} to {} in {:?}", scheduled, self.url, delay);

        // close() may have raced with this schedule.
        if self.closing.load(Ordering::SeqCst) {
            self.cancel_reconnect();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect_slot().take() {
            task.abort();
        }
    }

    async fn reconnect(self: &Arc<Self>) {
        let _connecting = self.connecting.lock().await;
        // The timer has fired; release the slot so a failure can arm the next one.
        drop(self.reconnect_slot().take());
        if self.closing.load(Ordering::SeqCst) || self.writer.lock().await.is_some() {
            return;
        }

        match self.open().await {
            Ok(()) => info!("reconnected to {}", self.url),
            Err(error) => {
                warn!("reconnect to {} failed: {}", self.url, error);
                self.schedule_reconnect();
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in [&mut self.recv_task, &mut self.reconnect_task] {
            if let Some(task) = slot.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }
}

async fn read_loop(inner: Weak<Inner>, mut reader: WsReader) {
    while let Some(frame) = reader.next().await {
        let Some(channel) = inner.upgrade() else {
            return;
        };
        match frame {
            Ok(Message::Text(text)) => channel.publish(text.to_string()),
            Ok(Message::Ping(payload)) => {
                debug!("received ping from {} ({} bytes)", channel.url, payload.len());
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                warn!("websocket read error on {}: {}", channel.url, error);
                break;
            }
        }
    }

    if let Some(channel) = inner.upgrade() {
        channel.connection_lost().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    fn config(reconnect_delay: Duration) -> ChannelConfig {
        ChannelConfig {
            reconnect_delay,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Echo server; connections listed in `drop_first` are closed right
    /// after the handshake (1-based accept order).
    async fn server(drop_first: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("listener has address");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let number = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    if number <= drop_first {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        return;
                    }
                    while let Some(Ok(message)) = ws.next().await {
                        if message.is_text() && ws.send(message).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (format!("ws://{addr}"), accepted)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition should hold in time");
    }

    async fn wait_for_status(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        timeout(Duration::from_secs(5), async {
            loop {
                if *rx.borrow_and_update() == want {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .expect("status should change in time");
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let result = Channel::new("http://localhost:8000/ws", ChannelConfig::default());
        assert!(matches!(result, Err(ChannelError::InvalidUrl(_))));

        let result = Channel::new("not a url", ChannelConfig::default());
        assert!(matches!(result, Err(ChannelError::UrlParse(_))));
    }

    #[tokio::test]
    async fn send_while_disconnected_is_dropped() {
        let channel = Channel::new("ws://127.0.0.1:9/ws", ChannelConfig::default())
            .expect("url is valid");

        let sent = channel
            .send(&json!({"action": "list_files"}))
            .await
            .expect("dropping is not an error");

        assert!(!sent);
        assert_eq!(channel.status(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (url, accepted) = server(0).await;
        let channel = Channel::new(&url, config(Duration::from_secs(60))).expect("url is valid");

        channel.connect().await.expect("first connect");
        channel.connect().await.expect("second connect is a no-op");

        assert_eq!(channel.status(), ConnectionState::Connected);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        channel.close().await;
    }

    #[tokio::test]
    async fn last_message_holds_latest_frame() {
        let (url, _) = server(0).await;
        let channel = Channel::new(&url, config(Duration::from_secs(60))).expect("url is valid");
        channel.connect().await.expect("connect");
        let mut frames = channel.watch_messages();

        for n in 1..=3 {
            let sent = channel.send(&json!({ "n": n })).await.expect("send");
            assert!(sent);
        }

        timeout(Duration::from_secs(5), async {
            loop {
                let seq = frames.borrow_and_update().as_ref().map(|frame| frame.seq);
                if seq == Some(3) {
                    return;
                }
                if frames.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .expect("three echoes should arrive");

        assert_eq!(
            channel.last_message(),
            Some(Frame {
                seq: 3,
                text: r#"{"n":3}"#.to_string(),
            })
        );
        channel.close().await;
    }

    #[tokio::test]
    async fn unexpected_close_schedules_one_reconnect() {
        let (url, _) = server(1).await;
        let channel = Channel::new(&url, config(Duration::from_secs(60))).expect("url is valid");
        let mut status = channel.watch_status();

        channel.connect().await.expect("connect");
        wait_for_status(&mut status, ConnectionState::Connected).await;
        wait_for_status(&mut status, ConnectionState::Disconnected).await;

        assert_eq!(channel.reconnects_scheduled(), 1);
        assert!(channel.has_pending_reconnect());

        channel.close().await;
        assert!(!channel.has_pending_reconnect());
        assert_eq!(channel.reconnects_scheduled(), 1);
    }

    #[tokio::test]
    async fn reconnects_after_delay() {
        let (url, accepted) = server(1).await;
        let channel =
            Channel::new(&url, config(Duration::from_millis(50))).expect("url is valid");

        channel.connect().await.expect("connect");
        eventually(|| {
            accepted.load(Ordering::SeqCst) == 2
                && channel.status() == ConnectionState::Connected
        })
        .await;

        assert_eq!(channel.reconnects_scheduled(), 1);
        assert!(!channel.has_pending_reconnect());

        let sent = channel.send(&json!({"ping": true})).await.expect("send");
        assert!(sent);
        channel.close().await;
    }

    #[tokio::test]
    async fn repeated_drops_never_stack_timers() {
        let (url, _) = server(usize::MAX).await;
        let channel =
            Channel::new(&url, config(Duration::from_millis(20))).expect("url is valid");

        channel.connect().await.expect("connect");
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(channel.reconnects_scheduled() >= 2);

        channel.close().await;
        let after_close = channel.reconnects_scheduled();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!channel.has_pending_reconnect());
        assert_eq!(channel.reconnects_scheduled(), after_close);
        assert_eq!(channel.status(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_connect_schedules_retry() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("listener has address");
        drop(listener);

        let channel = Channel::new(&format!("ws://{addr}"), config(Duration::from_secs(60)))
            .expect("url is valid");
        let result = channel.connect().await;

        assert!(matches!(result, Err(ChannelError::WebSocket(_))));
        assert_eq!(channel.status(), ConnectionState::Disconnected);
        assert!(channel.has_pending_reconnect());
        channel.close().await;
        assert!(!channel.has_pending_reconnect());
    }
}
