use crate::config::Config;
use crate::history::HistoryLoader;
use crate::live_feed::{FeedMessage, LiveFeed};
use crate::log_buffer::LogBuffer;
use crate::log_entry::{parse_line, LogRecord};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const FEED_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const FEED_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Changes pushed to the rendering layer
#[derive(Debug, Clone)]
pub enum ViewEvent {
    Record(LogRecord),
    HistoryLoaded(usize),
    Connection(bool),
    Cleared,
}

struct BufferState {
    buffer: LogBuffer,
    /// False once the viewer is torn down; no write lands after that.
    active: bool,
    last_message_at: Option<DateTime<Utc>>,
}

/// State shared by the history loader, the feed consumer and the renderer.
pub(crate) struct Shared {
    state: Mutex<BufferState>,
    connected: AtomicBool,
    /// Number of history loads in flight
    loading: AtomicUsize,
    events: broadcast::Sender<ViewEvent>,
}

impl Shared {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(BufferState {
                buffer: LogBuffer::new(capacity),
                active: true,
                last_message_at: None,
            }),
            connected: AtomicBool::new(false),
            loading: AtomicUsize::new(0),
            events,
        }
    }

    fn emit(&self, event: ViewEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Returns false when the viewer is already torn down.
    pub(crate) async fn prepend(&self, record: LogRecord) -> bool {
        let mut state = self.state.lock().await;
        if !state.active {
            return false;
        }
        state.buffer.prepend(record.clone());
        state.last_message_at = Some(Utc::now());
        drop(state);

        self.emit(ViewEvent::Record(record));
        true
    }

    pub(crate) async fn replace(&self, records: Vec<LogRecord>) -> bool {
        let count = records.len();
        let mut state = self.state.lock().await;
        if !state.active {
            return false;
        }
        state.buffer.replace(records);
        drop(state);

        self.emit(ViewEvent::HistoryLoaded(count));
        true
    }

    pub(crate) async fn clear(&self) {
        let mut state = self.state.lock().await;
        if !state.active {
            return;
        }
        state.buffer.clear();
        drop(state);

        self.emit(ViewEvent::Cleared);
    }

    pub(crate) async fn deactivate(&self) {
        let mut state = self.state.lock().await;
        state.active = false;
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            self.emit(ViewEvent::Connection(connected));
        }
    }

    pub(crate) async fn snapshot(&self) -> Vec<LogRecord> {
        self.state.lock().await.buffer.snapshot()
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }
}

/// Parses queued feed lines and applies them to the buffer. This is the
/// only writer for live records.
pub(crate) async fn consume_feed(mut feed_rx: mpsc::Receiver<FeedMessage>, shared: Arc<Shared>) {
    while let Some(message) = feed_rx.recv().await {
        match message {
            FeedMessage::Connected => {
                info!("Live log feed connected");
                shared.set_connected(true);
            }
            FeedMessage::Disconnected => {
                if shared.connected.load(Ordering::SeqCst) {
                    warn!("Live log feed disconnected");
                }
                shared.set_connected(false);
            }
            FeedMessage::Line(raw) => {
                if !shared.prepend(parse_line(&raw)).await {
                    debug!("Viewer closed, dropping live line");
                    break;
                }
            }
        }
    }
}

async fn load_history_into(loader: &HistoryLoader, shared: &Shared, limit: usize) -> Option<usize> {
    shared.loading.fetch_add(1, Ordering::SeqCst);

    let loaded = match loader.fetch(limit).await {
        Ok(records) => {
            let count = records.len();
            if shared.replace(records).await {
                Some(count)
            } else {
                debug!("Viewer closed before history arrived");
                None
            }
        }
        Err(crate::error::ViewerError::Unauthorized(status)) => {
            warn!("Log history rejected ({}); the token is missing or expired", status);
            None
        }
        Err(e) => {
            error!("Failed to load logs: {}", e);
            None
        }
    };

    shared.loading.fetch_sub(1, Ordering::SeqCst);
    loaded
}

/// A mounted log viewer: owns the display buffer, the live subscription and
/// every background task feeding it.
pub struct LogViewer {
    shared: Arc<Shared>,
    loader: HistoryLoader,
    history_limit: usize,
    shutdown_tx: watch::Sender<bool>,
    feed_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LogViewer {
    /// Starts the history load and the live subscription.
    ///
    /// With `history_first` the feed is only opened once the history load
    /// has finished, so a replace can never wipe out live records. Without
    /// it both start together and the later write wins.
    pub fn mount(config: &Config) -> Self {
        let shared = Arc::new(Shared::new(config.buffer_capacity));
        let loader = HistoryLoader::new(config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let feed = LiveFeed::new(config, feed_tx);

        let consumer = tokio::spawn(consume_feed(feed_rx, Arc::clone(&shared)));

        let feed_task = if config.history_first {
            let loader = loader.clone();
            let shared = Arc::clone(&shared);
            let limit = config.history_limit;
            tokio::spawn(async move {
                load_history_into(&loader, &shared, limit).await;
                feed.run(shutdown_rx).await;
            })
        } else {
            tokio::spawn(feed.run(shutdown_rx))
        };

        let mut tasks = vec![consumer];
        if !config.history_first {
            let loader = loader.clone();
            let shared = Arc::clone(&shared);
            let limit = config.history_limit;
            tasks.push(tokio::spawn(async move {
                load_history_into(&loader, &shared, limit).await;
            }));
        }

        info!("Log viewer mounted");

        Self {
            shared,
            loader,
            history_limit: config.history_limit,
            shutdown_tx,
            feed_task: Some(feed_task),
            tasks,
        }
    }

    /// Fetches the last `limit` lines and replaces the buffer with them.
    /// Failures leave the buffer untouched and only get logged.
    pub async fn load_history(&self, limit: usize) -> Option<usize> {
        load_history_into(&self.loader, &self.shared, limit).await
    }

    pub async fn reload_history(&self) -> Option<usize> {
        self.load_history(self.history_limit).await
    }

    /// Display reset only; nothing is deleted on the server.
    pub async fn clear(&self) {
        self.shared.clear().await;
    }

    pub async fn snapshot(&self) -> Vec<LogRecord> {
        self.shared.snapshot().await
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.buffer.len()
    }

    pub async fn capacity(&self) -> usize {
        self.shared.state.lock().await.buffer.capacity()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.shared.is_loading()
    }

    pub async fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.shared.state.lock().await.last_message_at
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.shared.events.subscribe()
    }

    /// Tears the viewer down. Once this returns no further write reaches the
    /// buffer and the live connection is closed.
    pub async fn unmount(mut self) {
        self.shared.deactivate().await;
        let _ = self.shutdown_tx.send(true);

        if let Some(mut feed_task) = self.feed_task.take() {
            if timeout(FEED_SHUTDOWN_GRACE, &mut feed_task).await.is_err() {
                warn!("Log stream did not close in time, aborting");
                feed_task.abort();
            }
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.set_connected(false);

        info!("Log viewer unmounted");
    }
}

impl Drop for LogViewer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut state) = self.shared.state.try_lock() {
            state.active = false;
        }
        if let Some(feed_task) = self.feed_task.take() {
            feed_task.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::history::tests::{serve_once, serve_once_after};
    use crate::live_feed::tests::{accept_stomp, message_frame, next_text};
    use crate::log_entry::LogLevel;
    use futures::SinkExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    const LINE: &str = "2024-01-01 10:00:00.123 INFO  c.x.Foo : Starting up";

    #[tokio::test]
    async fn test_consumer_prepends_and_tracks_connection() {
        let shared = Arc::new(Shared::new(500));
        let mut events = shared.events.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let consumer = tokio::spawn(consume_feed(rx, Arc::clone(&shared)));

        tx.send(FeedMessage::Connected).await.unwrap();
        tx.send(FeedMessage::Line(LINE.to_string())).await.unwrap();
        tx.send(FeedMessage::Line("\tat Foo.bar".to_string())).await.unwrap();
        tx.send(FeedMessage::Disconnected).await.unwrap();
        drop(tx);
        consumer.await.unwrap();

        let records = shared.snapshot().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level(), LogLevel::Unknown);
        assert_eq!(records[0].message(), "\tat Foo.bar");
        assert_eq!(records[1].message(), "Starting up");
        assert!(!shared.connected.load(Ordering::SeqCst));

        assert!(matches!(events.recv().await.unwrap(), ViewEvent::Connection(true)));
        assert!(matches!(events.recv().await.unwrap(), ViewEvent::Record(_)));
        assert!(matches!(events.recv().await.unwrap(), ViewEvent::Record(_)));
        assert!(matches!(events.recv().await.unwrap(), ViewEvent::Connection(false)));
    }

    #[tokio::test]
    async fn test_no_prepend_after_teardown() {
        let shared = Arc::new(Shared::new(500));
        let (tx, rx) = mpsc::channel(8);
        let consumer = tokio::spawn(consume_feed(rx, Arc::clone(&shared)));

        tx.send(FeedMessage::Line(LINE.to_string())).await.unwrap();
        while shared.snapshot().await.is_empty() {
            tokio::task::yield_now().await;
        }

        shared.deactivate().await;
        tx.send(FeedMessage::Line("late line".to_string())).await.unwrap();
        consumer.await.unwrap();

        let records = shared.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "Starting up");
        assert!(!shared.replace(vec![parse_line("history")]).await);
        shared.clear().await;
        assert_eq!(shared.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_live_cap_through_consumer() {
        let shared = Arc::new(Shared::new(500));
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let consumer = tokio::spawn(consume_feed(rx, Arc::clone(&shared)));

        for n in 1..=501 {
            tx.send(FeedMessage::Line(format!("line {}", n))).await.unwrap();
        }
        drop(tx);
        consumer.await.unwrap();

        let records = shared.snapshot().await;
        assert_eq!(records.len(), 500);
        assert_eq!(records[0].message(), "line 501");
        assert!(records.iter().all(|r| r.message() != "line 1"));
    }

    /// History from `api_url`; the live feed points at a closed port and
    /// keeps retrying in the background.
    pub(crate) async fn offline_config(api_url: String) -> Config {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Config {
            api_url,
            stream_url: Some(format!("ws://{}/ws-log/websocket", addr)),
            reconnect_delay_ms: 60_000,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_mount_loads_history_then_unmounts() {
        let body = serde_json::to_string(&vec![
            "2024-01-01 10:00:00.001 INFO  a : first",
            "2024-01-01 10:00:00.002 ERROR b : second",
        ])
        .unwrap();
        let (api_url, _head) = serve_once("200 OK", &body).await;
        let viewer = LogViewer::mount(&offline_config(api_url).await);

        let mut records = Vec::new();
        for _ in 0..200 {
            records = viewer.snapshot().await;
            if !records.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level(), LogLevel::Error);
        assert_eq!(records[0].message(), "second");
        assert_eq!(records[1].message(), "first");
        assert!(!viewer.is_connected());

        viewer.clear().await;
        assert_eq!(viewer.len().await, 0);

        tokio::time::timeout(Duration::from_secs(5), viewer.unmount())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_buffer() {
        let (api_url, head_rx) = serve_once("503 Service Unavailable", "").await;
        let viewer = LogViewer::mount(&offline_config(api_url).await);

        head_rx.await.unwrap();
        while viewer.is_loading() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(viewer.snapshot().await.is_empty());

        viewer.shared.prepend(parse_line(LINE)).await;
        // The fake server is gone by now, so this load fails to connect.
        let loaded = viewer.reload_history().await;

        assert!(loaded.is_none());
        assert!(!viewer.is_loading());
        let records = viewer.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "Starting up");
        assert_eq!(viewer.capacity().await, 500);

        viewer.unmount().await;
    }

    fn history_body(lines: &[&str]) -> String {
        serde_json::to_string(lines).unwrap()
    }

    fn live_config(api_url: String, stream: std::net::SocketAddr, history_first: bool) -> Config {
        Config {
            api_url,
            stream_url: Some(format!("ws://{}/ws-log/websocket", stream)),
            reconnect_delay_ms: 60_000,
            history_first,
            ..Config::default()
        }
    }

    async fn wait_for_len(shared: &Shared, len: usize) -> Vec<LogRecord> {
        timeout(WAIT, async {
            loop {
                let records = shared.snapshot().await;
                if records.len() == len {
                    return records;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_loading_stays_set_until_last_load_finishes() {
        let body = history_body(&["2024-01-01 10:00:00.001 INFO  a : slow"]);
        let (slow_url, slow_head) = serve_once_after("200 OK", &body, Duration::from_millis(500)).await;
        let (fast_url, _fast_head) = serve_once("500 Internal Server Error", "").await;
        let slow = HistoryLoader::new(&Config { api_url: slow_url, ..Config::default() });
        let fast = HistoryLoader::new(&Config { api_url: fast_url, ..Config::default() });

        let shared = Arc::new(Shared::new(500));
        let slow_load = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { load_history_into(&slow, &shared, 10).await })
        };
        slow_head.await.unwrap();
        assert!(shared.is_loading());

        assert!(load_history_into(&fast, &shared, 10).await.is_none());
        assert!(shared.is_loading());

        assert_eq!(slow_load.await.unwrap(), Some(1));
        assert!(!shared.is_loading());
        assert_eq!(shared.snapshot().await[0].message(), "slow");
    }

    #[tokio::test]
    async fn test_history_first_opens_feed_after_history() {
        let body = history_body(&["2024-01-01 10:00:00.001 INFO  a : from history"]);
        let (api_url, _head) = serve_once_after("200 OK", &body, Duration::from_millis(300)).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = listener.local_addr().unwrap();

        let viewer = LogViewer::mount(&live_config(api_url, stream, true));
        let mut ws = timeout(WAIT, accept_stomp(&listener)).await.unwrap();

        // The feed only connects once history is in place.
        assert!(!viewer.is_loading());
        let records = viewer.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "from history");

        ws.send(Message::Text(message_frame(LINE))).await.unwrap();
        let records = wait_for_len(&viewer.shared, 2).await;
        assert_eq!(records[0].message(), "Starting up");
        assert_eq!(records[1].message(), "from history");

        timeout(WAIT, viewer.unmount()).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_start_lets_history_replace_live_lines() {
        let body = history_body(&["2024-01-01 10:00:00.001 INFO  a : from history"]);
        let (api_url, head_rx) = serve_once_after("200 OK", &body, Duration::from_millis(500)).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = listener.local_addr().unwrap();

        let viewer = LogViewer::mount(&live_config(api_url, stream, false));
        let mut ws = timeout(WAIT, accept_stomp(&listener)).await.unwrap();
        head_rx.await.unwrap();

        // Subscribed while the history request is still pending.
        assert!(viewer.is_loading());
        assert!(viewer.snapshot().await.is_empty());

        ws.send(Message::Text(message_frame(LINE))).await.unwrap();
        let records = wait_for_len(&viewer.shared, 1).await;
        assert_eq!(records[0].message(), "Starting up");

        timeout(WAIT, async {
            while viewer.is_loading() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let records = viewer.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "from history");

        timeout(WAIT, viewer.unmount()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unmount_closes_feed_and_drops_late_lines() {
        let (api_url, _head) = serve_once("200 OK", "[]").await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = listener.local_addr().unwrap();

        let viewer = LogViewer::mount(&live_config(api_url, stream, true));
        let shared = Arc::clone(&viewer.shared);
        let mut ws = timeout(WAIT, accept_stomp(&listener)).await.unwrap();

        ws.send(Message::Text(message_frame(LINE))).await.unwrap();
        wait_for_len(&shared, 1).await;
        assert!(viewer.is_connected());

        let server = tokio::spawn(async move {
            let disconnect = next_text(&mut ws).await;
            // The client may already be gone.
            let _ = ws.send(Message::Text(message_frame("late line"))).await;
            disconnect
        });

        timeout(WAIT, viewer.unmount()).await.unwrap();
        let disconnect = timeout(WAIT, server).await.unwrap().unwrap();
        assert!(disconnect.starts_with("DISCONNECT\n"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let records = shared.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message(), "Starting up");
        assert!(!shared.connected.load(Ordering::SeqCst));
        assert!(!shared.prepend(parse_line("after unmount")).await);
    }
}
