//! End-to-end over TCP: a RESP2 client talks to a running proxy backed by
//! in-memory stores.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::codec::Framed;

use common::{context, standalone_config};
use migrate_proxy::{
    DetachedConn, Dispatcher, InMemoryStore, LoggingHooks, ProxyServer, Reply, ServerError, ServerHooks,
};

struct Proxy {
    addr: SocketAddr,
    source: Arc<InMemoryStore>,
    target: Arc<InMemoryStore>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Proxy {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start_with(hooks: impl ServerHooks) -> Proxy {
    let source = Arc::new(InMemoryStore::new());
    let target = Arc::new(InMemoryStore::new());
    let dispatcher = Dispatcher::new(context(source.clone(), target.clone(), standalone_config()));
    let server = ProxyServer::bind("127.0.0.1:0", dispatcher)
        .await
        .unwrap()
        .with_hooks(hooks);
    let addr = server.local_addr().unwrap();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(server.serve_with_shutdown(async move {
        let _ = rx.await;
    }));

    Proxy {
        addr,
        source,
        target,
        shutdown: Some(tx),
    }
}

async fn start() -> Proxy {
    start_with(LoggingHooks).await
}

struct Client(Framed<TcpStream, Resp2>);

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self(Framed::new(TcpStream::connect(addr).await.unwrap(), Resp2::default()))
    }

    async fn send(&mut self, frame: BytesFrame) {
        self.0.send(frame).await.unwrap();
    }

    async fn recv(&mut self) -> Option<BytesFrame> {
        tokio::time::timeout(Duration::from_secs(5), self.0.next())
            .await
            .expect("reply timed out")
            .map(|f| f.unwrap())
    }

    async fn call(&mut self, parts: &[&str]) -> BytesFrame {
        let args = parts
            .iter()
            .map(|p| BytesFrame::BulkString(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        self.send(BytesFrame::Array(args)).await;
        self.recv().await.expect("connection closed before reply")
    }
}

fn status(s: &'static str) -> BytesFrame {
    BytesFrame::SimpleString(Bytes::from_static(s.as_bytes()))
}

fn bulk(s: &'static str) -> BytesFrame {
    BytesFrame::BulkString(Bytes::from_static(s.as_bytes()))
}

fn is_error(frame: &BytesFrame) -> bool {
    matches!(frame, BytesFrame::Error(_))
}

#[tokio::test]
async fn ping_set_get_round_trip() {
    let proxy = start().await;
    let mut client = Client::connect(proxy.addr).await;

    assert_eq!(client.call(&["PING"]).await, status("PONG"));
    assert_eq!(client.call(&["SET", "k", "v"]).await, status("OK"));
    assert_eq!(client.call(&["GET", "k"]).await, bulk("v"));
    assert_eq!(client.call(&["GET", "missing"]).await, BytesFrame::Null);
    assert_eq!(proxy.source.peek(b"k"), Some(b"v".to_vec()));
    assert_eq!(proxy.target.peek(b"k"), Some(b"v".to_vec()));
}

#[tokio::test]
async fn integer_replies() {
    let proxy = start().await;
    proxy.source.insert("k", "v", None);
    let mut client = Client::connect(proxy.addr).await;

    assert_eq!(client.call(&["EXISTS", "k"]).await, BytesFrame::Integer(1));
    assert_eq!(client.call(&["EXPIRE", "k", "100"]).await, BytesFrame::Integer(1));
    assert_eq!(client.call(&["DEL", "k"]).await, BytesFrame::Integer(1));
    assert_eq!(client.call(&["EXISTS", "k"]).await, BytesFrame::Integer(0));
}

#[tokio::test]
async fn client_errors_keep_connection_open() {
    let proxy = start().await;
    let mut client = Client::connect(proxy.addr).await;

    assert!(is_error(&client.call(&["SET", "onlykey"]).await));
    assert!(is_error(&client.call(&["NOPE"]).await));
    assert!(is_error(&client.call(&["EXPIRE", "k", "abc"]).await));
    assert_eq!(client.call(&["PING"]).await, status("PONG"));
}

#[tokio::test]
async fn non_array_frame_gets_protocol_error() {
    let proxy = start().await;
    let mut client = Client::connect(proxy.addr).await;

    client.send(bulk("PING")).await;
    let reply = client.recv().await.unwrap();
    assert!(is_error(&reply), "{:?}", reply);
    assert_eq!(client.call(&["PING"]).await, status("PONG"));
}

#[tokio::test]
async fn cluster_slots_nested_shape() {
    let proxy = start().await;
    proxy.source.set_cluster_slots(vec![migrate_proxy::SlotRange {
        start: 0,
        end: 16383,
        nodes: vec![migrate_proxy::SlotNode {
            ip: "10.0.0.1".into(),
            port: 7000,
            id: "abc".into(),
        }],
    }]);
    let mut client = Client::connect(proxy.addr).await;

    assert_eq!(
        client.call(&["CLUSTER", "SLOTS"]).await,
        BytesFrame::Array(vec![BytesFrame::Array(vec![
            BytesFrame::Integer(0),
            BytesFrame::Integer(16383),
            BytesFrame::Array(vec![bulk("10.0.0.1"), BytesFrame::Integer(7000), bulk("abc")]),
        ])])
    );
}

#[tokio::test]
async fn quit_replies_then_closes() {
    let proxy = start().await;
    let mut client = Client::connect(proxy.addr).await;

    assert_eq!(client.call(&["QUIT"]).await, status("OK"));
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn detach_answers_through_hook() {
    let proxy = start().await;
    let mut client = Client::connect(proxy.addr).await;

    assert_eq!(client.call(&["DETACH"]).await, status("OK"));
    // LoggingHooks closes the connection after answering
    assert_eq!(client.recv().await, None);
}

#[derive(Default, Clone)]
struct CountingHooks {
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    detached: Arc<AtomicUsize>,
}

impl ServerHooks for CountingHooks {
    fn on_accept(&self, _peer: SocketAddr) -> bool {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn on_close(&self, _peer: SocketAddr, _error: Option<&ServerError>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_detach(&self, mut conn: DetachedConn) {
        self.detached.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            conn.write(Reply::Status("CUSTOM".into())).await.unwrap();
        });
    }
}

#[tokio::test]
async fn hooks_observe_lifecycle() {
    let hooks = CountingHooks::default();
    let proxy = start_with(hooks.clone()).await;

    let mut client = Client::connect(proxy.addr).await;
    client.call(&["PING"]).await;
    client.call(&["QUIT"]).await;
    assert_eq!(client.recv().await, None);

    let mut detached = Client::connect(proxy.addr).await;
    detached.send(BytesFrame::Array(vec![bulk("DETACH")])).await;
    assert_eq!(detached.recv().await, Some(status("CUSTOM")));

    assert_eq!(hooks.accepted.load(Ordering::SeqCst), 2);
    // on_close runs after the socket is dropped
    for _ in 0..100 {
        if hooks.closed.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hooks.closed.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.detached.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bind_conflict_is_an_error() {
    let proxy = start().await;
    let dispatcher = Dispatcher::new(context(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryStore::new()),
        standalone_config(),
    ));
    let result = ProxyServer::bind(&proxy.addr.to_string(), dispatcher).await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));
}
