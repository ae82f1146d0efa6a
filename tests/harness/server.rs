//! Loopback server speaking just enough HTTP/1.1 and WebSocket for the
//! integration tests.
//!
//! WebSocket paths (`/ws...`):
//! - text is echoed upper-cased, binary is echoed as is
//! - text `"disconnect"` drops the TCP connection without a close frame
//! - text `"ping"` makes the server send a ping with payload `srv`
//! - text `"fragments"` sends `"frag-men-ts"` as three fragments with a ping
//!   between the first two
//! - text `"close"` makes the server start the closing handshake (1000, `bye`)
//! - a pong is reported back as text `pong:<payload>`
//! - a close frame is recorded and echoed
//! - `/ws-bad-accept` answers the upgrade with a wrong accept key
//! - `/ws-masked` sends a masked frame right after the upgrade
//! - `/ws-silent` completes the upgrade and then never reads or writes
//!
//! Any other path is plain HTTP with keep-alive. The body is
//! `<connection number>:<path>`. `/close` answers with `Connection: close`,
//! `/slow` waits 300 ms first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use rswc::codec::{FrameCodec, FramedTransport};
use rswc::config::Limits;
use rswc::protocol::{FragmentAssembler, Frame, FrameValidator, OpCode, compute_accept_key};
use rswc::{CloseFrame, MessageKind, Role};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Shared {
    connections: AtomicUsize,
    requests: AtomicUsize,
    closes: Mutex<Vec<Option<CloseFrame>>>,
}

pub struct TestServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());

        let state = Arc::clone(&shared);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let number = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let _ = serve(stream, number, state).await;
                });
            }
        });

        Self {
            addr,
            shared,
            accept,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// HTTP requests answered so far.
    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Wait until the server has seen `n` close frames and return them.
    pub async fn closes(&self, n: usize) -> Vec<Option<CloseFrame>> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let closes = self.shared.closes.lock();
                    if closes.len() >= n {
                        return closes.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("server never saw the close frames")
    }

    pub fn shutdown(self) {
        self.accept.abort();
    }
}

type Io = std::io::Result<()>;

async fn serve(mut stream: TcpStream, number: usize, shared: Arc<Shared>) -> Io {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let Some(head) = read_head(&mut stream, &mut buf).await? else {
            return Ok(());
        };
        let path = head
            .lines()
            .next()
            .and_then(|line| line.split(' ').nth(1))
            .unwrap_or("/")
            .to_string();

        if path.starts_with("/ws") {
            return serve_websocket(stream, &head, &path, buf, shared).await;
        }

        let length = header(&head, "content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < length {
            if stream.read_buf(&mut buf).await? == 0 {
                return Ok(());
            }
        }
        buf.advance(length);

        if path == "/slow" {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let body = format!("{number}:{path}");
        let closing = path == "/close"
            || header(&head, "connection").is_some_and(|v| v.eq_ignore_ascii_case("close"));
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n{body}",
            body.len(),
            if closing { "Connection: close\r\n" } else { "" }
        );
        stream.write_all(response.as_bytes()).await?;
        shared.requests.fetch_add(1, Ordering::SeqCst);
        if closing {
            return stream.shutdown().await;
        }
    }
}

async fn serve_websocket(
    mut stream: TcpStream,
    head: &str,
    path: &str,
    leftover: BytesMut,
    shared: Arc<Shared>,
) -> Io {
    let key = header(head, "sec-websocket-key").unwrap_or_default();
    let accept = if path == "/ws-bad-accept" {
        compute_accept_key("not the key")
    } else {
        compute_accept_key(&key)
    };
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    stream.write_all(response.as_bytes()).await?;

    match path {
        "/ws-masked" => {
            stream
                .write_all(&[0x81, 0x82, 1, 2, 3, 4, b'h' ^ 1, b'i' ^ 2])
                .await?;
        }
        "/ws-silent" => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(());
        }
        _ => {}
    }

    let codec = FrameCodec::new(FrameValidator::new(Role::Server, 1 << 24));
    let mut framed = FramedTransport::new(stream, codec, leftover, 4096);
    let mut assembler = FragmentAssembler::new(&Limits::default());
    let mut close_sent = false;

    loop {
        let Ok(Some(frame)) = framed.read_frame().await else {
            return Ok(());
        };
        match frame.opcode {
            OpCode::Ping => {
                let _ = framed.send_all(&[Frame::pong(frame.payload.clone())]).await;
            }
            OpCode::Pong => {
                let text = format!("pong:{}", String::from_utf8_lossy(&frame.payload));
                let _ = framed.send_all(&[Frame::text(text)]).await;
            }
            OpCode::Close => {
                shared
                    .closes
                    .lock()
                    .push(CloseFrame::from_payload(&frame.payload).ok().flatten());
                if !close_sent {
                    let echo = Frame::new(true, OpCode::Close, frame.payload.clone());
                    let _ = framed.send_all(&[echo]).await;
                }
                let _ = framed.shutdown().await;
                return Ok(());
            }
            _ => {
                let Ok(Some(message)) = assembler.push(frame) else {
                    continue;
                };
                let reply = match message.kind {
                    MessageKind::Binary => vec![Frame::binary(message.payload)],
                    MessageKind::Text => {
                        let text = String::from_utf8_lossy(&message.payload).into_owned();
                        match text.as_str() {
                            "disconnect" => return Ok(()),
                            "ping" => vec![Frame::ping("srv")],
                            "fragments" => vec![
                                Frame::new(false, OpCode::Text, "frag-"),
                                Frame::ping("mid"),
                                Frame::new(false, OpCode::Continuation, "men-"),
                                Frame::new(true, OpCode::Continuation, "ts"),
                            ],
                            "close" => {
                                close_sent = true;
                                let bye = CloseFrame::new(1000u16, "bye");
                                vec![Frame::close(Some(&bye)).unwrap()]
                            }
                            _ => vec![Frame::text(text.to_uppercase())],
                        }
                    }
                };
                if framed.send_all(&reply).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn read_head(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<Option<String>> {
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = buf.split_to(end + 4);
            return Ok(Some(String::from_utf8_lossy(&head).into_owned()));
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

fn header(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim()
            .eq_ignore_ascii_case(name)
            .then(|| v.trim().to_string())
    })
}
