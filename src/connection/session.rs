//! One live WebSocket connection after the upgrade.
//!
//! The session runs on its own task and owns everything mutable about the
//! connection: the framed transport, the fragment assembler, the outgoing
//! splitter and the timers. [`WebSocketClient`] handles talk to it through a
//! command queue, so sends are flushed in call order and frames are handled
//! in arrival order.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::bus::{CompletionBus, CompletionEvent, RequestContext, RequestId};
use crate::codec::{FrameCodec, FramedTransport};
use crate::config::WebSocketConfig;
use crate::connection::{ConnectionState, OutgoingFrameSplitter, Role};
use crate::endpoint::EndpointKey;
use crate::error::{Error, ErrorCategory, Result, TimeoutKind};
use crate::listener::{WebSocketEvent, WebSocketListener};
use crate::message::{CloseCode, CloseFrame, MessageKind};
use crate::pool::PooledConnection;
use crate::protocol::{FragmentAssembler, Frame, FrameValidator, MAX_CONTROL_FRAME_PAYLOAD, OpCode};

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Message {
        kind: MessageKind,
        payload: Bytes,
        reply: Reply,
    },
    Fragment {
        kind: MessageKind,
        payload: Bytes,
        fin: bool,
        rsv: u8,
        reply: Reply,
    },
    Control {
        frame: Frame,
        reply: Reply,
    },
    Close {
        frame: CloseFrame,
        reply: Reply,
    },
}

impl Command {
    fn reject(self, err: Error) {
        let reply = match self {
            Command::Message { reply, .. }
            | Command::Fragment { reply, .. }
            | Command::Control { reply, .. }
            | Command::Close { reply, .. } => reply,
        };
        let _ = reply.send(Err(err));
    }
}

/// Resolves once with the result of one send.
///
/// The send is queued when the future is created; dropping the future does
/// not cancel it.
pub struct SendFuture {
    state: SendState,
}

enum SendState {
    Queued(oneshot::Receiver<Result<()>>),
    Failed(Option<Error>),
}

impl SendFuture {
    fn failed(err: Error) -> Self {
        Self {
            state: SendState::Failed(Some(err)),
        }
    }
}

impl Future for SendFuture {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            SendState::Queued(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or(Err(Error::ConnectionClosed(None)))),
            SendState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(Error::ConnectionClosed(None))))
            }
        }
    }
}

impl fmt::Debug for SendFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SendState::Queued(_) => "queued",
            SendState::Failed(_) => "failed",
        };
        f.debug_struct("SendFuture").field("state", &state).finish()
    }
}

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    abort: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    endpoint: EndpointKey,
    headers: HashMap<String, String>,
    request: RequestId,
}

/// Handle to a WebSocket session. Cheap to clone.
#[derive(Clone)]
pub struct WebSocketClient {
    shared: Arc<Shared>,
}

impl fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("request", &self.shared.request)
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl WebSocketClient {
    fn enqueue(&self, command: impl FnOnce(Reply) -> Command) -> SendFuture {
        let (reply, rx) = oneshot::channel();
        match self.shared.commands.send(command(reply)) {
            Ok(()) => SendFuture {
                state: SendState::Queued(rx),
            },
            Err(_) => SendFuture::failed(Error::ConnectionClosed(None)),
        }
    }

    /// Send a text message, split into frames if it is larger than the
    /// outgoing frame size and splitting is enabled.
    pub fn send_text(&self, text: impl Into<String>) -> SendFuture {
        let payload = Bytes::from(text.into());
        self.enqueue(|reply| Command::Message {
            kind: MessageKind::Text,
            payload,
            reply,
        })
    }

    /// Send a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> SendFuture {
        let payload = data.into();
        self.enqueue(|reply| Command::Message {
            kind: MessageKind::Binary,
            payload,
            reply,
        })
    }

    /// Send one fragment of a text message. The fragments together must
    /// form valid UTF-8.
    pub fn send_text_fragment(&self, payload: impl Into<Bytes>, fin: bool, rsv: u8) -> SendFuture {
        self.fragment(MessageKind::Text, payload.into(), fin, rsv)
    }

    /// Send one fragment of a binary message.
    pub fn send_binary_fragment(
        &self,
        payload: impl Into<Bytes>,
        fin: bool,
        rsv: u8,
    ) -> SendFuture {
        self.fragment(MessageKind::Binary, payload.into(), fin, rsv)
    }

    fn fragment(&self, kind: MessageKind, payload: Bytes, fin: bool, rsv: u8) -> SendFuture {
        self.enqueue(|reply| Command::Fragment {
            kind,
            payload,
            fin,
            rsv,
            reply,
        })
    }

    /// Send a ping. Payloads over 125 bytes fail the send.
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> SendFuture {
        let frame = Frame::ping(payload);
        self.enqueue(|reply| Command::Control { frame, reply })
    }

    /// Send an unsolicited pong, same payload limit as a ping.
    pub fn send_pong(&self, payload: impl Into<Bytes>) -> SendFuture {
        let frame = Frame::pong(payload);
        self.enqueue(|reply| Command::Control { frame, reply })
    }

    /// Send a close frame. The session stays up until the peer answers or
    /// the close timeout passes.
    pub fn send_close(&self, code: impl Into<CloseCode>, reason: impl Into<String>) -> SendFuture {
        let frame = CloseFrame::new(code, reason);
        self.enqueue(|reply| Command::Close { frame, reply })
    }

    /// Graceful close: sends already queued go out first, then a 1000 close
    /// frame, then wait for teardown.
    pub async fn close(&self) {
        if let Err(err) = self.send_close(CloseCode::Normal, "").await {
            trace!(error = %err, "close frame not sent");
        }
        self.await_close().await;
    }

    /// Forced close: queued sends fail and the transport is dropped without
    /// a close frame.
    pub fn close_now(&self) {
        self.shared.abort.cancel();
    }

    /// Wait until the session is closed and its completion published.
    pub async fn await_close(&self) {
        let mut state = self.shared.state.clone();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    #[must_use]
    pub fn endpoint(&self) -> &EndpointKey {
        &self.shared.endpoint
    }

    /// Headers of the upgrade response, names lower-cased.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.shared.headers
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.shared.request
    }
}

/// Everything a session needs besides its own state.
pub(crate) struct SessionSetup {
    pub conn: PooledConnection,
    pub leftover: BytesMut,
    pub headers: HashMap<String, String>,
    pub config: WebSocketConfig,
    pub listener: Arc<dyn WebSocketListener>,
    pub ctx: Arc<RequestContext>,
    pub bus: Arc<CompletionBus>,
    pub abort: CancellationToken,
    pub evicted: CancellationToken,
}

enum Flow {
    Continue,
    Break,
}

pub(crate) struct WebSocketSession {
    framed: FramedTransport<PooledConnection>,
    assembler: FragmentAssembler,
    splitter: OutgoingFrameSplitter,
    config: WebSocketConfig,
    listener: Arc<dyn WebSocketListener>,
    client: WebSocketClient,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    abort: CancellationToken,
    evicted: CancellationToken,
    ctx: Arc<RequestContext>,
    bus: Arc<CompletionBus>,
    idle: Option<Pin<Box<Sleep>>>,
    ping: Option<Interval>,
    close_deadline: Option<Pin<Box<Sleep>>>,
    close_sent: bool,
    close_received: bool,
}

impl WebSocketSession {
    pub(crate) fn new(setup: SessionSetup) -> (Self, WebSocketClient) {
        let SessionSetup {
            conn,
            leftover,
            headers,
            config,
            listener,
            ctx,
            bus,
            abort,
            evicted,
        } = setup;

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Open);
        let client = WebSocketClient {
            shared: Arc::new(Shared {
                commands: commands_tx,
                abort: abort.clone(),
                state: state_rx,
                endpoint: ctx.key().clone(),
                headers,
                request: ctx.id(),
            }),
        };

        let validator = FrameValidator::new(Role::Client, config.limits.max_frame_size)
            .with_accept_reserved_bits(config.accept_reserved_bits);
        let framed = FramedTransport::new(
            conn,
            FrameCodec::new(validator),
            leftover,
            config.read_buffer_size,
        );
        let idle = config
            .idle_timeout
            .map(|d| Box::pin(tokio::time::sleep(d)));
        let ping = config.ping_every.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let session = Self {
            framed,
            assembler: FragmentAssembler::new(&config.limits),
            splitter: OutgoingFrameSplitter::new(
                config.max_outgoing_frame_size,
                config.split_large_frames,
            ),
            config,
            listener,
            client: client.clone(),
            commands,
            state,
            abort,
            evicted,
            ctx,
            bus,
            idle,
            ping,
            close_deadline: None,
            close_sent: false,
            close_received: false,
        };
        (session, client)
    }

    pub(crate) async fn run(mut self) {
        debug!(request = %self.ctx.id(), endpoint = %self.ctx.key(), "session started");
        let outcome = self.drive().await;
        self.finish(outcome).await;
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            let flow = tokio::select! {
                biased;
                () = self.abort.cancelled() => {
                    debug!(request = %self.ctx.id(), "session aborted");
                    Flow::Break
                }
                () = self.evicted.cancelled() => {
                    return Err(Error::Evicted(format!(
                        "session {} evicted by a newer admission",
                        self.ctx.id()
                    )));
                }
                () = expire(&mut self.close_deadline) => {
                    debug!(request = %self.ctx.id(), "close handshake timed out");
                    Flow::Break
                }
                () = expire(&mut self.idle) => return Err(Error::Timeout(TimeoutKind::Idle)),
                () = tick(&mut self.ping) => {
                    self.framed.send_all(&[Frame::ping(Bytes::new())]).await?;
                    Flow::Continue
                }
                frame = self.framed.read_frame() => match frame? {
                    Some(frame) => self.on_frame(frame).await?,
                    None if self.close_sent || self.close_received => Flow::Break,
                    None => return Err(Error::ConnectionClosed(None)),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await?,
                    None => Flow::Break,
                },
            };
            if let Flow::Break = flow {
                return Ok(());
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Flow> {
        trace!(
            opcode = %frame.opcode,
            len = frame.payload.len(),
            fin = frame.fin,
            "frame received"
        );
        self.reset_idle();

        match frame.opcode {
            OpCode::Ping => {
                if self.config.auto_pong && !self.close_sent {
                    self.framed
                        .send_all(&[Frame::pong(frame.payload.clone())])
                        .await?;
                }
                self.emit(WebSocketEvent::Ping(frame.payload));
            }
            OpCode::Pong => self.emit(WebSocketEvent::Pong(frame.payload)),
            OpCode::Close => return self.on_close_frame(frame.payload).await,
            _ => {
                if let Some(message) = self.assembler.push(frame)? {
                    let event = match message.kind {
                        MessageKind::Text => WebSocketEvent::Text(message.into_text()?),
                        MessageKind::Binary => WebSocketEvent::Binary(message.payload),
                    };
                    self.emit(event);
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_close_frame(&mut self, payload: Bytes) -> Result<Flow> {
        let close = CloseFrame::from_payload(&payload)?;
        self.close_received = true;

        if self.config.auto_close_frame && !self.close_sent {
            self.framed
                .send_all(&[Frame::new(true, OpCode::Close, payload)])
                .await?;
            self.close_sent = true;
        }

        let (code, reason) = close.map_or((CloseCode::NoStatus, String::new()), |c| {
            (c.code, c.reason)
        });
        debug!(request = %self.ctx.id(), code = code.as_u16(), %reason, "close frame received");
        self.emit(WebSocketEvent::CloseFrame { code, reason });

        if self.close_sent {
            return Ok(Flow::Break);
        }
        self.enter_closing();
        Ok(Flow::Continue)
    }

    async fn on_command(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Message {
                kind,
                payload,
                reply,
            } => {
                let frames = self
                    .check_can_send()
                    .and_then(|()| self.splitter.split_message(kind, payload));
                self.deliver(frames, reply).await?;
            }
            Command::Fragment {
                kind,
                payload,
                fin,
                rsv,
                reply,
            } => {
                let frames = self
                    .check_can_send()
                    .and_then(|()| self.splitter.fragment(kind, payload, fin, rsv));
                self.deliver(frames, reply).await?;
            }
            Command::Control { frame, reply } => {
                let frames = self.check_can_send().and_then(|()| {
                    if frame.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                        return Err(Error::OutgoingFrameTooLarge {
                            size: frame.payload.len(),
                            max: MAX_CONTROL_FRAME_PAYLOAD,
                        });
                    }
                    Ok(vec![frame])
                });
                self.deliver(frames, reply).await?;
            }
            Command::Close { frame, reply } => {
                let frames = self
                    .check_can_send()
                    .and_then(|()| Frame::close(Some(&frame)).map(|f| vec![f]));
                if self.deliver(frames, reply).await? {
                    debug!(request = %self.ctx.id(), code = frame.code.as_u16(), "close frame sent");
                    self.close_sent = true;
                    if self.close_received {
                        return Ok(Flow::Break);
                    }
                    self.enter_closing();
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn check_can_send(&self) -> Result<()> {
        if self.close_sent {
            return Err(Error::IllegalState("close frame already sent".into()));
        }
        Ok(())
    }

    /// Write a prepared send. A preparation error fails only that send; a
    /// write error fails it and ends the session. Returns whether the frames
    /// were written.
    async fn deliver(&mut self, frames: Result<Vec<Frame>>, reply: Reply) -> Result<bool> {
        let frames = match frames {
            Ok(frames) => frames,
            Err(err) => {
                debug!(request = %self.ctx.id(), error = %err, "send rejected");
                let _ = reply.send(Err(err));
                return Ok(false);
            }
        };
        match self.framed.send_all(&frames).await {
            Ok(()) => {
                trace!(frames = frames.len(), "send flushed");
                let _ = reply.send(Ok(()));
                Ok(true)
            }
            Err(err) => {
                let _ = reply.send(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn enter_closing(&mut self) {
        self.state.send_replace(ConnectionState::Closing);
        self.ping = None;
        if self.close_deadline.is_none() {
            self.close_deadline = Some(Box::pin(tokio::time::sleep(self.config.close_timeout)));
        }
    }

    fn reset_idle(&mut self) {
        if let (Some(sleep), Some(timeout)) = (self.idle.as_mut(), self.config.idle_timeout) {
            sleep.as_mut().reset(Instant::now() + timeout);
        }
    }

    fn emit(&self, event: WebSocketEvent) {
        self.listener.on_event(&self.client, event);
    }

    async fn finish(mut self, outcome: Result<()>) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.reject(Error::ConnectionClosed(None));
        }

        let close_timeout = self.config.close_timeout;
        if let Err(err) = &outcome {
            warn!(request = %self.ctx.id(), endpoint = %self.ctx.key(), error = %err, "session failed");
            if let (ErrorCategory::Protocol, Some(code), false) =
                (err.category(), err.close_code(), self.close_sent)
            {
                if let Ok(frame) = Frame::close(Some(&CloseFrame::new(code, ""))) {
                    let _ = tokio::time::timeout(close_timeout, self.framed.send_all(&[frame])).await;
                }
            }
        }
        let _ = tokio::time::timeout(close_timeout, self.framed.shutdown()).await;

        let Self {
            framed,
            listener,
            client,
            state,
            ctx,
            bus,
            ..
        } = self;

        let mut conn = framed.into_inner();
        conn.mark_upgraded();
        ctx.park_connection(conn);
        let event = match &outcome {
            Ok(()) => CompletionEvent::Success(Arc::clone(&ctx)),
            Err(err) => CompletionEvent::Error(Arc::clone(&ctx), err.clone()),
        };
        bus.publish(event);

        if let Err(err) = outcome {
            listener.on_event(&client, WebSocketEvent::Error(err));
        }
        listener.on_event(&client, WebSocketEvent::Disconnect);
        state.send_replace(ConnectionState::Closed);
        debug!(request = %ctx.id(), "session closed");
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OperationKind;
    use crate::listener::event_channel;
    use crate::transport::BoxTransport;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    /// The server end of an in-memory session.
    struct Peer {
        framed: FramedTransport<DuplexStream>,
    }

    impl Peer {
        async fn send(&mut self, frame: Frame) {
            self.framed.send_all(&[frame]).await.unwrap();
        }

        async fn recv(&mut self) -> Frame {
            self.framed.read_frame().await.unwrap().unwrap()
        }
    }

    fn start(
        config: WebSocketConfig,
    ) -> (
        WebSocketClient,
        mpsc::UnboundedReceiver<WebSocketEvent>,
        Peer,
        Arc<CompletionBus>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(1 << 20);
        let key = EndpointKey::new("localhost", 80);
        let conn = PooledConnection::detached(key.clone(), Box::new(client_io) as BoxTransport);
        let (listener, events) = event_channel();
        let bus = Arc::new(CompletionBus::new());
        let (session, client) = WebSocketSession::new(SessionSetup {
            conn,
            leftover: BytesMut::new(),
            headers: HashMap::new(),
            config,
            listener,
            ctx: Arc::new(RequestContext::new(key, OperationKind::WebSocket)),
            bus: Arc::clone(&bus),
            abort: CancellationToken::new(),
            evicted: CancellationToken::new(),
        });
        tokio::spawn(session.run());
        let server = FrameCodec::new(FrameValidator::new(Role::Server, 1 << 20));
        let peer = Peer {
            framed: FramedTransport::new(server_io, server, BytesMut::new(), 4096),
        };
        (client, events, peer, bus)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<WebSocketEvent>) -> WebSocketEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    // --------------------------------------------------------------------------
    // Inbound
    // --------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fragmented_text_with_interleaved_ping() {
        let (_client, mut events, mut peer, _) = start(WebSocketConfig::default());
        peer.send(Frame::new(false, OpCode::Text, "Hel")).await;
        peer.send(Frame::ping("p")).await;
        peer.send(Frame::new(true, OpCode::Continuation, "lo")).await;

        let pong = peer.recv().await;
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(&pong.payload[..], b"p");
        assert!(pong.masked);

        assert_eq!(
            next_event(&mut events).await,
            WebSocketEvent::Ping(Bytes::from_static(b"p"))
        );
        assert_eq!(
            next_event(&mut events).await,
            WebSocketEvent::Text("Hello".into())
        );
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed_before_notification() {
        let (client, mut events, mut peer, bus) = start(WebSocketConfig::default());
        let close = CloseFrame::new(1001u16, "bye");
        peer.send(Frame::close(Some(&close)).unwrap()).await;

        let echo = peer.recv().await;
        assert_eq!(echo.opcode, OpCode::Close);
        assert_eq!(CloseFrame::from_payload(&echo.payload).unwrap(), Some(close));

        assert_eq!(
            next_event(&mut events).await,
            WebSocketEvent::CloseFrame {
                code: CloseCode::GoingAway,
                reason: "bye".into()
            }
        );
        assert_eq!(next_event(&mut events).await, WebSocketEvent::Disconnect);
        client.await_close().await;
        assert_eq!(bus.published_count(), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_masked_server_frame_is_fatal() {
        let (client, mut events, mut peer, bus) = start(WebSocketConfig::default());
        // hand-built masked frame from the "server"
        peer.framed
            .get_mut()
            .write_all(&[0x81, 0x81, 1, 2, 3, 4, b'x' ^ 1])
            .await
            .unwrap();

        let close = peer.recv().await;
        assert_eq!(close.opcode, OpCode::Close);
        assert_eq!(&close.payload[..2], &1002u16.to_be_bytes());

        assert_eq!(
            next_event(&mut events).await,
            WebSocketEvent::Error(Error::MaskedServerFrame)
        );
        assert_eq!(next_event(&mut events).await, WebSocketEvent::Disconnect);
        client.await_close().await;
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn test_new_message_inside_fragmented_one_is_fatal() {
        let (client, mut events, mut peer, bus) = start(WebSocketConfig::default());
        peer.send(Frame::new(false, OpCode::Text, "par")).await;
        peer.send(Frame::binary("interloper")).await;

        let close = peer.recv().await;
        assert_eq!(close.opcode, OpCode::Close);
        assert_eq!(&close.payload[..2], &1002u16.to_be_bytes());

        match next_event(&mut events).await {
            WebSocketEvent::Error(err) => {
                assert!(matches!(err, Error::ProtocolViolation(_)), "{err:?}");
            }
            other => panic!("expected an error, got {other:?}"),
        }
        assert_eq!(next_event(&mut events).await, WebSocketEvent::Disconnect);
        client.await_close().await;
        assert_eq!(bus.published_count(), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    // --------------------------------------------------------------------------
    // Outbound
    // --------------------------------------------------------------------------

    #[tokio::test]
    async fn test_sends_flush_in_call_order() {
        let (client, _events, mut peer, _) = start(WebSocketConfig::default());
        let a = client.send_text("one");
        let b = client.send_binary(vec![2u8]);
        let c = client.send_text("three");
        assert!(a.await.is_ok() && b.await.is_ok() && c.await.is_ok());

        assert_eq!(&peer.recv().await.payload[..], b"one");
        assert_eq!(&peer.recv().await.payload[..], &[2]);
        assert_eq!(&peer.recv().await.payload[..], b"three");
    }

    #[tokio::test]
    async fn test_capacity_error_leaves_session_usable() {
        let config = WebSocketConfig::default()
            .with_max_outgoing_frame_size(40)
            .with_split_large_frames(false);
        let (client, _events, mut peer, _) = start(config);

        let err = client.send_text("x".repeat(101)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Capacity);
        client.send_text("fits").await.unwrap();
        assert_eq!(&peer.recv().await.payload[..], b"fits");
        assert!(client.is_open());
    }

    #[tokio::test]
    async fn test_oversized_ping_is_capacity_error() {
        let (client, _events, mut peer, _) = start(WebSocketConfig::default());
        let err = client.send_ping(vec![0u8; 126]).await.unwrap_err();
        assert_eq!(err, Error::OutgoingFrameTooLarge { size: 126, max: 125 });

        client.send_ping(vec![1u8; 125]).await.unwrap();
        let ping = peer.recv().await;
        assert_eq!(ping.opcode, OpCode::Ping);
        assert_eq!(ping.payload.len(), 125);
    }

    #[tokio::test]
    async fn test_send_after_close_is_usage_error() {
        let (client, _events, mut peer, _) = start(WebSocketConfig::default());
        client.send_close(1000u16, "done").await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closing);
        assert_eq!(peer.recv().await.opcode, OpCode::Close);

        let err = client.send_text("late").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Usage);
    }

    #[tokio::test]
    async fn test_close_now_fails_pending_and_later_sends() {
        let (client, mut events, _peer, bus) = start(WebSocketConfig::default());
        client.close_now();
        client.await_close().await;
        assert_eq!(
            client.send_text("gone").await,
            Err(Error::ConnectionClosed(None))
        );
        assert_eq!(next_event(&mut events).await, WebSocketEvent::Disconnect);
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let config = WebSocketConfig::default().with_idle_timeout(Duration::from_secs(2));
        let (client, mut events, _peer, _) = start(config);
        assert_eq!(
            next_event(&mut events).await,
            WebSocketEvent::Error(Error::Timeout(TimeoutKind::Idle))
        );
        client.await_close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ping() {
        let config = WebSocketConfig::default().with_ping_every(Duration::from_secs(1));
        let (_client, _events, mut peer, _) = start(config);
        let ping = peer.recv().await;
        assert_eq!(ping.opcode, OpCode::Ping);
        assert!(ping.payload.is_empty());
    }
}
