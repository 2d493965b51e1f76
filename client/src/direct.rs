//! Direct peer connections over TCP.
//!
//! Every connection binds its own listener and advertises it as a host
//! candidate. The side that made the offer dials the answerer's candidates,
//! including ones that trickle in after dialing started; the answerer accepts. The data channel is a stream of length-prefixed
//! frames, the first of which (sent by the dialer) names the dialer and the
//! session id of its offer so the answerer can drop strangers.

use crate::error::SessionError;
use crate::transport::{DataChannel, PeerConnection, PeerTransport, SessionEvent};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{IceCandidate, PlayerId, SdpKind, SessionDescription};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

pub const MAX_FRAME_LEN: usize = 64 * 1024;
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

type Outbound = mpsc::UnboundedReceiver<Vec<u8>>;

pub struct DirectTransport {
    local_id: PlayerId,
    bind_ip: IpAddr,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl DirectTransport {
    pub fn new(
        local_id: &PlayerId,
        bind_ip: IpAddr,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            local_id: local_id.clone(),
            bind_ip,
            events,
        }
    }
}

impl PeerTransport for DirectTransport {
    type Connection = DirectConnection;

    fn connect(&mut self, peer: &PlayerId, serial: u64) -> Result<DirectConnection, SessionError> {
        let listener = std::net::TcpListener::bind((self.bind_ip, 0))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        let mut local_addr = listener.local_addr()?;
        if local_addr.ip().is_unspecified() {
            local_addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        debug!("Listening for {} on {}", peer, local_addr);

        let reporter = Reporter {
            peer: peer.clone(),
            serial,
            events: self.events.clone(),
        };
        reporter.candidate(IceCandidate::tcp_host(local_addr));

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Ok(DirectConnection {
            local_id: self.local_id.clone(),
            peer: peer.clone(),
            session_id: rand::random::<u64>().to_string(),
            local_addr,
            reporter,
            listener: Some(listener),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            channel_label: None,
            local_kind: None,
            remote_session: None,
            candidates: Vec::new(),
            dialer: None,
            tasks: Vec::new(),
            closed: false,
        })
    }
}

pub struct DirectConnection {
    local_id: PlayerId,
    peer: PlayerId,
    session_id: String,
    local_addr: SocketAddr,
    reporter: Reporter,
    listener: Option<TcpListener>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Option<Outbound>,
    channel_label: Option<String>,
    local_kind: Option<SdpKind>,
    remote_session: Option<String>,
    candidates: Vec<SocketAddr>,
    dialer: Option<mpsc::UnboundedSender<SocketAddr>>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl DirectConnection {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn describe(&self, setup: &str) -> String {
        format!(
            "v=0\r\no=- {} 1 IN IP4 {}\r\ns=-\r\na=player:{}\r\na=setup:{}\r\nm=application 9 TCP/SNAKE {}\r\n",
            self.session_id,
            self.local_addr.ip(),
            self.local_id,
            setup,
            self.channel_label.as_deref().unwrap_or(shared::GAME_CHANNEL),
        )
    }

    /// Starts dialing once an offer is out and the answer is in. Candidates
    /// known by then are tried first; later ones are fed to the same dialer.
    fn try_dial(&mut self) {
        if self.local_kind != Some(SdpKind::Offer)
            || self.remote_session.is_none()
            || self.dialer.is_some()
        {
            return;
        }
        let Some(outbound) = self.outbound_rx.take() else {
            return;
        };

        // The offerer never accepts.
        self.listener = None;

        let (dialer, candidates) = mpsc::unbounded_channel();
        for addr in &self.candidates {
            let _ = dialer.send(*addr);
        }
        self.dialer = Some(dialer);

        let hello = Hello {
            player: self.local_id.clone(),
            session: self.session_id.clone(),
        };
        self.tasks.push(tokio::spawn(dial(
            hello,
            candidates,
            self.reporter.clone(),
            outbound,
        )));
    }

    fn start_accepting(&mut self) -> Result<(), SessionError> {
        let expected = self
            .remote_session
            .clone()
            .ok_or_else(|| SessionError::InvalidDescription("answer before offer".to_string()))?;
        let (Some(listener), Some(outbound)) = (self.listener.take(), self.outbound_rx.take())
        else {
            return Ok(());
        };
        let reporter = self.reporter.clone();

        self.tasks.push(tokio::spawn(async move {
            let peer = reporter.peer.clone();
            loop {
                let (mut stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        reporter.closed(format!("accept failed: {}", e));
                        return;
                    }
                };

                let hello = match timeout(HELLO_TIMEOUT, read_frame(&mut stream)).await {
                    Ok(Ok(frame)) => serde_json::from_slice::<Hello>(&frame).ok(),
                    Ok(Err(e)) => {
                        debug!("Dropped connection from {}: {}", addr, e);
                        None
                    }
                    Err(_) => None,
                };

                match hello {
                    Some(hello) if hello.player == peer && hello.session == expected => {
                        debug!("Accepted {} from {}", peer, addr);
                        run_channel(stream, reporter, outbound).await;
                        return;
                    }
                    _ => warn!("Rejected unexpected dialer at {} while waiting for {}", addr, peer),
                }
            }
        }));
        Ok(())
    }
}

impl PeerConnection for DirectConnection {
    type Channel = DirectChannel;

    fn create_data_channel(&mut self, label: &str) -> Result<DirectChannel, SessionError> {
        if let Some(existing) = &self.channel_label {
            return Err(SessionError::DuplicateChannel(existing.clone()));
        }
        self.channel_label = Some(label.to_string());
        Ok(DirectChannel {
            label: label.to_string(),
            outbound: self.outbound_tx.clone(),
        })
    }

    fn create_offer(&mut self) -> Result<SessionDescription, SessionError> {
        Ok(SessionDescription::offer(self.describe("active")))
    }

    fn create_answer(&mut self) -> Result<SessionDescription, SessionError> {
        if self.remote_session.is_none() {
            return Err(SessionError::InvalidDescription(
                "cannot answer without a remote offer".to_string(),
            ));
        }
        Ok(SessionDescription::answer(self.describe("passive")))
    }

    fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.local_kind = Some(description.kind);
        match description.kind {
            SdpKind::Offer => self.try_dial(),
            SdpKind::Answer => self.start_accepting()?,
        }
        Ok(())
    }

    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let session = description.session_id().ok_or_else(|| {
            SessionError::InvalidDescription("missing origin session id".to_string())
        })?;
        if let Some(player) = description.attribute("player") {
            if player != self.peer {
                return Err(SessionError::InvalidDescription(format!(
                    "description from {} on the connection to {}",
                    player, self.peer
                )));
            }
        }
        self.remote_session = Some(session.to_string());
        if description.kind == SdpKind::Answer {
            self.try_dial();
        }
        Ok(())
    }

    fn add_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if candidate.protocol().as_deref() != Some("tcp") {
            debug!("Skipping non-TCP candidate for {}: {}", self.peer, candidate.candidate);
            return Ok(());
        }
        let addr = candidate.address().ok_or_else(|| {
            SessionError::InvalidDescription(format!("bad candidate {}", candidate.candidate))
        })?;
        if !self.candidates.contains(&addr) {
            self.candidates.push(addr);
            if let Some(dialer) = &self.dialer {
                let _ = dialer.send(addr);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.listener = None;
        self.outbound_rx = None;
        self.dialer = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Closed connection to {}", self.peer);
    }
}

impl Drop for DirectConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct DirectChannel {
    label: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl DataChannel for DirectChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send(&self, data: Vec<u8>) -> Result<(), SessionError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(SessionError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame too large",
            )));
        }
        self.outbound.send(data).map_err(|_| SessionError::Closed)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    player: PlayerId,
    session: String,
}

/// Tags everything a connection reports with its peer and session serial.
#[derive(Clone)]
struct Reporter {
    peer: PlayerId,
    serial: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Reporter {
    fn candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(SessionEvent::CandidateDiscovered {
            peer: self.peer.clone(),
            serial: self.serial,
            candidate,
        });
    }

    /// False once the event loop is gone.
    fn opened(&self) -> bool {
        self.events
            .send(SessionEvent::ChannelOpened {
                peer: self.peer.clone(),
                serial: self.serial,
            })
            .is_ok()
    }

    fn received(&self, data: Vec<u8>) -> bool {
        self.events
            .send(SessionEvent::MessageReceived {
                peer: self.peer.clone(),
                serial: self.serial,
                data,
            })
            .is_ok()
    }

    fn closed(&self, reason: String) {
        let _ = self.events.send(SessionEvent::ChannelClosed {
            peer: self.peer.clone(),
            serial: self.serial,
            reason,
        });
    }
}

/// Aborts the wrapped task when dropped, so the writer dies with its reader.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Tries candidates in arrival order until one takes the hello frame, or the
/// dial deadline passes.
async fn dial(
    hello: Hello,
    mut candidates: mpsc::UnboundedReceiver<SocketAddr>,
    reporter: Reporter,
    outbound: Outbound,
) {
    let hello = match serde_json::to_vec(&hello) {
        Ok(hello) => hello,
        Err(e) => {
            reporter.closed(format!("hello encoding: {}", e));
            return;
        }
    };
    let deadline = Instant::now() + DIAL_TIMEOUT;

    while let Ok(Some(addr)) = timeout_at(deadline, candidates.recv()).await {
        debug!("Dialing {} at {}", reporter.peer, addr);
        let mut stream = match timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Could not reach {} at {}: {}", reporter.peer, addr, e);
                continue;
            }
            Err(_) => break,
        };
        if let Err(e) = write_frame(&mut stream, &hello).await {
            warn!("Handshake with {} at {} failed: {}", reporter.peer, addr, e);
            continue;
        }
        run_channel(stream, reporter, outbound).await;
        return;
    }
    reporter.closed("no candidate reachable".to_string());
}

async fn run_channel(stream: TcpStream, reporter: Reporter, mut outbound: Outbound) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let writer_peer = reporter.peer.clone();
    let _writer = AbortOnDrop(tokio::spawn(async move {
        while let Some(data) = outbound.recv().await {
            if let Err(e) = write_frame(&mut writer, &data).await {
                warn!("Write to {} failed: {}", writer_peer, e);
                break;
            }
        }
    }));

    if !reporter.opened() {
        return;
    }

    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(data) => {
                if !reporter.received(data) {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break "remote closed".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    reporter.closed(reason);
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
    }
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(data).await?;
    writer.flush().await
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}
