//! Sockets. Accepts connections, reads and writes bytes, and reports
//! everything that happens as [`TransportEvent`]s.

use crate::{
    config::ReqLimits,
    errors::{ErrorKind, StartError},
    server::connection::{ConnectionId, Outgoing, TransportEvent},
    Version,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    runtime::Runtime,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::timeout,
};
use tokio_rustls::TlsAcceptor;

const BACKLOG: i32 = 1024;
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug)]
enum Command {
    Send { bytes: Vec<u8>, close: bool },
}

/// Per-connection socket deadlines.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeouts {
    pub(crate) read: Duration,
    pub(crate) write: Duration,
}

impl Timeouts {
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Timeouts {
            read: limits.socket_read_timeout,
            write: limits.socket_write_timeout,
        }
    }
}

#[derive(Debug)]
enum Signal {
    Link(ConnectionId, UnboundedSender<Command>),
    Event(TransportEvent),
}

/// The listening side of a running server.
///
/// Tasks live on the runtime passed to [`bind`](Self::bind) and only make
/// progress while that runtime is driven.
pub(crate) struct Transport {
    signals: UnboundedReceiver<Signal>,
    links: HashMap<ConnectionId, UnboundedSender<Command>>,
    local_addr: SocketAddr,
    active: Arc<AtomicUsize>,
}

impl Transport {
    pub(crate) fn bind(
        addr: SocketAddr,
        runtime: &Runtime,
        tls: Option<TlsAcceptor>,
        timeouts: Timeouts,
        allow_multiple_clients: bool,
    ) -> Result<Self, StartError> {
        let bind_error = |source| StartError::Bind { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_error)?;
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;
        socket.bind(&addr.into()).map_err(bind_error)?;
        socket.listen(BACKLOG).map_err(bind_error)?;

        let listener: std::net::TcpListener = socket.into();
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener).map_err(bind_error)?
        };

        let (sender, signals) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicUsize::new(0));
        let acceptor = Acceptor {
            listener,
            tls,
            timeouts,
            allow_multiple_clients,
            active: active.clone(),
            signals: sender,
        };
        runtime.spawn(acceptor.run());

        Ok(Transport {
            signals,
            links: HashMap::new(),
            local_addr,
            active,
        })
    }

    /// Waits for the next event. Cancel safe.
    pub(crate) async fn next(&mut self) -> Option<TransportEvent> {
        loop {
            match self.signals.recv().await? {
                Signal::Link(id, link) => {
                    self.links.insert(id, link);
                }
                Signal::Event(event) => {
                    if let TransportEvent::Closed { id } | TransportEvent::Failed { id, .. } = &event
                    {
                        self.links.remove(id);
                    }
                    return Some(event);
                }
            }
        }
    }

    /// Hands a finalized response to its connection. Dropped silently if
    /// the connection is already gone.
    pub(crate) fn send(&mut self, outgoing: Outgoing) {
        let Outgoing { id, bytes, close } = outgoing;

        let Some(link) = self.links.get(&id) else {
            return;
        };
        if link.send(Command::Send { bytes, close }).is_err() {
            self.links.remove(&id);
        }
    }

    #[inline]
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently open, including ones still in the TLS handshake.
    #[inline]
    pub(crate) fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

struct Acceptor {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    timeouts: Timeouts,
    allow_multiple_clients: bool,
    active: Arc<AtomicUsize>,
    signals: UnboundedSender<Signal>,
}

impl Acceptor {
    async fn run(self) {
        let mut next_id = 0u64;

        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if !self.allow_multiple_clients && self.active.load(Ordering::Acquire) > 0 {
                tracing::debug!(%remote, "refusing second client");
                tokio::spawn(refuse(stream));
                continue;
            }

            next_id += 1;
            let id = ConnectionId(next_id);
            let guard = Active::new(&self.active);

            tokio::spawn(serve(
                id,
                stream,
                remote,
                self.tls.clone(),
                self.timeouts,
                self.signals.clone(),
                guard,
            ));
        }
    }
}

/// Counts an open connection until dropped.
struct Active(Arc<AtomicUsize>);

impl Active {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Active(counter.clone())
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn refuse(mut stream: TcpStream) {
    // Drain what the client already sent so closing does not reset the socket
    let mut scratch = [0u8; 1024];
    let _ = timeout(Duration::from_millis(100), stream.read(&mut scratch)).await;

    let _ = stream
        .write_all(&ErrorKind::ServiceUnavailable.to_wire(Version::Http11))
        .await;
    let _ = stream.shutdown().await;
}

async fn serve(
    id: ConnectionId,
    stream: TcpStream,
    remote: SocketAddr,
    tls: Option<TlsAcceptor>,
    timeouts: Timeouts,
    signals: UnboundedSender<Signal>,
    _active: Active,
) {
    let _ = stream.set_nodelay(true);
    let Ok(local) = stream.local_addr() else {
        return;
    };

    match tls {
        Some(acceptor) => match timeout(timeouts.read, acceptor.accept(stream)).await {
            Ok(Ok(stream)) => pump(id, stream, remote, local, timeouts, signals).await,
            Ok(Err(err)) => tracing::warn!(%id, %remote, %err, "TLS handshake failed"),
            Err(_) => tracing::warn!(%id, %remote, "TLS handshake timed out"),
        },
        None => pump(id, stream, remote, local, timeouts, signals).await,
    }
}

/// Moves bytes between one socket and the event loop until either side
/// ends the connection.
///
/// A peer that shuts down its sending half still gets the responses it is
/// owed; the event loop decides when to close.
async fn pump<S>(
    id: ConnectionId,
    stream: S,
    remote: SocketAddr,
    local: SocketAddr,
    timeouts: Timeouts,
    signals: UnboundedSender<Signal>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (link, mut commands) = mpsc::unbounded_channel();
    if signals.send(Signal::Link(id, link)).is_err() {
        return;
    }
    let emit = |event| signals.send(Signal::Event(event)).is_ok();
    if !emit(TransportEvent::Opened { id, remote, local }) {
        return;
    }

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut reading = true;

    loop {
        tokio::select! {
            read = timeout(timeouts.read, reader.read(&mut buf)), if reading => {
                let event = match read {
                    Ok(Ok(0)) => {
                        reading = false;
                        TransportEvent::Hangup { id }
                    }
                    Ok(Ok(n)) => TransportEvent::Data { id, bytes: buf[..n].to_vec() },
                    Ok(Err(error)) => TransportEvent::Failed { id, error },
                    Err(_) => TransportEvent::Failed { id, error: timed_out("read") },
                };
                let failed = matches!(event, TransportEvent::Failed { .. });

                if !emit(event) || failed {
                    return;
                }
            }
            command = commands.recv() => {
                let Some(Command::Send { bytes, close }) = command else {
                    return;
                };

                let written = timeout(timeouts.write, async {
                    writer.write_all(&bytes).await?;
                    writer.flush().await
                })
                .await
                .unwrap_or_else(|_| Err(timed_out("write")));

                if let Err(error) = written {
                    emit(TransportEvent::Failed { id, error });
                    return;
                }
                emit(TransportEvent::Flushed { id });

                if close {
                    let _ = timeout(timeouts.write, writer.shutdown()).await;
                    emit(TransportEvent::Closed { id });
                    return;
                }
            }
        }
    }
}

fn timed_out(op: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("socket {op} timed out"))
}
