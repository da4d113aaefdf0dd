//! Per-connection lifecycle: turns transport events into requests and
//! finished responses.

use crate::{
    errors::ErrorKind,
    http::{
        request::{ParseLimits, Parser, Request},
        response::Response,
        types::{Method, Version},
    },
};
use std::{collections::HashMap, fmt, io, net::SocketAddr, sync::Arc};

/// Transport-assigned connection handle. Monotonic, never reused while the
/// server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Raw events delivered by the transport.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Opened {
        id: ConnectionId,
        remote: SocketAddr,
        local: SocketAddr,
    },
    Data {
        id: ConnectionId,
        bytes: Vec<u8>,
    },
    /// The peer shut down its sending half. Owed responses can still be
    /// written.
    Hangup {
        id: ConnectionId,
    },
    /// Everything handed over with the last [`Outgoing`] reached the socket.
    Flushed {
        id: ConnectionId,
    },
    Closed {
        id: ConnectionId,
    },
    Failed {
        id: ConnectionId,
        error: io::Error,
    },
}

/// A finalized response for the transport to write.
#[derive(Debug, PartialEq)]
pub(crate) struct Outgoing {
    pub(crate) id: ConnectionId,
    pub(crate) bytes: Vec<u8>,
    /// Close the connection once the bytes are written.
    pub(crate) close: bool,
}

/// Whatever turns a complete request into a response.
pub(crate) trait Dispatch {
    fn dispatch(&mut self, request: &Request, response: &mut Response);
}

/// `Idle` is the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Receiving,
    Ready,
    Dispatching,
    Responding,
    Closed,
}

#[derive(Debug)]
struct ConnectionRecord {
    state: ConnectionState,
    parser: Parser,
    remote: SocketAddr,
    local: SocketAddr,
    in_flight: Option<Request>,
    close_after_flush: bool,
    peer_done: bool,
}

impl ConnectionRecord {
    #[inline]
    fn enter(&mut self, id: ConnectionId, state: ConnectionState) {
        tracing::trace!(%id, from = ?self.state, to = ?state, "connection state");
        self.state = state;
    }
}

/// Every open connection, keyed by its handle.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    records: HashMap<ConnectionId, ConnectionRecord>,
    limits: Arc<ParseLimits>,
    extra_headers: Vec<(String, String)>,
}

impl Lifecycle {
    pub(crate) fn new(limits: ParseLimits, extra_headers: Vec<(String, String)>) -> Self {
        Lifecycle {
            records: HashMap::new(),
            limits: Arc::new(limits),
            extra_headers,
        }
    }

    /// Advances the connection `event` belongs to. Returns the response to
    /// write, if the event completed one.
    ///
    /// Events for handles without a record are ignored.
    pub(crate) fn handle<D: Dispatch>(
        &mut self,
        event: TransportEvent,
        dispatcher: &mut D,
    ) -> Option<Outgoing> {
        match event {
            TransportEvent::Opened { id, remote, local } => {
                tracing::debug!(%id, %remote, "connection opened");
                self.records.insert(
                    id,
                    ConnectionRecord {
                        state: ConnectionState::Receiving,
                        parser: Parser::new(self.limits.clone()),
                        remote,
                        local,
                        in_flight: None,
                        close_after_flush: false,
                        peer_done: false,
                    },
                );
                None
            }
            TransportEvent::Data { id, bytes } => {
                let record = self.records.get_mut(&id)?;

                match record.state {
                    // Input after an error or a 413 is never buffered
                    ConnectionState::Responding if record.close_after_flush => None,
                    ConnectionState::Responding => {
                        record.parser.feed(&bytes);
                        None
                    }
                    ConnectionState::Receiving => {
                        record.parser.feed(&bytes);
                        Self::advance(id, record, &self.extra_headers, dispatcher)
                    }
                    _ => None,
                }
            }
            TransportEvent::Flushed { id } => {
                let record = self.records.get_mut(&id)?;
                if record.state != ConnectionState::Responding {
                    return None;
                }

                record.in_flight = None;
                if record.close_after_flush {
                    record.enter(id, ConnectionState::Closed);
                    self.discard(id);
                    return None;
                }

                record.enter(id, ConnectionState::Receiving);
                let outgoing = Self::advance(id, record, &self.extra_headers, dispatcher);
                if outgoing.is_none() && record.peer_done {
                    record.enter(id, ConnectionState::Closed);
                    self.discard(id);
                    return Some(Self::hang_up(id));
                }
                outgoing
            }
            TransportEvent::Hangup { id } => {
                let record = self.records.get_mut(&id)?;
                record.peer_done = true;
                if record.state == ConnectionState::Responding {
                    return None;
                }

                // Every complete request was answered; a partial one never will be
                tracing::debug!(%id, "peer finished sending");
                record.enter(id, ConnectionState::Closed);
                self.discard(id);
                Some(Self::hang_up(id))
            }
            TransportEvent::Closed { id } => {
                if self.discard(id) {
                    tracing::debug!(%id, "connection closed by peer");
                }
                None
            }
            TransportEvent::Failed { id, error } => {
                if self.discard(id) {
                    tracing::debug!(%id, %error, "connection failed");
                }
                None
            }
        }
    }

    fn advance<D: Dispatch>(
        id: ConnectionId,
        record: &mut ConnectionRecord,
        extra_headers: &[(String, String)],
        dispatcher: &mut D,
    ) -> Option<Outgoing> {
        let mut request = match record.parser.advance() {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(err) => return Some(Self::reject(id, record, err, extra_headers)),
        };
        request.client_addr = record.remote;
        request.server_addr = record.local;

        record.enter(id, ConnectionState::Ready);
        let mut response = Response::new();

        record.enter(id, ConnectionState::Dispatching);
        dispatcher.dispatch(&request, &mut response);

        let finalized = response.finalize(
            request.version(),
            request.is_keep_alive(),
            extra_headers,
            request.method() == Method::Head,
        );

        record.in_flight = Some(request);
        record.close_after_flush = !finalized.keep_alive;
        record.enter(id, ConnectionState::Responding);

        Some(Outgoing {
            id,
            bytes: finalized.bytes,
            close: !finalized.keep_alive,
        })
    }

    fn reject(
        id: ConnectionId,
        record: &mut ConnectionRecord,
        err: ErrorKind,
        extra_headers: &[(String, String)],
    ) -> Outgoing {
        tracing::debug!(%id, remote = %record.remote, %err, "rejecting request");

        let mut response = Response::new();
        err.render(&mut response);
        let finalized = response.finalize(Version::Http11, false, extra_headers, false);

        record.parser.reset();
        record.close_after_flush = true;
        record.enter(id, ConnectionState::Responding);

        Outgoing {
            id,
            bytes: finalized.bytes,
            close: true,
        }
    }

    /// Closes without writing anything more.
    fn hang_up(id: ConnectionId) -> Outgoing {
        Outgoing {
            id,
            bytes: Vec::new(),
            close: true,
        }
    }

    fn discard(&mut self, id: ConnectionId) -> bool {
        self.records.remove(&id).is_some()
    }

    #[cfg(test)]
    fn contains(&self, id: ConnectionId) -> bool {
        self.records.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.records.get(&id).map(|record| record.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ServerConfig, StatusCode};

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl Dispatch for Recorder {
        fn dispatch(&mut self, request: &Request, response: &mut Response) {
            self.seen.push(format!("{} {}", request.method(), request.path()));
            match request.path() {
                "/close" => response.close().body("bye"),
                "/peer" => response.body(request.client_addr().to_string()),
                "/upload" => response.body(request.body().len()),
                _ => response.status(StatusCode::Ok).body("ok"),
            };
        }
    }

    const ID: ConnectionId = ConnectionId(7);

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(
            ParseLimits {
                upload_size_limit: 16,
                ..ParseLimits::new(&ServerConfig::default())
            },
            vec![("X-Served-By".into(), "embed_web".into())],
        )
    }

    fn open(lifecycle: &mut Lifecycle, recorder: &mut Recorder) {
        let event = TransportEvent::Opened {
            id: ID,
            remote: "192.0.2.1:5555".parse().unwrap(),
            local: "127.0.0.1:8080".parse().unwrap(),
        };
        assert_eq!(lifecycle.handle(event, recorder), None);
        assert_eq!(lifecycle.state(ID), Some(ConnectionState::Receiving));
    }

    fn data(bytes: &str) -> TransportEvent {
        TransportEvent::Data {
            id: ID,
            bytes: bytes.as_bytes().to_vec(),
        }
    }

    fn text(outgoing: &Outgoing) -> &str {
        std::str::from_utf8(&outgoing.bytes).unwrap()
    }

    #[test]
    fn keep_alive_round_trip() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        assert_eq!(lifecycle.handle(data("GET /peer HTTP/1.1\r\n"), &mut recorder), None);
        assert_eq!(lifecycle.state(ID), Some(ConnectionState::Receiving));

        let out = lifecycle.handle(data("\r\n"), &mut recorder).unwrap();
        assert!(!out.close);
        assert_eq!(
            text(&out),
            "HTTP/1.1 200 OK\r\nX-Served-By: embed_web\r\ncontent-length: 14\r\n\r\n192.0.2.1:5555"
        );
        assert_eq!(lifecycle.state(ID), Some(ConnectionState::Responding));

        assert_eq!(lifecycle.handle(TransportEvent::Flushed { id: ID }, &mut recorder), None);
        assert_eq!(lifecycle.state(ID), Some(ConnectionState::Receiving));
    }

    #[test]
    fn close_after_flush() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        let out = lifecycle
            .handle(data("GET /close HTTP/1.1\r\n\r\n"), &mut recorder)
            .unwrap();
        assert!(out.close);
        assert!(text(&out).contains("connection: close\r\n"));

        lifecycle.handle(TransportEvent::Flushed { id: ID }, &mut recorder);
        assert!(!lifecycle.contains(ID));
        assert_eq!(lifecycle.len(), 0);
    }

    #[test]
    fn http10_closes_by_default() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        let out = lifecycle
            .handle(data("GET / HTTP/1.0\r\n\r\n"), &mut recorder)
            .unwrap();
        assert!(out.close);
        assert!(text(&out).starts_with("HTTP/1.0 200 OK\r\n"));
    }

    #[test]
    fn one_request_in_flight() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        let out = lifecycle.handle(
            data("GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n"),
            &mut recorder,
        );
        assert!(out.is_some());
        assert_eq!(recorder.seen, ["GET /one"]);

        // queued while responding
        assert_eq!(
            lifecycle.handle(data("HEAD /three HTTP/1.1\r\n\r\n"), &mut recorder),
            None
        );
        assert_eq!(recorder.seen, ["GET /one"]);

        assert!(lifecycle
            .handle(TransportEvent::Flushed { id: ID }, &mut recorder)
            .is_some());
        assert_eq!(recorder.seen, ["GET /one", "GET /two"]);

        let out = lifecycle
            .handle(TransportEvent::Flushed { id: ID }, &mut recorder)
            .unwrap();
        assert_eq!(recorder.seen, ["GET /one", "GET /two", "HEAD /three"]);
        assert!(text(&out).ends_with("content-length: 2\r\n\r\n"));
    }

    #[test]
    fn oversized_body_never_dispatches() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        let out = lifecycle
            .handle(
                data("POST /upload HTTP/1.1\r\nContent-Length: 17\r\n\r\n0123"),
                &mut recorder,
            )
            .unwrap();

        assert!(out.close);
        assert!(text(&out).starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(text(&out).ends_with(ErrorKind::BodyTooLarge.json()));
        assert!(recorder.seen.is_empty());

        assert_eq!(lifecycle.handle(data("4567890123456"), &mut recorder), None);
        lifecycle.handle(TransportEvent::Flushed { id: ID }, &mut recorder);
        assert!(!lifecycle.contains(ID));
    }

    #[test]
    fn body_within_limit() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        let out = lifecycle
            .handle(
                data("POST /upload HTTP/1.1\r\nContent-Length: 16\r\n\r\n0123456789abcdef"),
                &mut recorder,
            )
            .unwrap();
        assert!(text(&out).ends_with("\r\n\r\n16"));
    }

    #[test]
    fn malformed_request_is_answered_then_closed() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        let out = lifecycle
            .handle(data("BREW /pot HTTP/1.1\r\n\r\n"), &mut recorder)
            .unwrap();
        assert!(out.close);
        assert!(text(&out).starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text(&out).ends_with(ErrorKind::InvalidMethod.json()));
        assert!(recorder.seen.is_empty());
    }

    #[test]
    fn half_closed_peer_is_answered_first() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        let out = lifecycle
            .handle(
                data("GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n"),
                &mut recorder,
            )
            .unwrap();
        assert!(!out.close);

        assert_eq!(lifecycle.handle(TransportEvent::Hangup { id: ID }, &mut recorder), None);
        assert_eq!(lifecycle.state(ID), Some(ConnectionState::Responding));

        let out = lifecycle
            .handle(TransportEvent::Flushed { id: ID }, &mut recorder)
            .unwrap();
        assert!(text(&out).ends_with("\r\n\r\nok"));
        assert_eq!(recorder.seen, ["GET /one", "GET /two"]);

        let last = lifecycle
            .handle(TransportEvent::Flushed { id: ID }, &mut recorder)
            .unwrap();
        assert_eq!(last, Lifecycle::hang_up(ID));
        assert!(!lifecycle.contains(ID));
    }

    #[test]
    fn half_closed_mid_request() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());
        open(&mut lifecycle, &mut recorder);

        assert_eq!(lifecycle.handle(data("GET /one HTTP/1.1\r\n"), &mut recorder), None);
        let out = lifecycle
            .handle(TransportEvent::Hangup { id: ID }, &mut recorder)
            .unwrap();

        assert!(out.close);
        assert!(out.bytes.is_empty());
        assert!(recorder.seen.is_empty());
        assert!(!lifecycle.contains(ID));
    }

    #[test]
    fn closed_and_failed_discard_records() {
        let (mut lifecycle, mut recorder) = (lifecycle(), Recorder::default());

        // nothing happens for handles that were never opened
        assert_eq!(lifecycle.handle(data("GET / HTTP/1.1\r\n\r\n"), &mut recorder), None);
        assert_eq!(lifecycle.handle(TransportEvent::Flushed { id: ID }, &mut recorder), None);
        assert!(recorder.seen.is_empty());

        open(&mut lifecycle, &mut recorder);
        lifecycle.handle(data("GET / HTTP/1.1\r\n\r\n"), &mut recorder);
        lifecycle.handle(TransportEvent::Closed { id: ID }, &mut recorder);
        assert!(!lifecycle.contains(ID));
        assert_eq!(lifecycle.handle(TransportEvent::Flushed { id: ID }, &mut recorder), None);

        open(&mut lifecycle, &mut recorder);
        let error = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        lifecycle.handle(TransportEvent::Failed { id: ID, error }, &mut recorder);
        assert!(!lifecycle.contains(ID));
    }
}
