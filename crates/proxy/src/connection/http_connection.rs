use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at};
use tracing::{debug, trace, warn};

use crate::pipeline::{Analysis, process_response, produce_content, run_request_analysers};
use crate::protocol::{Analysers, Buffer, BufferFlags, ProxyError};
use crate::proxy::Proxy;
use crate::session::{ContentProducer, DataSource, Session, StatsFlags};

const DEFAULT_READ_SIZE: usize = 8 * 1024;

/// Drives the analysers of a [`Session`] over asynchronous streams.
///
/// The connection owns the client side streams. Request bytes are read into the session
/// request buffer until the request analysers reach a verdict; response bytes are read
/// from the server stream handed to [`HttpConnection::process_response`] and forwarded to
/// the client once analysed. Replies synthesized by the proxy are written to the client.
///
/// # Type Parameters
///
/// * `R`: the client readable stream
/// * `W`: the client writable stream
pub struct HttpConnection<R, W> {
    reader: R,
    writer: W,
    /// bytes read from the client which did not fit the request buffer yet
    client_pending: BytesMut,
    server_pending: BytesMut,
    producer: Option<Arc<dyn ContentProducer>>,
    server_timeout: Option<Duration>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_capacity(reader, writer, DEFAULT_READ_SIZE)
    }

    pub fn with_capacity(reader: R, writer: W, read_size: usize) -> Self {
        Self {
            reader,
            writer,
            client_pending: BytesMut::with_capacity(read_size),
            server_pending: BytesMut::with_capacity(read_size),
            producer: None,
            server_timeout: None,
        }
    }

    /// Sets the producer of the statistics pages.
    pub fn with_producer(mut self, producer: Arc<dyn ContentProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Bounds the wait for each read of the response head.
    pub fn with_server_timeout(mut self, server_timeout: Duration) -> Self {
        self.server_timeout = Some(server_timeout);
        self
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Reads the request until the request analysers reach a verdict.
    ///
    /// # Returns
    /// - [`Analysis::Forward`] when the request head in `s.req` may be sent to the server
    /// - [`Analysis::Close`] when the proxy answered the request, the reply being written
    ///
    /// # Errors
    /// Fails when the reply cannot be written to the client.
    pub async fn process_request(&mut self, s: &mut Session) -> Result<Analysis, ProxyError> {
        loop {
            match run_request_analysers(s, Instant::now()) {
                Analysis::Pending => {}
                Analysis::Forward => {
                    debug!(session = s.id, backend = %s.be.id, "request ready to forward");
                    return Ok(Analysis::Forward);
                }
                Analysis::Close => {
                    self.produce(s);
                    self.send_reply(s).await?;
                    return Ok(Analysis::Close);
                }
            }

            let deadline = s.req.analyse_exp;
            let read = read_some(&mut self.reader, &mut self.client_pending, &mut s.req);
            let outcome = match deadline {
                Some(exp) => timeout_at(tokio::time::Instant::from_std(exp), read).await.ok(),
                None => Some(read.await),
            };
            match outcome {
                Some(result) => record_read(&mut s.req, result, "client"),
                None => {
                    trace!(session = s.id, "request deadline elapsed");
                    s.req.set_flags(BufferFlags::READ_TIMEOUT);
                }
            }

            // a tarpitted request is never looked at again
            if s.req.analysers.contains(Analysers::REQ_HTTP_TARPIT) {
                s.req.clear();
            }
        }
    }

    /// Reads the response head from `server` until the response analyser reaches a verdict,
    /// forwarding interim responses and finally the analysed head to the client.
    ///
    /// # Errors
    /// Fails when the analysed response or the reply cannot be written to the client.
    pub async fn process_response<S>(&mut self, s: &mut Session, server: &mut S) -> Result<Analysis, ProxyError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            let analysis = process_response(s, Instant::now());
            // interim responses are released as soon as they are analysed
            write_forwarded(&mut self.writer, &mut s.rep).await?;

            match analysis {
                Analysis::Pending => {}
                Analysis::Forward => {
                    let len = s.rep.len();
                    s.rep.forward(len);
                    write_forwarded(&mut self.writer, &mut s.rep).await?;
                    debug!(session = s.id, status = s.txn.status, "response head forwarded");
                    return Ok(Analysis::Forward);
                }
                Analysis::Close => {
                    self.send_reply(s).await?;
                    return Ok(Analysis::Close);
                }
            }

            let read = read_some(server, &mut self.server_pending, &mut s.rep);
            let outcome = match self.server_timeout {
                Some(limit) => timeout(limit, read).await.ok(),
                None => Some(read.await),
            };
            match outcome {
                Some(result) => record_read(&mut s.rep, result, "server"),
                None => s.rep.set_flags(BufferFlags::READ_TIMEOUT),
            }
        }
    }

    fn produce(&self, s: &mut Session) {
        if s.data_source == DataSource::None || s.reply.is_some() {
            return;
        }
        let producer: &dyn ContentProducer = match &self.producer {
            Some(producer) => producer.as_ref(),
            None => &NoContent,
        };
        produce_content(s, producer);
    }

    async fn send_reply(&mut self, s: &Session) -> io::Result<()> {
        let Some(reply) = &s.reply else {
            return Ok(());
        };
        trace!(session = s.id, status = s.txn.status, len = reply.len(), "sending reply");
        self.writer.write_all(reply).await?;
        self.writer.flush().await
    }
}

/// Fails every production, for connections without a producer.
struct NoContent;

impl ContentProducer for NoContent {
    fn produce(&self, _flags: StatsFlags, _proxy: &Proxy) -> Result<Bytes, ProxyError> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no content producer configured").into())
    }
}

/// Moves received bytes into `buf`, reading from `reader` when nothing is pending.
///
/// # Returns
/// `false` once the peer closed its side.
async fn read_some<T>(reader: &mut T, pending: &mut BytesMut, buf: &mut Buffer) -> io::Result<bool>
where
    T: AsyncRead + Unpin,
{
    if pending.is_empty() && reader.read_buf(pending).await? == 0 {
        return Ok(false);
    }
    let accepted = buf.append(pending);
    pending.advance(accepted);
    Ok(true)
}

fn record_read(buf: &mut Buffer, result: io::Result<bool>, peer: &'static str) {
    match result {
        Ok(true) => {}
        Ok(false) => {
            trace!(peer, "peer closed its side");
            buf.set_flags(BufferFlags::SHUTR);
        }
        Err(err) => {
            warn!(peer, error = %err, "read failed");
            buf.set_flags(BufferFlags::READ_ERROR);
        }
    }
}

/// Writes the bytes released by [`Buffer::forward`].
async fn write_forwarded<T>(writer: &mut T, buf: &mut Buffer) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    let out = buf.pending_output();
    if out.is_empty() {
        return Ok(());
    }
    writer.write_all(out).await?;
    let sent = out.len();
    buf.mark_sent(sent);
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Timeouts, UriAuth};
    use crate::session::MockContentProducer;
    use indoc::indoc;

    fn session(fe: Proxy) -> Session {
        Session::new(7, triomphe::Arc::new(fe), "10.0.0.1:4000".parse().unwrap(), Instant::now())
    }

    fn text(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_request_across_reads() {
        let (mut client, proxy_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(proxy_side);
        let mut connection = HttpConnection::with_capacity(reader, writer, 16);
        let mut s = session(Proxy::new("fe"));

        let request = indoc! {"
            GET /index.html HTTP/1.1\r
            Host: example.com\r
            User-Agent: test\r
            \r
        "};
        client.write_all(request.as_bytes()).await.unwrap();

        let analysis = connection.process_request(&mut s).await.unwrap();
        assert_eq!(analysis, Analysis::Forward);
        assert_eq!(s.req.as_bytes(), request.as_bytes());
        assert_eq!(s.txn.hdr_idx.used(), 2);
    }

    #[tokio::test]
    async fn test_truncated_request() {
        let mut connection = HttpConnection::new(&b"GET / HT"[..], Vec::new());
        let mut s = session(Proxy::new("fe"));

        assert_eq!(connection.process_request(&mut s).await.unwrap(), Analysis::Close);
        assert_eq!(s.term.to_string(), "CR");
        let (_, written) = connection.into_parts();
        assert!(text(&written).starts_with("HTTP/1.0 400 Bad request\r\n"));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (_client, proxy_side) = tokio::io::duplex(64);
        let (reader, _) = tokio::io::split(proxy_side);
        let mut connection = HttpConnection::new(reader, Vec::new());
        let fe = Proxy {
            timeouts: Timeouts { http_request: Some(Duration::from_millis(20)), ..Timeouts::default() },
            ..Proxy::new("fe")
        };
        let mut s = session(fe);

        assert_eq!(connection.process_request(&mut s).await.unwrap(), Analysis::Close);
        assert_eq!(s.txn.status, 408);
        let (_, written) = connection.into_parts();
        assert!(text(&written).starts_with("HTTP/1.0 408"));
    }

    #[tokio::test]
    async fn test_tarpit() {
        use crate::proxy::{Action, HdrExp};
        use regex::bytes::Regex;

        let (mut client, proxy_side) = tokio::io::duplex(64);
        let (reader, _) = tokio::io::split(proxy_side);
        let mut connection = HttpConnection::new(reader, Vec::new());
        let fe = Proxy {
            req_exp: vec![HdrExp::new(Regex::new("^GET /admin").unwrap(), Action::Tarpit)],
            timeouts: Timeouts { tarpit: Some(Duration::from_millis(30)), ..Timeouts::default() },
            ..Proxy::new("fe")
        };
        let mut s = session(fe);
        client.write_all(b"GET /admin HTTP/1.0\r\n\r\n").await.unwrap();

        let start = Instant::now();
        assert_eq!(connection.process_request(&mut s).await.unwrap(), Analysis::Close);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(s.term.to_string(), "PT");
        let (_, written) = connection.into_parts();
        assert!(text(&written).starts_with("HTTP/1.0 500"));
    }

    #[tokio::test]
    async fn test_statistics_page() {
        let mut producer = MockContentProducer::new();
        producer
            .expect_produce()
            .times(1)
            .returning(|_, _| Ok(Bytes::from_static(b"HTTP/1.0 200 OK\r\n\r\nstats")));

        let fe = Proxy { uri_auth: Some(UriAuth::new("/stats")), ..Proxy::new("fe") };
        let mut s = session(fe);
        let mut connection =
            HttpConnection::new(&b"GET /stats HTTP/1.0\r\n\r\n"[..], Vec::new()).with_producer(Arc::new(producer));

        assert_eq!(connection.process_request(&mut s).await.unwrap(), Analysis::Close);
        let (_, written) = connection.into_parts();
        assert_eq!(text(&written), "HTTP/1.0 200 OK\r\n\r\nstats");
    }

    #[tokio::test]
    async fn test_statistics_without_producer() {
        let fe = Proxy { uri_auth: Some(UriAuth::new("/stats")), ..Proxy::new("fe") };
        let mut s = session(fe);
        let mut connection = HttpConnection::new(&b"GET /stats HTTP/1.0\r\n\r\n"[..], Vec::new());

        assert_eq!(connection.process_request(&mut s).await.unwrap(), Analysis::Close);
        assert_eq!(s.txn.status, 500);
    }

    #[tokio::test]
    async fn test_response_forwarded() {
        let mut s = session(Proxy::new("fe"));
        s.req.append(b"GET / HTTP/1.1\r\n\r\n");
        let mut connection = HttpConnection::new(&b""[..], Vec::new());
        assert_eq!(connection.process_request(&mut s).await.unwrap(), Analysis::Forward);

        let response = "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let mut server = response.as_bytes();
        assert_eq!(connection.process_response(&mut s, &mut server).await.unwrap(), Analysis::Forward);
        assert_eq!(s.txn.status, 200);

        let (_, written) = connection.into_parts();
        assert_eq!(text(&written), response);
    }

    #[tokio::test]
    async fn test_response_truncated() {
        let mut s = session(Proxy::new("fe"));
        s.req.append(b"GET / HTTP/1.1\r\n\r\n");
        let mut connection = HttpConnection::new(&b""[..], Vec::new());
        connection.process_request(&mut s).await.unwrap();

        let mut server = &b"HTTP/1.1 200 OK\r\nContent-"[..];
        assert_eq!(connection.process_response(&mut s, &mut server).await.unwrap(), Analysis::Close);
        assert_eq!(s.term.to_string(), "SH");
        let (_, written) = connection.into_parts();
        assert!(text(&written).starts_with("HTTP/1.0 502"));
    }

    #[tokio::test]
    async fn test_response_timeout() {
        let mut s = session(Proxy::new("fe"));
        s.req.append(b"GET / HTTP/1.1\r\n\r\n");
        let mut connection =
            HttpConnection::new(&b""[..], Vec::new()).with_server_timeout(Duration::from_millis(10));
        connection.process_request(&mut s).await.unwrap();

        let (_server_end, mut server) = tokio::io::duplex(64);
        assert_eq!(connection.process_response(&mut s, &mut server).await.unwrap(), Analysis::Close);
        assert_eq!(s.txn.status, 504);
        assert_eq!(s.term.to_string(), "sH");
    }
}
