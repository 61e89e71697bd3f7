//! Status page HTTP responder
//!
//! Every connection gets the same page: read one request line, answer with
//! the current luminosity and close. Any method and target are accepted.

use crate::reading::{Reading, SharedReading};
use crate::state_machine::{ConnectionEvent, ConnectionMachine};
use crate::{BoardError, config};
use core::fmt::{self, Write as _};
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_io_async::{ErrorKind, Read, Write};
use heapless::String;
use log::{debug, info, warn};

const PAGE_CAPACITY: usize = 512;
const HEAD_CAPACITY: usize = 128;

/// Rendered HTML body
pub type StatusPage = String<PAGE_CAPACITY>;

/// First line of an HTTP request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub version: Option<&'a str>,
}

/// How a connection ended when no error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Status page written and flushed
    Served,
    /// Peer closed before completing its request line
    Cancelled,
}

/// Split a request line into method, target and optional version.
///
/// The line may still carry its trailing `\r`.
pub fn parse_request_line(line: &[u8]) -> Result<RequestLine<'_>, BoardError> {
    let line = core::str::from_utf8(line).map_err(|_| BoardError::Protocol)?;
    let mut parts = line.split_ascii_whitespace();

    let method = parts.next().ok_or(BoardError::Protocol)?;
    let target = parts.next().ok_or(BoardError::Protocol)?;
    let version = parts.next();
    if parts.next().is_some() {
        return Err(BoardError::Protocol);
    }

    Ok(RequestLine {
        method,
        target,
        version,
    })
}

/// Board uptime rendered as `H:MM:SS`
#[derive(Debug, Clone, Copy)]
pub struct Uptime(pub Instant);

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(f, "{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}

/// Render the status page for `reading` as seen at `now`
pub fn render_status_page(reading: &Reading, now: Instant) -> Result<StatusPage, BoardError> {
    let mut page = StatusPage::new();
    write!(
        page,
        "<html>\n\
         <head>\n\
         <title>Luminosity Sensor</title>\n\
         <meta http-equiv='refresh' content='{}' />\n\
         </head>\n\
         <body>\n\
         <p><font size='3'>Time: {}</font></p>\n\
         <br/>\n\
         <p><font size='6'>Luminosity: {:.2} lux</font></p>\n\
         <p><font size='2'>Sampled at {}</font></p>\n\
         </body>\n\
         </html>\n",
        config::POLL_INTERVAL_MS / 1000,
        Uptime(now),
        reading.lux,
        Uptime(reading.captured_at),
    )
    .map_err(|_| BoardError::ResponseTooLarge)?;
    Ok(page)
}

fn response_head(content_length: usize) -> Result<String<HEAD_CAPACITY>, BoardError> {
    let mut head = String::new();
    write!(
        head,
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        content_length
    )
    .map_err(|_| BoardError::ResponseTooLarge)?;
    Ok(head)
}

/// Read until the first `\n`. `None` means the peer closed first.
async fn read_request_line<S: Read>(
    socket: &mut S,
    buf: &mut [u8],
) -> Result<Option<usize>, BoardError> {
    let mut filled = 0;
    loop {
        if filled == buf.len() {
            return Err(BoardError::Protocol);
        }

        let n = socket
            .read(&mut buf[filled..])
            .await
            .map_err(BoardError::network)?;
        if n == 0 {
            return Ok(None);
        }

        let start = filled;
        filled += n;
        if let Some(pos) = buf[start..filled].iter().position(|&b| b == b'\n') {
            return Ok(Some(start + pos));
        }
    }
}

async fn write_response<S: Write>(socket: &mut S, body: &str) -> Result<(), BoardError> {
    let head = response_head(body.len())?;
    socket
        .write_all(head.as_bytes())
        .await
        .map_err(BoardError::network)?;
    socket
        .write_all(body.as_bytes())
        .await
        .map_err(BoardError::network)?;
    socket.flush().await.map_err(BoardError::network)
}

/// Handle one accepted connection.
///
/// The caller closes the socket afterwards whatever the result. Nothing is
/// written unless a complete request line was parsed. A peer that has not
/// finished its request line within `HTTP_REQUEST_LINE_TIMEOUT_SECS` is
/// dropped with a `TimedOut` network error.
pub async fn serve_connection<S: Read + Write>(
    socket: &mut S,
    shared: &SharedReading,
) -> Result<ConnectionOutcome, BoardError> {
    let mut machine = ConnectionMachine::new();
    let mut buf = [0u8; config::HTTP_MAX_REQUEST_LINE];

    let deadline = Duration::from_secs(config::HTTP_REQUEST_LINE_TIMEOUT_SECS);
    let line = with_timeout(deadline, read_request_line(socket, &mut buf))
        .await
        .unwrap_or(Err(BoardError::Network(ErrorKind::TimedOut)));

    let line_len = match line {
        Ok(Some(len)) => {
            machine.handle_event(ConnectionEvent::RequestLineComplete);
            len
        }
        Ok(None) => {
            machine.handle_event(ConnectionEvent::PeerClosed);
            return Ok(ConnectionOutcome::Cancelled);
        }
        Err(BoardError::Protocol) => {
            machine.handle_event(ConnectionEvent::RequestRejected);
            return Err(BoardError::Protocol);
        }
        Err(e) => {
            machine.handle_event(ConnectionEvent::Aborted);
            return Err(e);
        }
    };

    let request = match parse_request_line(&buf[..line_len]) {
        Ok(request) => request,
        Err(e) => {
            machine.handle_event(ConnectionEvent::RequestRejected);
            return Err(e);
        }
    };
    machine.handle_event(ConnectionEvent::RequestAccepted);
    debug!("[HTTP] {} {}", request.method, request.target);

    let reading = shared.snapshot();
    let result = match render_status_page(&reading, Instant::now()) {
        Ok(page) => write_response(socket, &page).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            machine.handle_event(ConnectionEvent::ResponseFlushed);
            Ok(ConnectionOutcome::Served)
        }
        Err(e) => {
            machine.handle_event(ConnectionEvent::Aborted);
            Err(e)
        }
    }
}

/// Accept and serve connections on the status port forever
pub async fn run_worker(stack: Stack<'_>, shared: &SharedReading, worker_id: usize) -> ! {
    let mut rx_buf = [0u8; 1024];
    let mut tx_buf = [0u8; 1024];

    info!(
        "[HTTP] Worker {} starting (port={})",
        worker_id,
        config::HTTP_PORT
    );

    loop {
        stack.wait_config_up().await;

        let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(Duration::from_secs(config::HTTP_SOCKET_TIMEOUT_SECS)));

        match socket.accept(config::HTTP_PORT).await {
            Ok(()) => {
                match serve_connection(&mut socket, shared).await {
                    Ok(ConnectionOutcome::Served) => {
                        debug!("[HTTP] Worker {} served status page", worker_id)
                    }
                    Ok(ConnectionOutcome::Cancelled) => {
                        debug!("[HTTP] Worker {} peer left before requesting", worker_id)
                    }
                    Err(e) => warn!("[HTTP] Worker {} connection error: {}", worker_id, e),
                }
                socket.close();
                if let Err(e) = socket.flush().await {
                    debug!("[HTTP] Worker {} close not acknowledged: {:?}", worker_id, e);
                }
            }
            Err(err) => {
                warn!("[HTTP] Worker {} accept error: {:?}", worker_id, err);
                Timer::after(Duration::from_millis(200)).await;
            }
        }

        socket.abort();
    }
}
