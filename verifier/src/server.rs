use crate::display::{DisplayEvent, DisplayMachine, VerdictDisplay};
use crate::errors::Result;
use std::io;
use std::time::Duration;
use telemetry_protocol::{frame, Verdict, Verifier};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Longest line read from the link, newline included.
pub const MAX_LINE: usize = 1024;

/// Serves verification requests on one connection until it closes.
///
/// Requests are handled strictly one at a time: the dwell is awaited inline,
/// so anything the peer sends meanwhile waits in the socket buffer. Returns
/// the number of requests answered.
pub async fn serve<S, D>(
    stream: S,
    verifier: &Verifier,
    machine: &mut DisplayMachine<D>,
    dwell: Duration,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: VerdictDisplay,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut served = 0;

    loop {
        let verdict = match read_line(&mut reader, &mut buf).await? {
            Line::Eof => return Ok(served),
            Line::Overlong { request: true } => {
                warn!("Request longer than {} bytes, rejecting", MAX_LINE);
                machine.handle(DisplayEvent::RequestReceived);
                Verdict::Invalid
            }
            Line::Overlong { request: false } => {
                warn!("Ignoring overlong line");
                continue;
            }
            Line::Complete => {
                // Bytes that are not UTF-8 cannot carry a valid tag, so a lossy
                // decode keeps them on the Invalid path instead of dropping the link.
                let line = String::from_utf8_lossy(&buf);
                let Some(raw) = frame::decode_request(&line) else {
                    if !line.trim().is_empty() {
                        warn!("Ignoring unexpected line: {:?}", line.trim_end());
                    }
                    continue;
                };
                machine.handle(DisplayEvent::RequestReceived);
                check(verifier, raw)
            }
        };
        machine.handle(DisplayEvent::Verified(verdict));

        writer.write_all(frame::encode_response(verdict).as_bytes()).await?;
        writer.flush().await?;
        served += 1;

        tokio::time::sleep(dwell).await;
        machine.handle(DisplayEvent::DwellElapsed);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    /// `buf` holds one line, or the unterminated tail before EOF.
    Complete,
    /// The line hit [`MAX_LINE`] and the rest of it was discarded.
    Overlong { request: bool },
    Eof,
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader).take(MAX_LINE as u64).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Line::Eof);
    }
    if n < MAX_LINE || buf.ends_with(b"\n") {
        return Ok(Line::Complete);
    }

    let request = buf.starts_with(frame::VERIFY_PREFIX.as_bytes());
    loop {
        buf.clear();
        let n = (&mut *reader).take(MAX_LINE as u64).read_until(b'\n', buf).await?;
        if n == 0 || buf.ends_with(b"\n") {
            break;
        }
    }
    buf.clear();
    Ok(Line::Overlong { request })
}

fn check(verifier: &Verifier, raw: &str) -> Verdict {
    let result = verifier.check(raw);
    match &result {
        Ok(()) => info!("Packet verified for {}", verifier.expected_identity()),
        Err(reason) => warn!(%reason, "Packet rejected"),
    }
    debug!("Checked packet {}", raw);
    result.into()
}
