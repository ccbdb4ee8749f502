use crate::errors::Result;
use crate::model::VerifyRequest;
use crate::orchestrator::RelayHandle;
use std::io;
use telemetry_protocol::{frame, Backoff, Verdict};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a link session ended.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkEnd {
    PeerClosed,
    RelayStopped,
}

/// Keeps a connection to the verifier, reconnecting forever.
///
/// Each connection gets a new generation number. Requests dispatched for an
/// older generation are discarded, so a verdict can only ever answer a
/// request the orchestrator still considers in flight.
pub async fn run_link(
    addr: String,
    relay: RelayHandle,
    mut requests: mpsc::Receiver<VerifyRequest>,
    mut backoff: impl Backoff,
) {
    let mut generation = 0;

    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                generation += 1;
                backoff.reset();
                info!("Connected to verifier at {}", addr);

                if relay.link_up(generation).await.is_err() {
                    return;
                }

                let end = session(stream, generation, &relay, &mut requests).await;
                if relay.link_down().await.is_err() {
                    return;
                }
                match end {
                    Ok(LinkEnd::RelayStopped) => return,
                    Ok(LinkEnd::PeerClosed) => warn!("Verifier closed the link"),
                    Err(e) => warn!("Verifier link failed: {}", e),
                }
            }
            Err(e) => debug!("Verifier at {} unreachable: {}", addr, e),
        }

        let delay = backoff.next_delay();
        debug!("Reconnecting to verifier in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

/// Runs one connection: one request in flight, answered before the next is
/// written.
pub async fn session<S>(
    stream: S,
    generation: u64,
    relay: &RelayHandle,
    requests: &mut mpsc::Receiver<VerifyRequest>,
) -> Result<LinkEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    return Ok(LinkEnd::RelayStopped);
                };
                if request.generation != generation {
                    debug!("Dropping request from link generation {}", request.generation);
                    continue;
                }

                writer.write_all(frame::encode_request(&request.raw).as_bytes()).await?;
                writer.flush().await?;

                let Some(verdict) = read_verdict(&mut reader, &mut buf).await? else {
                    return Ok(LinkEnd::PeerClosed);
                };
                debug!("Verifier answered {}", verdict);
                if relay.report_verdict(verdict).await.is_err() {
                    return Ok(LinkEnd::RelayStopped);
                }
            }
            // Watch the link while idle so a closed peer is noticed early.
            line = next_line(&mut reader, &mut buf) => {
                match line? {
                    Some(line) => debug!("Verifier output: {}", line.trim_end()),
                    None => return Ok(LinkEnd::PeerClosed),
                }
            }
        }
    }
}

/// Skips device chatter until an `AUTH_RESULT` line. `None` on EOF.
async fn read_verdict<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<Verdict>>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = next_line(reader, buf).await? {
        match frame::decode_response(&line) {
            Some(verdict) => return Ok(Some(verdict)),
            None => debug!("Verifier output: {}", line.trim_end()),
        }
    }
    Ok(None)
}

/// `read_until` keeps partial input in `buf`, so this is safe to cancel and
/// call again.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    reader.read_until(b'\n', buf).await?;
    if buf.is_empty() {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{channel, Command};
    use tokio::io::{duplex, AsyncReadExt};

    fn request(generation: u64, raw: &str) -> VerifyRequest {
        VerifyRequest {
            generation,
            raw: raw.to_string(),
        }
    }

    #[tokio::test]
    async fn test_session_exchanges_one_request_at_a_time() {
        let (relay, mut commands) = channel(8);
        let (tx, mut rx) = mpsc::channel(4);
        let (client, mut device) = duplex(1024);

        tx.send(request(1, "VIN:A|SIG:00")).await.unwrap();
        tx.send(request(1, "VIN:B|SIG:00")).await.unwrap();

        let link = tokio::spawn(async move { session(client, 1, &relay, &mut rx).await });

        let mut reader = BufReader::new(&mut device);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "VERIFY:VIN:A|SIG:00\n");

        reader.get_mut().write_all(b"booting...\nAUTH_RESULT:VALID\r\n").await.unwrap();
        match commands.recv().await.unwrap() {
            Command::Verdict(v) => assert_eq!(v, Verdict::Valid),
            other => panic!("unexpected {:?}", other),
        }

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "VERIFY:VIN:B|SIG:00\n");
        reader.get_mut().write_all(b"AUTH_RESULT:INVALID\n").await.unwrap();
        match commands.recv().await.unwrap() {
            Command::Verdict(v) => assert_eq!(v, Verdict::Invalid),
            other => panic!("unexpected {:?}", other),
        }

        drop(tx);
        assert_eq!(link.await.unwrap().unwrap(), LinkEnd::RelayStopped);
    }

    #[tokio::test]
    async fn test_session_drops_stale_generation() {
        let (relay, _commands) = channel(8);
        let (tx, mut rx) = mpsc::channel(4);
        let (client, mut device) = duplex(1024);

        tx.send(request(1, "old")).await.unwrap();
        tx.send(request(2, "new")).await.unwrap();
        drop(tx);

        let link = tokio::spawn(async move { session(client, 2, &relay, &mut rx).await });

        let mut line = String::new();
        let mut reader = BufReader::new(&mut device);
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "VERIFY:new\n");
        reader.get_mut().write_all(b"AUTH_RESULT:VALID\n").await.unwrap();

        assert_eq!(link.await.unwrap().unwrap(), LinkEnd::RelayStopped);
    }

    #[tokio::test]
    async fn test_session_reports_peer_close() {
        let (relay, _commands) = channel(8);
        let (_tx, mut rx) = mpsc::channel::<VerifyRequest>(4);
        let (client, device) = duplex(1024);

        drop(device);
        let end = session(client, 1, &relay, &mut rx).await.unwrap();
        assert_eq!(end, LinkEnd::PeerClosed);
    }

    #[tokio::test]
    async fn test_peer_close_mid_request() {
        let (relay, _commands) = channel(8);
        let (tx, mut rx) = mpsc::channel(4);
        let (client, mut device) = duplex(1024);
        tx.send(request(1, "VIN:A|SIG:00")).await.unwrap();

        let link = tokio::spawn(async move { session(client, 1, &relay, &mut rx).await });

        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        assert!(n > 0);
        drop(device);

        assert_eq!(link.await.unwrap().unwrap(), LinkEnd::PeerClosed);
    }
}
