use crate::connection::backoff;
use crate::prelude::*;
use crate::protocol::line::ParsedLine;

use net2::TcpStreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use std::time::Duration;

/// The write half of a framed command-socket connection, held by the pool
/// slot so a writer never has to contend with the reader task for the same
/// handle.
pub type Sink = SplitSink<Framed<TcpStream, LinesCodec>, String>;
/// The read half, owned exclusively by the slot's reader task for its
/// entire lifetime.
pub type Stream = SplitStream<Framed<TcpStream, LinesCodec>>;

/// A single persistent TCP session, framed by newlines, with its own
/// reconnect/backoff state machine. Used for the C-Gate event socket, which
/// is inherently one connection (events are broadcast, not request/response).
/// Grounded on the teacher's `Inverter::start`/`connect`/`receiver` task
/// split, generalized from a binary frame codec to newline-delimited text
/// and from a fixed reconnect delay to the exponential backoff in
/// `connection::backoff`.
pub struct EventConnection {
    host: String,
    port: u16,
    connection_timeout: Duration,
    channels: Channels,
}

impl EventConnection {
    pub fn new(host: String, port: u16, connection_timeout: Duration, channels: Channels) -> Self {
        Self {
            host,
            port,
            connection_timeout,
            channels,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();
        let mut retry_count: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("event connection shutting down");
                    return Ok(());
                }
                result = self.connect_and_run() => {
                    match result {
                        Ok(()) => {
                            info!("event connection closed cleanly, reconnecting");
                            retry_count = 0;
                        }
                        Err(e) => {
                            warn!("event connection error: {}, retrying", e);
                        }
                    }
                }
            }

            let delay = backoff::delay_for_retry(retry_count);
            retry_count = retry_count.saturating_add(1);

            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_and_run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(self.connection_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("single.rs:connect to {} timed out", addr))??;

        stream.set_nodelay(true)?;
        let std_stream = stream.into_std()?;
        std_stream.set_keepalive(Some(Duration::from_secs(60)))?;
        let stream = TcpStream::from_std(std_stream)?;

        info!("event connection established to {}", addr);

        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(8192));
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                line = framed.next() => {
                    match line {
                        Some(Ok(line)) => {
                            let parsed = ParsedLine::parse(&line);
                            if matches!(parsed, ParsedLine::Invalid) {
                                debug!("dropping unparseable event line: {:?}", line);
                                continue;
                            }
                            if self.channels.from_cgate.send(parsed).is_err() {
                                bail!("single.rs:from_cgate channel closed");
                            }
                        }
                        Some(Err(e)) => bail!("single.rs:read error: {}", e),
                        None => bail!("single.rs:event connection EOF"),
                    }
                }
            }
        }
    }
}

/// Opens a freshly-established connection for a pool slot and immediately
/// splits it into its write half (kept by the slot for `execute`/keepalive)
/// and read half (owned exclusively by the slot's reader task), exactly the
/// `Inverter::sender`/`receiver` split this module's connections follow.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<(Sink, Stream)> {
    let addr = format!("{}:{}", host, port);
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow!("single.rs:connect to {} timed out", addr))??;

    stream.set_nodelay(true)?;
    let std_stream = stream.into_std()?;
    std_stream.set_keepalive(Some(Duration::from_secs(60)))?;
    let stream = TcpStream::from_std(std_stream)?;

    let framed = Framed::new(stream, LinesCodec::new_with_max_length(8192));
    Ok(framed.split::<String>())
}

pub async fn write_line(sink: &mut Sink, line: &str) -> Result<()> {
    use futures::SinkExt;
    sink.send(line.to_string()).await.map_err(|e| anyhow!("single.rs:write failed: {}", e))
}
