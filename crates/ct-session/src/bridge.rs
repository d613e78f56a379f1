//! Terminal bridge
//!
//! Pumps bytes between the local standard streams and a connected
//! duplex channel, and reports local geometry changes to the remote
//! terminal. The pumps and the resize watcher are owned by the bridge
//! and tied to one cancellation token: when either side of the stream
//! ends, every task stops and is joined before `run` returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelReceiver, ChannelSender, DuplexChannel};

/// How often local terminal geometry is polled.
///
/// Polling instead of event-driven notification trades a bounded
/// worst-case latency for portability.
const RESIZE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outbound read-buffer size. Each read returns whatever the OS
/// delivers, down to one byte, and each chunk becomes one frame.
const INPUT_BUFFER_SIZE: usize = 1024;

/// Notice written to local output when the remote stream ends
const SESSION_END_NOTICE: &[u8] = b"\r\nBye.\r\n";

/// Receives local geometry reports
#[async_trait]
pub trait ResizeTarget: Send + Sync {
    async fn resize(&self, cols: u16, rows: u16);
}

/// Probe for the local terminal geometry; `None` when unknown
pub type SizeProbe = fn() -> Option<(u16, u16)>;

/// Default probe backed by the controlling terminal
pub fn local_terminal_size() -> Option<(u16, u16)> {
    crossterm::terminal::size().ok()
}

/// Bridges a connected channel to a pair of local byte streams
pub struct TerminalBridge {
    channel: DuplexChannel,
    resizer: Arc<dyn ResizeTarget>,
    size_probe: SizeProbe,
    poll_interval: Duration,
}

impl TerminalBridge {
    pub fn new(channel: DuplexChannel, resizer: Arc<dyn ResizeTarget>) -> Self {
        Self {
            channel,
            resizer,
            size_probe: local_terminal_size,
            poll_interval: RESIZE_POLL_INTERVAL,
        }
    }

    /// Replace the geometry probe (tests)
    pub fn with_size_probe(mut self, probe: SizeProbe) -> Self {
        self.size_probe = probe;
        self
    }

    /// Replace the resize poll interval (tests)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until local input ends or the remote stream closes.
    ///
    /// Production passes tokio's stdin/stdout; raw-mode toggling of
    /// the TTY is the caller's concern.
    pub async fn run<I, O>(self, input: I, output: O) -> anyhow::Result<()>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = self.channel.into_split();
        let cancel = CancellationToken::new();

        let outbound = tokio::spawn(outbound_pump(sender, input, cancel.clone()));
        let inbound = tokio::spawn(inbound_pump(receiver, output, cancel.clone()));
        let watcher = tokio::spawn(resize_watcher(
            self.resizer,
            self.size_probe,
            self.poll_interval,
            cancel.clone(),
        ));

        let (o, i, w) = tokio::join!(outbound, inbound, watcher);
        o?;
        i?;
        w?;
        Ok(())
    }
}

/// Forward local input to the channel, one frame per OS read
async fn outbound_pump<I>(mut sender: ChannelSender, mut input: I, cancel: CancellationToken)
where
    I: AsyncRead + Unpin,
{
    let mut buf = [0u8; INPUT_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = input.read(&mut buf) => match result {
                Ok(0) => {
                    tracing::debug!("Local input reached EOF");
                    break;
                }
                Ok(n) => {
                    if let Err(e) = sender.send(&buf[..n]).await {
                        tracing::warn!(error = %e, "Failed to forward input");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read local input");
                    break;
                }
            },
        }
    }
    cancel.cancel();
}

/// Drain the inbound queue to local output in arrival order
async fn inbound_pump<O>(mut receiver: ChannelReceiver, mut output: O, cancel: CancellationToken)
where
    O: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = receiver.recv() => match frame {
                Some(data) => {
                    if let Err(e) = output.write_all(&data).await {
                        tracing::warn!(error = %e, "Failed to write output");
                        break;
                    }
                    if let Err(e) = output.flush().await {
                        tracing::warn!(error = %e, "Failed to flush output");
                        break;
                    }
                }
                None => {
                    let _ = output.write_all(SESSION_END_NOTICE).await;
                    let _ = output.flush().await;
                    break;
                }
            },
        }
    }
    cancel.cancel();
}

/// Poll local geometry and report changes. The first successful poll
/// always reports, correcting the fixed geometry used at negotiation.
async fn resize_watcher(
    resizer: Arc<dyn ResizeTarget>,
    probe: SizeProbe,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut last: Option<(u16, u16)> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if let Some(size) = probe() {
                    if last != Some(size) {
                        last = Some(size);
                        resizer.resize(size.0, size.1).await;
                    }
                }
            }
        }
    }
}
