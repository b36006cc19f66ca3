//! Cloudflare quick-tunnel lifecycle and output scraping
//!
//! Spawns `cloudflared tunnel --url http://localhost:{port}` and watches
//! both of its output streams for the public URL it prints once the tunnel
//! is up. The subprocess keeps running after the URL is found; only the
//! discovery phase ends.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

/// How long to wait for cloudflared to print its URL
pub const URL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunnel executable expected on the system path
const CLOUDFLARED_BIN: &str = "cloudflared";

/// Hostname suffix of Cloudflare quick-tunnel URLs
const TUNNEL_HOST_SUFFIX: &str = ".trycloudflare.com";

/// Result of one tunnel URL resolution attempt
///
/// Produced exactly once per attempt: whichever of URL match, subprocess
/// exit, or timeout happens first wins, and the losing conditions are
/// ignored after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelOutcome {
    /// Public URL scraped from the subprocess output
    Resolved(String),
    /// No URL appeared within the timeout; the subprocess was killed
    TimedOut,
    /// The subprocess exited on its own before printing a URL
    ProcessExited(Option<i32>),
}

/// Check whether cloudflared is installed
///
/// Runs `cloudflared --version` so the caller can print an actionable
/// "not installed" message instead of waiting out a doomed resolution
/// attempt.
pub async fn probe_available() -> bool {
    Command::new(CLOUDFLARED_BIN)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Resolve the public URL of a tunnel to `http://localhost:{port}`
pub async fn resolve_url(port: u16, timeout: Duration) -> crate::Result<TunnelOutcome> {
    let mut command = Command::new(CLOUDFLARED_BIN);
    command.args(["tunnel", "--url", &format!("http://localhost:{}", port)]);
    resolve_from_command(command, timeout).await
}

/// Race URL discovery against subprocess exit and the timeout
///
/// Kept separate from [`resolve_url`] so the scraping logic can be driven
/// by any command that behaves like cloudflared.
async fn resolve_from_command(
    mut command: Command,
    timeout: Duration,
) -> crate::Result<TunnelOutcome> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().ok_or("failed to capture stdout")?;
    let stderr = child.stderr.take().ok_or("failed to capture stderr")?;

    // First writer wins: the channel holds exactly one URL and the receiver
    // stops listening after taking it. The watch flag tells the readers the
    // race is over.
    let (url_tx, mut url_rx) = mpsc::channel::<String>(1);
    let (resolved_tx, resolved_rx) = watch::channel(false);

    tokio::spawn(scan_stream(
        "stdout",
        stdout,
        url_tx.clone(),
        resolved_rx.clone(),
    ));
    tokio::spawn(scan_stream("stderr", stderr, url_tx, resolved_rx));

    let outcome = tokio::select! {
        url = url_rx.recv() => match url {
            Some(url) => {
                let _ = resolved_tx.send(true);
                tracing::info!("tunnel established at {}", url);
                TunnelOutcome::Resolved(url)
            }
            // Both readers ended without a match; the process is done or
            // about to be.
            None => TunnelOutcome::ProcessExited(child.wait().await?.code()),
        },
        status = child.wait() => {
            TunnelOutcome::ProcessExited(status?.code())
        }
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!("no tunnel URL after {:?}, terminating {}", timeout, CLOUDFLARED_BIN);
            child.kill().await?;
            TunnelOutcome::TimedOut
        }
    };

    // A resolved tunnel outlives discovery; hand the child to a reaper so
    // it is waited on whenever it eventually exits.
    if let TunnelOutcome::Resolved(_) = outcome {
        tokio::spawn(async move {
            if let Ok(status) = child.wait().await {
                tracing::warn!("tunnel process exited: {}", status);
            }
        });
    }

    Ok(outcome)
}

/// Read one output stream chunk by chunk, hunting for the tunnel URL
///
/// The URL can straddle chunk boundaries, so chunks accumulate into a
/// buffer that is re-scanned after every read. Once the race is resolved
/// the stream is still drained (a full pipe would stall the tunnel) but
/// accumulation and matching stop. A read error ends only this reader.
async fn scan_stream<R>(
    name: &'static str,
    mut stream: R,
    url_tx: mpsc::Sender<String>,
    resolved_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = String::new();
    let mut chunk = [0u8; 4096];
    let mut matched = false;

    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if matched || *resolved_rx.borrow() {
                    buffer.clear();
                    continue;
                }

                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                if let Some(url) = find_tunnel_url(&buffer) {
                    tracing::debug!("{} produced tunnel URL: {}", name, url);
                    let _ = url_tx.send(url).await;
                    matched = true;
                    buffer.clear();
                }
            }
            Err(e) => {
                tracing::debug!("{} read error: {}", name, e);
                break;
            }
        }
    }
}

/// Scan accumulated output for `https://<label>.trycloudflare.com`
///
/// `<label>` is one or more characters from `[A-Za-z0-9-]`. Matching runs
/// against the whole buffer, so a URL split across reads is found as soon
/// as its tail arrives.
fn find_tunnel_url(buffer: &str) -> Option<String> {
    const SCHEME: &str = "https://";

    let mut search_from = 0;
    while let Some(pos) = buffer[search_from..].find(SCHEME) {
        let label_start = search_from + pos + SCHEME.len();
        let rest = &buffer[label_start..];
        let label_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(rest.len());

        if label_len > 0 && rest[label_len..].starts_with(TUNNEL_HOST_SUFFIX) {
            return Some(format!(
                "https://{}{}",
                &rest[..label_len],
                TUNNEL_HOST_SUFFIX
            ));
        }

        search_from = label_start;
    }

    None
}
