//! dropshare - share one local file over HTTP at an unguessable path
//!
//! Binds a local HTTP server that serves a single file under a random
//! access token and, with `--tunnel`, exposes it publicly through a
//! Cloudflare quick tunnel.

use clap::Parser;
use fileserver::{
    generate_access_token, FileServer, ServedFile, ServerState, TunnelOutcome, URL_TIMEOUT,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const CLOUDFLARED_INSTALL_URL: &str =
    "https://developers.cloudflare.com/cloudflare-one/connections/connect-apps/install-and-setup/installation/";

#[derive(Parser)]
#[command(name = "dropshare")]
#[command(about = "Share a single file over HTTP at a randomized path")]
#[command(version)]
struct Cli {
    /// File to share
    file: PathBuf,

    /// Port to serve on
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Expose the server publicly through a Cloudflare quick tunnel
    #[arg(short, long)]
    tunnel: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let file = match served_file_from_path(&cli.file) {
        Ok(file) => file,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(1);
        }
    };
    let name = file.name.clone();
    let token = file.token.clone();

    let server = FileServer::new(ServerState::new(file));
    let listener = match server.bind(cli.port).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind port {}: {}", cli.port, e);
            std::process::exit(1);
        }
    };

    println!(
        "Serving {} at http://localhost:{}/{}",
        name, cli.port, token
    );

    let serve_task = tokio::spawn(server.serve(listener));

    if cli.tunnel {
        start_tunnel(cli.port, &token).await;
    }

    tokio::select! {
        result = serve_task => {
            if let Ok(Err(e)) = result {
                eprintln!("server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nshutting down");
        }
    }
}

/// Initialize the tracing subscriber, honoring RUST_LOG when set
fn init_logging(debug: bool) {
    let default_filter = if debug {
        "dropshare=debug,fileserver=debug"
    } else {
        "dropshare=info,fileserver=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Validate the shared file and capture its metadata
fn served_file_from_path(path: &Path) -> Result<ServedFile, String> {
    let path = path
        .canonicalize()
        .map_err(|e| format!("cannot access {}: {}", path.display(), e))?;
    let metadata =
        std::fs::metadata(&path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    if !metadata.is_file() {
        return Err(format!("{} is not a regular file", path.display()));
    }

    Ok(ServedFile::new(
        path,
        metadata.len(),
        generate_access_token(),
    ))
}

/// Bring up the quick tunnel and report the public URLs
///
/// A missing cloudflared binary is fatal here because the user explicitly
/// asked for a tunnel. Timeouts and early exits are not: they are reported
/// and local serving continues.
async fn start_tunnel(port: u16, token: &str) {
    if !fileserver::probe_available().await {
        eprintln!(
            "cloudflared not found on this system. Install it from {}",
            CLOUDFLARED_INSTALL_URL
        );
        std::process::exit(1);
    }

    match fileserver::resolve_url(port, URL_TIMEOUT).await {
        Ok(TunnelOutcome::Resolved(url)) => {
            println!("Public URL: {}/{}", url, token);
            println!("Direct download: {}/download/{}", url, token);
        }
        Ok(TunnelOutcome::TimedOut) => {
            tracing::warn!(
                "tunnel produced no URL within {:?}; serving locally only",
                URL_TIMEOUT
            );
        }
        Ok(TunnelOutcome::ProcessExited(code)) => {
            tracing::warn!(
                "cloudflared exited before the tunnel came up (status {:?}); serving locally only",
                code
            );
        }
        Err(e) => {
            tracing::warn!("could not start tunnel: {}; serving locally only", e);
        }
    }
}
