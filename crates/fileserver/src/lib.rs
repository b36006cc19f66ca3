//! HTTP server for sharing a single local file
//!
//! This crate provides an HTTP server that serves one file under a random
//! access token, counts requesting clients, and can expose the server
//! publicly through a Cloudflare quick tunnel.

mod server;
mod state;
mod token;
mod tunnel;

pub use server::FileServer;
pub use state::{ClientLedger, ServedFile, ServerState};
pub use token::generate_access_token;
pub use tunnel::{probe_available, resolve_url, TunnelOutcome, URL_TIMEOUT};

/// Result type alias for file server operations
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
