//! Server state: the served file and the per-client request ledger

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// The single file served for the lifetime of the process
#[derive(Debug, Clone)]
pub struct ServedFile {
    /// Absolute path to the file on disk
    pub path: PathBuf,
    /// Base name presented to downloaders, no directory component
    pub name: String,
    /// File size in bytes at startup
    pub size: u64,
    /// Random path segment gating both routes
    pub token: String,
}

impl ServedFile {
    /// Create a served file record, deriving the display name from the path
    pub fn new(path: PathBuf, size: u64, token: String) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Self {
            path,
            name,
            size,
            token,
        }
    }

    /// Human-readable size in megabytes, two decimals
    pub fn size_mb(&self) -> String {
        format!("{:.2}", self.size as f64 / 1_048_576.0)
    }
}

/// Per-client request counter keyed by (address, user agent)
///
/// Entries live for the process lifetime with no eviction. Growth is
/// bounded in practice by the handful of clients a short-lived share sees.
#[derive(Clone, Default)]
pub struct ClientLedger {
    clients: Arc<RwLock<HashMap<(String, String), u64>>>,
}

impl ClientLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record one request from a client and return its running total
    pub fn record_hit(&self, ip: &str, user_agent: &str) -> u64 {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        let count = clients
            .entry((ip.to_string(), user_agent.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Number of distinct clients seen so far
    pub fn client_count(&self) -> usize {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.len()
    }
}

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct ServerState {
    file: Arc<ServedFile>,
    ledger: ClientLedger,
}

impl ServerState {
    /// Create server state owning the served file and a fresh ledger
    pub fn new(file: ServedFile) -> Self {
        Self {
            file: Arc::new(file),
            ledger: ClientLedger::new(),
        }
    }

    /// The file being served
    pub fn file(&self) -> &ServedFile {
        &self.file
    }

    /// The client request ledger
    pub fn ledger(&self) -> &ClientLedger {
        &self.ledger
    }
}
