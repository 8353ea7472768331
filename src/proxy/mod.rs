//! Rotating proxy pool with health tracking
//!
//! The pool hands out a uniformly random usable proxy for each request.
//! A proxy is usable while `is_valid` holds and its failure count stays
//! under the configured threshold. A background sweep re-validates every
//! entry on a fixed period by probing a test endpoint through the proxy,
//! then persists the pool. Selection and validation are deliberately not
//! atomic: a proxy obtained from [`ProxyPool::get_proxy`] is advisory,
//! not a lease, and callers fall back to a direct connection when the
//! usable set is empty.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Probe timeout for a single validation request
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
        };
        f.write_str(s)
    }
}

/// One proxy with its health state
///
/// Identity is `(address, port)`; everything else is updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEntry {
    #[serde(rename = "ip")]
    pub address: String,

    pub port: u16,

    pub protocol: ProxyProtocol,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "Utc::now")]
    pub last_used: DateTime<Utc>,

    #[serde(default)]
    pub fail_count: u32,

    #[serde(default)]
    pub is_valid: bool,
}

impl ProxyEntry {
    pub fn new(address: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            address: address.into(),
            port,
            protocol,
            username: None,
            password: None,
            last_used: Utc::now(),
            fail_count: 0,
            is_valid: true,
        }
    }

    /// Proxy URL in the form `protocol://[user:pass@]host:port`
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{}://{}:{}@{}:{}",
                self.protocol, user, pass, self.address, self.port
            ),
            _ => format!("{}://{}:{}", self.protocol, self.address, self.port),
        }
    }

    fn usable(&self, max_failures: u32) -> bool {
        self.is_valid && self.fail_count < max_failures
    }
}

/// Shared pool of health-tracked proxies
pub struct ProxyPool {
    entries: Mutex<Vec<ProxyEntry>>,
    file: PathBuf,
    test_url: String,
    max_failures: u32,
}

impl ProxyPool {
    /// Create a pool persisting to `file`, validating against `test_url`
    pub fn new(file: impl Into<PathBuf>, test_url: impl Into<String>, max_failures: u32) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            file: file.into(),
            test_url: test_url.into(),
            max_failures,
        }
    }

    /// Load the proxy list from disk; a missing file leaves the pool empty
    pub fn load(&self) -> Result<(), StoreError> {
        if !self.file.exists() {
            return Ok(());
        }

        let file = File::open(&self.file)?;
        let list: Vec<ProxyEntry> = serde_json::from_reader(BufReader::new(file))?;

        let mut entries = self.entries.lock().expect("proxy lock poisoned");
        info!(count = list.len(), path = %self.file.display(), "proxy list loaded");
        *entries = list;
        Ok(())
    }

    /// Persist the pool to disk
    pub fn save(&self) -> Result<(), StoreError> {
        let snapshot = {
            let entries = self.entries.lock().expect("proxy lock poisoned");
            entries.clone()
        };

        if let Some(parent) = self.file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.file.with_extension("json.tmp");
        let file = File::create(&temp)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)?;
        fs::rename(&temp, &self.file)?;
        debug!(count = snapshot.len(), "proxy list saved");
        Ok(())
    }

    fn persist_background(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        // save() does blocking file IO, keep it off the async executor
        tokio::task::spawn_blocking(move || {
            if let Err(e) = pool.save() {
                warn!(error = %e, "proxy list save failed");
            }
        });
    }

    /// Pick a uniformly random usable proxy, updating its `last_used`
    ///
    /// Returns `None` when no proxy is usable; the caller must fall
    /// back to a direct connection.
    pub fn get_proxy(&self) -> Option<ProxyEntry> {
        let mut entries = self.entries.lock().expect("proxy lock poisoned");
        let max_failures = self.max_failures;

        let usable: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, p)| p.usable(max_failures))
            .map(|(i, _)| i)
            .collect();

        let &idx = usable.choose(&mut rand::thread_rng())?;
        entries[idx].last_used = Utc::now();
        Some(entries[idx].clone())
    }

    /// Insert or update by `(address, port)` identity
    ///
    /// An existing entry keeps its failure history; only protocol and
    /// credentials are refreshed.
    pub fn add_proxy(self: &Arc<Self>, proxy: ProxyEntry) {
        {
            let mut entries = self.entries.lock().expect("proxy lock poisoned");
            match entries
                .iter_mut()
                .find(|p| p.address == proxy.address && p.port == proxy.port)
            {
                Some(existing) => {
                    existing.protocol = proxy.protocol;
                    existing.username = proxy.username;
                    existing.password = proxy.password;
                    existing.is_valid = proxy.is_valid;
                }
                None => entries.push(proxy),
            }
        }
        self.persist_background();
    }

    /// Remove by `(address, port)` identity
    pub fn remove_proxy(self: &Arc<Self>, address: &str, port: u16) {
        {
            let mut entries = self.entries.lock().expect("proxy lock poisoned");
            entries.retain(|p| !(p.address == address && p.port == port));
        }
        self.persist_background();
    }

    /// Number of (total, usable) entries
    pub fn counts(&self) -> (usize, usize) {
        let entries = self.entries.lock().expect("proxy lock poisoned");
        let usable = entries
            .iter()
            .filter(|p| p.usable(self.max_failures))
            .count();
        (entries.len(), usable)
    }

    /// Snapshot of all entries
    pub fn list(&self) -> Vec<ProxyEntry> {
        self.entries.lock().expect("proxy lock poisoned").clone()
    }

    /// Probe the test endpoint through the proxy at `(address, port)`
    /// and update its health state
    ///
    /// Success resets `fail_count` and marks the entry valid; any
    /// failure increments `fail_count` and marks it invalid. Returns
    /// the probe outcome, or `None` if the entry vanished meanwhile.
    pub async fn validate(&self, address: &str, port: u16) -> Option<bool> {
        let url = {
            let entries = self.entries.lock().expect("proxy lock poisoned");
            entries
                .iter()
                .find(|p| p.address == address && p.port == port)?
                .url()
        };

        let ok = self.probe(&url).await;

        let mut entries = self.entries.lock().expect("proxy lock poisoned");
        let entry = entries
            .iter_mut()
            .find(|p| p.address == address && p.port == port)?;

        if ok {
            entry.fail_count = 0;
            entry.is_valid = true;
        } else {
            entry.fail_count += 1;
            entry.is_valid = false;
        }
        debug!(
            proxy = %format!("{address}:{port}"),
            valid = ok,
            fail_count = entry.fail_count,
            "proxy validated"
        );
        Some(ok)
    }

    async fn probe(&self, proxy_url: &str) -> bool {
        let proxy = match reqwest::Proxy::all(proxy_url) {
            Ok(p) => p,
            Err(_) => return false,
        };

        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(PROBE_TIMEOUT)
            .build()
        {
            Ok(c) => c,
            Err(_) => return false,
        };

        match client.get(&self.test_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Validate every known proxy concurrently, then persist the pool
    pub async fn validate_all(&self) {
        let targets: Vec<(String, u16)> = {
            let entries = self.entries.lock().expect("proxy lock poisoned");
            entries.iter().map(|p| (p.address.clone(), p.port)).collect()
        };

        join_all(
            targets
                .iter()
                .map(|(addr, port)| self.validate(addr, *port)),
        )
        .await;

        let (total, usable) = self.counts();
        info!(total, usable, "proxy validation sweep complete");

        if let Err(e) = self.save() {
            warn!(error = %e, "proxy list save failed after sweep");
        }
    }

    /// Spawn the periodic validation sweep
    ///
    /// The returned handle is aborted at shutdown.
    pub fn spawn_validator(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so startup isn't a sweep
            interval.tick().await;
            loop {
                interval.tick().await;
                pool.validate_all().await;
            }
        })
    }

    #[cfg(test)]
    fn set_health(&self, address: &str, port: u16, fail_count: u32, is_valid: bool) {
        let mut entries = self.entries.lock().expect("proxy lock poisoned");
        if let Some(p) = entries
            .iter_mut()
            .find(|p| p.address == address && p.port == port)
        {
            p.fail_count = fail_count;
            p.is_valid = is_valid;
        }
    }
}

/// Parse `host:port` into an address/port pair
pub fn parse_host_port(s: &str) -> Result<(String, u16), String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {s}"))?;
    let port: u16 = port.parse().map_err(|_| format!("invalid port in {s}"))?;
    if host.is_empty() {
        return Err(format!("empty host in {s}"));
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool_in(dir: &TempDir) -> Arc<ProxyPool> {
        Arc::new(ProxyPool::new(
            dir.path().join("proxies.json"),
            "http://127.0.0.1:1/check",
            3,
        ))
    }

    #[test]
    fn test_proxy_url_formats() {
        let mut p = ProxyEntry::new("10.0.0.1", 8080, ProxyProtocol::Http);
        assert_eq!(p.url(), "http://10.0.0.1:8080");

        p.username = Some("u".into());
        p.password = Some("pw".into());
        p.protocol = ProxyProtocol::Socks5;
        assert_eq!(p.url(), "socks5://u:pw@10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_get_proxy_empty_pool_is_none() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);
        assert!(pool.get_proxy().is_none());
    }

    #[tokio::test]
    async fn test_get_proxy_skips_unusable() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);

        pool.add_proxy(ProxyEntry::new("10.0.0.1", 1080, ProxyProtocol::Http));
        pool.add_proxy(ProxyEntry::new("10.0.0.2", 1080, ProxyProtocol::Http));
        pool.add_proxy(ProxyEntry::new("10.0.0.3", 1080, ProxyProtocol::Http));

        // one invalid, one over the failure threshold
        pool.set_health("10.0.0.1", 1080, 0, false);
        pool.set_health("10.0.0.2", 1080, 3, true);

        for _ in 0..50 {
            let p = pool.get_proxy().expect("one proxy remains usable");
            assert_eq!(p.address, "10.0.0.3");
            assert!(p.is_valid);
            assert!(p.fail_count < 3);
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity_unique() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);

        pool.add_proxy(ProxyEntry::new("10.0.0.1", 1080, ProxyProtocol::Http));

        let mut updated = ProxyEntry::new("10.0.0.1", 1080, ProxyProtocol::Socks5);
        updated.username = Some("user".into());
        updated.password = Some("pw".into());
        pool.add_proxy(updated);

        let entries = pool.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].protocol, ProxyProtocol::Socks5);
        assert_eq!(entries[0].username.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_remove_proxy() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);

        pool.add_proxy(ProxyEntry::new("10.0.0.1", 1080, ProxyProtocol::Http));
        pool.add_proxy(ProxyEntry::new("10.0.0.1", 1081, ProxyProtocol::Http));
        pool.remove_proxy("10.0.0.1", 1080);

        let entries = pool.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].port, 1081);
    }

    #[tokio::test]
    async fn test_validate_unreachable_proxy_fails() {
        let dir = TempDir::new().unwrap();
        // discard port: the probe cannot connect
        let pool = pool_in(&dir);
        pool.add_proxy(ProxyEntry::new("127.0.0.1", 9, ProxyProtocol::Http));

        let ok = pool.validate("127.0.0.1", 9).await;
        assert_eq!(ok, Some(false));

        let entry = &pool.list()[0];
        assert!(!entry.is_valid);
        assert_eq!(entry.fail_count, 1);
        assert!(pool.get_proxy().is_none());
    }

    #[tokio::test]
    async fn test_validate_success_resets_failures() {
        use wiremock::matchers::any;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        // The mock server plays the role of an HTTP forward proxy:
        // reqwest sends it an absolute-form GET which it answers 200.
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let addr = server.address();
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(ProxyPool::new(
            dir.path().join("proxies.json"),
            "http://example.invalid/check",
            3,
        ));

        let mut entry = ProxyEntry::new(addr.ip().to_string(), addr.port(), ProxyProtocol::Http);
        entry.fail_count = 2;
        entry.is_valid = false;
        pool.add_proxy(entry);

        let ok = pool.validate(&addr.ip().to_string(), addr.port()).await;
        assert_eq!(ok, Some(true));

        let entry = &pool.list()[0];
        assert!(entry.is_valid);
        assert_eq!(entry.fail_count, 0);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxies.json");

        let pool = Arc::new(ProxyPool::new(&path, "http://t/check", 3));
        let mut entry = ProxyEntry::new("10.0.0.1", 1080, ProxyProtocol::Socks5);
        entry.fail_count = 2;
        pool.add_proxy(entry);
        pool.save().unwrap();

        let restored = ProxyPool::new(&path, "http://t/check", 3);
        restored.load().unwrap();
        let entries = restored.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].protocol, ProxyProtocol::Socks5);
        assert_eq!(entries[0].fail_count, 2);
    }

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("1.2.3.4:1080").unwrap(),
            ("1.2.3.4".to_string(), 1080)
        );
        assert!(parse_host_port("no-port").is_err());
        assert!(parse_host_port(":1080").is_err());
        assert!(parse_host_port("h:notaport").is_err());
    }
}
