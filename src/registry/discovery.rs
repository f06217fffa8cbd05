// src/registry/discovery.rs
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, warn};

use super::record::BackendUrl;

/// Component C: provides the current backend URL set.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Current backend URL list. Never returns an error to callers: hard
    /// failures degrade to an empty list.
    async fn list(&self) -> Vec<BackendUrl>;

    fn name(&self) -> &'static str;

    fn supports_dynamic(&self) -> bool;
}

/// Fixed list, configured once at startup.
pub struct StaticDiscovery {
    servers: Vec<BackendUrl>,
}

impl StaticDiscovery {
    pub fn new(servers: Vec<BackendUrl>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn list(&self) -> Vec<BackendUrl> {
        self.servers.clone()
    }

    fn name(&self) -> &'static str {
        "static"
    }

    fn supports_dynamic(&self) -> bool {
        false
    }
}

struct Cache {
    modified_at: Option<SystemTime>,
    servers: Vec<BackendUrl>,
}

/// Reads a UTF-8 text file of one URL per line on every `list()` call,
/// re-parsing only when the file's mtime has advanced since the last read.
pub struct FileDiscovery {
    path: PathBuf,
    cache: Mutex<Cache>,
}

impl FileDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(Cache {
                modified_at: None,
                servers: Vec::new(),
            }),
        }
    }

    fn parse(contents: &str) -> Vec<BackendUrl> {
        let stripped = contents.strip_prefix('\u{feff}').unwrap_or(contents);
        stripped
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.to_string())
            .collect()
    }
}

#[async_trait]
impl DiscoverySource for FileDiscovery {
    async fn list(&self) -> Vec<BackendUrl> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "discovery file unreadable, treating as empty");
                return Vec::new();
            }
        };
        let modified_at = metadata.modified().ok();

        {
            let cache = self.cache.lock().unwrap();
            if modified_at.is_some() && modified_at == cache.modified_at {
                return cache.servers.clone();
            }
        }

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed reading discovery file");
                return Vec::new();
            }
        };
        let servers = Self::parse(&contents);

        let mut cache = self.cache.lock().unwrap();
        cache.modified_at = modified_at;
        cache.servers = servers.clone();
        servers
    }

    fn name(&self) -> &'static str {
        "file"
    }

    fn supports_dynamic(&self) -> bool {
        true
    }
}
