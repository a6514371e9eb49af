//! Process-wide named registries.
//!
//! Four independent maps, each keyed by name and living until the entry is
//! unregistered:
//!
//! - local files that `LOAD DATA LOCAL INFILE` may read
//! - content-source factories addressed as `Reader::<name>`
//! - TLS settings selected with [`crate::MySqlConfig::tls_config_name`]
//! - dialers selected with [`crate::MySqlConfig::dialer`]

use crate::config::TlsConfig;
use crate::net::NetStream;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

/// Produces a fresh reader each time the server requests the content.
pub type ReaderFactory = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Opens a stream to `addr` within the timeout.
pub type Dialer = Arc<dyn Fn(&str, Duration) -> io::Result<Box<dyn NetStream>> + Send + Sync>;

/// A named map behind a reader-writer lock.
pub struct Registry<T> {
    entries: OnceLock<RwLock<HashMap<String, T>>>,
}

impl<T: Clone> Registry<T> {
    pub const fn new() -> Self {
        Self {
            entries: OnceLock::new(),
        }
    }

    fn map(&self) -> &RwLock<HashMap<String, T>> {
        self.entries.get_or_init(|| RwLock::new(HashMap::new()))
    }

    /// Insert or replace an entry.
    pub fn register(&self, name: impl Into<String>, value: T) {
        let mut map = self.map().write().unwrap_or_else(|e| e.into_inner());
        map.insert(name.into(), value);
    }

    /// Remove an entry, returning whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut map = self.map().write().unwrap_or_else(|e| e.into_inner());
        map.remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<T> {
        let map = self.map().read().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let map = self.map().read().unwrap_or_else(|e| e.into_inner());
        map.contains_key(name)
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

static LOCAL_FILES: Registry<()> = Registry::new();
static READERS: Registry<ReaderFactory> = Registry::new();
static TLS_CONFIGS: Registry<TlsConfig> = Registry::new();
static DIALERS: Registry<Dialer> = Registry::new();

/// Allow `LOAD DATA LOCAL INFILE '<path>'` to read this exact path.
pub fn register_local_file(path: impl Into<String>) {
    LOCAL_FILES.register(path, ());
}

pub fn unregister_local_file(path: &str) -> bool {
    LOCAL_FILES.unregister(path)
}

pub fn is_local_file_registered(path: &str) -> bool {
    LOCAL_FILES.contains(path)
}

/// Serve `LOAD DATA LOCAL INFILE 'Reader::<name>'` from readers made by `factory`.
pub fn register_reader<F>(name: impl Into<String>, factory: F)
where
    F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync + 'static,
{
    READERS.register(name, Arc::new(factory));
}

pub fn unregister_reader(name: &str) -> bool {
    READERS.unregister(name)
}

pub fn lookup_reader(name: &str) -> Option<ReaderFactory> {
    READERS.lookup(name)
}

pub fn register_tls_config(name: impl Into<String>, config: TlsConfig) {
    TLS_CONFIGS.register(name, config);
}

pub fn unregister_tls_config(name: &str) -> bool {
    TLS_CONFIGS.unregister(name)
}

pub fn lookup_tls_config(name: &str) -> Option<TlsConfig> {
    TLS_CONFIGS.lookup(name)
}

pub fn register_dialer<F>(name: impl Into<String>, dialer: F)
where
    F: Fn(&str, Duration) -> io::Result<Box<dyn NetStream>> + Send + Sync + 'static,
{
    DIALERS.register(name, Arc::new(dialer));
}

pub fn unregister_dialer(name: &str) -> bool {
    DIALERS.unregister(name)
}

pub fn lookup_dialer(name: &str) -> Option<Dialer> {
    DIALERS.lookup(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_registry() {
        let registry: Registry<u32> = Registry::new();
        assert_eq!(registry.lookup("a"), None);
        registry.register("a", 1);
        registry.register("a", 2);
        assert_eq!(registry.lookup("a"), Some(2));
        assert!(registry.contains("a"));
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.lookup("a"), None);
    }

    #[test]
    fn test_local_files_are_exact_paths() {
        register_local_file("/tmp/registry-test.csv");
        assert!(is_local_file_registered("/tmp/registry-test.csv"));
        assert!(!is_local_file_registered("/tmp/../tmp/registry-test.csv"));
        assert!(unregister_local_file("/tmp/registry-test.csv"));
        assert!(!is_local_file_registered("/tmp/registry-test.csv"));
    }

    #[test]
    fn test_reader_factory_makes_fresh_readers() {
        register_reader("registry-test", || {
            Ok(Box::new(io::Cursor::new(b"1,a\n".to_vec())))
        });
        let factory = lookup_reader("registry-test").unwrap();
        for _ in 0..2 {
            let mut content = String::new();
            factory().unwrap().read_to_string(&mut content).unwrap();
            assert_eq!(content, "1,a\n");
        }
        assert!(unregister_reader("registry-test"));
        assert!(lookup_reader("registry-test").is_none());
    }

    #[test]
    fn test_tls_configs_by_name() {
        register_tls_config("registry-test", TlsConfig::new().skip_verify(true));
        assert!(lookup_tls_config("registry-test").unwrap().danger_skip_verify);
        assert!(unregister_tls_config("registry-test"));
        assert!(lookup_tls_config("registry-test").is_none());
    }
}
