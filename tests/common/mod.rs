//! Shared utilities for integration tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use control_plane::config::schema::{ConfigPayload, Hysteria2Config, Socks5Config, TlsFiles};
use control_plane::orchestrator::{EffectiveNodeConfig, NodeOrchestrator, ProxyHandle};
use control_plane::store::persist::MemoryPersistence;
use control_plane::store::ConfigStore;

/// Programmable stand-in for a proxy process.
///
/// Failure flags inject errors into the next matching call; counters
/// record how often each operation was attempted. Like the real child
/// process, starting while already running is an error.
#[derive(Default)]
pub struct MockProxyHandle {
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_reload: AtomicBool,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub reloads: AtomicU32,
    pub last_config: Mutex<Option<EffectiveNodeConfig>>,
    running: AtomicBool,
}

impl MockProxyHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ProxyHandle for MockProxyHandle {
    async fn start(&self, config: &EffectiveNodeConfig) -> std::io::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("injected start failure"));
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("process already running"));
        }
        *self.last_config.lock().unwrap() = Some(config.clone());
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> std::io::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("injected stop failure"));
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn reload(&self, config: &EffectiveNodeConfig) -> std::io::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reload.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            return Err(std::io::Error::other("injected reload failure"));
        }
        *self.last_config.lock().unwrap() = Some(config.clone());
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Fresh store over in-memory persistence, seeded with defaults.
pub fn new_store() -> Arc<ConfigStore> {
    Arc::new(ConfigStore::open(Box::new(MemoryPersistence::new())).unwrap())
}

/// Orchestrator over mock handles, plus the handles for injection.
#[allow(dead_code)]
pub fn new_orchestrator(
    store: &Arc<ConfigStore>,
) -> (
    Arc<NodeOrchestrator>,
    Arc<MockProxyHandle>,
    Arc<MockProxyHandle>,
) {
    let node1 = MockProxyHandle::new();
    let node2 = MockProxyHandle::new();
    let orchestrator = Arc::new(NodeOrchestrator::new(
        Arc::clone(store),
        Arc::clone(&node1) as Arc<dyn ProxyHandle>,
        Arc::clone(&node2) as Arc<dyn ProxyHandle>,
    ));
    (orchestrator, node1, node2)
}

/// A hysteria2 payload that passes validation.
pub fn hysteria2_payload(listen: &str) -> ConfigPayload {
    ConfigPayload::Hysteria2(Hysteria2Config {
        listen: listen.to_string(),
        tls: Some(TlsFiles {
            cert_path: "/etc/certs/proxy.crt".into(),
            key_path: "/etc/certs/proxy.key".into(),
        }),
        ..Default::default()
    })
}

/// A socks5 payload that passes validation.
pub fn socks5_payload(listen: &str) -> ConfigPayload {
    ConfigPayload::Socks5(Socks5Config {
        listen: listen.to_string(),
        ..Default::default()
    })
}

/// Unique scratch directory under the system temp dir.
#[allow(dead_code)]
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("control-plane-{tag}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
