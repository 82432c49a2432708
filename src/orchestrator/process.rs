//! Proxy process control over a spawned child.
//!
//! The managed proxies take their configuration from a file; reload is a
//! stop/start cycle, which is what the upstream runtime supports.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::orchestrator::{EffectiveNodeConfig, ProxyHandle};

/// `ProxyHandle` implementation that spawns the proxy binary.
pub struct ProcessHandle {
    binary: PathBuf,
    config_path: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ProcessHandle {
    /// `config_path` is where this node's effective configuration is
    /// written before each start.
    pub fn new(binary: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
            child: Mutex::new(None),
        }
    }

    async fn write_config(&self, config: &EffectiveNodeConfig) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(config)
            .map_err(|e| std::io::Error::other(format!("serialize node config: {e}")))?;
        tokio::fs::write(&self.config_path, content).await
    }
}

#[async_trait]
impl ProxyHandle for ProcessHandle {
    async fn start(&self, config: &EffectiveNodeConfig) -> std::io::Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if child.try_wait()?.is_none() {
                return Err(std::io::Error::other("process already running"));
            }
        }

        self.write_config(config).await?;
        let child = Command::new(&self.binary)
            .arg("server")
            .arg("-c")
            .arg(&self.config_path)
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(binary = %self.binary.display(), pid = child.id(), "proxy process started");
        *guard = Some(child);
        Ok(())
    }

    async fn stop(&self) -> std::io::Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            child.kill().await?;
            let status = child.wait().await?;
            tracing::info!(status = %status, "proxy process stopped");
        }
        Ok(())
    }

    async fn reload(&self, config: &EffectiveNodeConfig) -> std::io::Result<()> {
        self.stop().await?;
        self.start(config).await
    }

    async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}
