//! Node orchestration.
//!
//! # State Machine (per node)
//! ```text
//! Disabled → Enabled:  toggle(enabled) starts the listener
//! Enabled → Applying:  apply_config / restart pushes new configuration
//! Applying → Enabled:  apply succeeded, last_applied_version recorded
//! Applying → Failed → Disabled: apply error force-disables the node
//! Enabled → Disabled:  toggle(disabled) stops traffic, keeps config
//! ```
//!
//! # Design Decisions
//! - Operations on one node are mutually exclusive (per-node async lock);
//!   different nodes proceed in parallel
//! - Status reads bypass the operation lock so a node can be observed
//!   mid-apply
//! - The external proxy process is reached only through the `ProxyHandle`
//!   trait; the recorded state always reflects the last observed outcome,
//!   never the requested intent

pub mod process;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::config::schema::{ConfigKey, ConfigPayload, Hysteria2Config, Socks5Config};
use crate::error::{Error, Result};
use crate::store::{ChangeNotice, ConfigStore};

/// Remarks travel in bundle records behind a u16 length field.
const MAX_REMARK_BYTES: usize = u16::MAX as usize;

/// Identifier of a managed proxy node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeId {
    Node1,
    Node2,
}

impl NodeId {
    pub const ALL: [NodeId; 2] = [NodeId::Node1, NodeId::Node2];

    /// The configuration document this node runs from.
    pub fn config_key(&self) -> ConfigKey {
        match self {
            NodeId::Node1 => ConfigKey::Hysteria2Node1,
            NodeId::Node2 => ConfigKey::Hysteria2Node2,
        }
    }

    /// The node whose runtime is affected by a commit to `key`.
    ///
    /// The SOCKS5 listener is node2's outbound, so SOCKS5 changes land
    /// on node2.
    pub fn affected_by(key: ConfigKey) -> NodeId {
        match key {
            ConfigKey::Hysteria2Node1 => NodeId::Node1,
            ConfigKey::Hysteria2Node2 | ConfigKey::Socks5 => NodeId::Node2,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Node1 => f.write_str("node1"),
            NodeId::Node2 => f.write_str("node2"),
        }
    }
}

impl FromStr for NodeId {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "node1" => Ok(NodeId::Node1),
            "node2" => Ok(NodeId::Node2),
            _ => Err(()),
        }
    }
}

/// Node lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Disabled = 0,
    Enabled = 1,
    Applying = 2,
    Failed = 3,
}

impl From<u8> for NodeStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => NodeStatus::Enabled,
            2 => NodeStatus::Applying,
            3 => NodeStatus::Failed,
            _ => NodeStatus::Disabled,
        }
    }
}

/// Per-node runtime state reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct NodeState {
    pub node_id: NodeId,
    pub enabled: bool,
    pub status: NodeStatus,
    pub last_applied_version: Option<u64>,
    pub remark: String,
    /// Observed from the proxy process, not from recorded intent.
    pub running: bool,
}

/// Node enablement record carried inside full bundles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: NodeId,
    pub enabled: bool,
    pub remark: String,
}

/// Runtime configuration handed to a proxy process: the node's own
/// document plus the cross-document pieces merged in. For node2 that
/// means the SOCKS5 listener as an outbound and, when the document
/// leaves the listen address empty, a listen derived from node1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveNodeConfig {
    #[serde(flatten)]
    pub hysteria2: Hysteria2Config,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks5_outbound: Option<Socks5Config>,
}

/// Control channel to one external proxy process.
#[async_trait]
pub trait ProxyHandle: Send + Sync {
    /// Start the process with the given configuration.
    async fn start(&self, config: &EffectiveNodeConfig) -> std::io::Result<()>;

    /// Stop the process, draining where the runtime allows.
    async fn stop(&self) -> std::io::Result<()>;

    /// Push new configuration into a running process.
    async fn reload(&self, config: &EffectiveNodeConfig) -> std::io::Result<()>;

    /// Whether the process is currently alive.
    async fn is_running(&self) -> bool;
}

struct SlotMeta {
    enabled: bool,
    last_applied_version: Option<u64>,
    remark: String,
}

struct NodeSlot {
    handle: Arc<dyn ProxyHandle>,
    op_lock: Mutex<()>,
    status: AtomicU8,
    meta: RwLock<SlotMeta>,
}

impl NodeSlot {
    fn new(handle: Arc<dyn ProxyHandle>, enabled: bool) -> Self {
        let status = if enabled {
            NodeStatus::Enabled
        } else {
            NodeStatus::Disabled
        };
        Self {
            handle,
            op_lock: Mutex::new(()),
            status: AtomicU8::new(status as u8),
            meta: RwLock::new(SlotMeta {
                enabled,
                last_applied_version: None,
                remark: String::new(),
            }),
        }
    }

    fn status(&self) -> NodeStatus {
        NodeStatus::from(self.status.load(Ordering::Relaxed))
    }

    fn set_status(&self, status: NodeStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    fn read_meta(&self) -> (bool, Option<u64>, String) {
        match self.meta.read() {
            Ok(meta) => (meta.enabled, meta.last_applied_version, meta.remark.clone()),
            Err(_) => (false, None, String::new()),
        }
    }

    fn write_meta(&self, f: impl FnOnce(&mut SlotMeta)) {
        if let Ok(mut meta) = self.meta.write() {
            f(&mut meta);
        }
    }
}

/// Applies accepted configuration to the managed proxy processes.
pub struct NodeOrchestrator {
    store: Arc<ConfigStore>,
    nodes: DashMap<NodeId, Arc<NodeSlot>>,
}

impl NodeOrchestrator {
    /// Create the orchestrator. Node1 starts out enabled, node2 disabled.
    pub fn new(
        store: Arc<ConfigStore>,
        node1: Arc<dyn ProxyHandle>,
        node2: Arc<dyn ProxyHandle>,
    ) -> Self {
        let nodes = DashMap::new();
        nodes.insert(NodeId::Node1, Arc::new(NodeSlot::new(node1, true)));
        nodes.insert(NodeId::Node2, Arc::new(NodeSlot::new(node2, false)));
        Self { store, nodes }
    }

    fn slot(&self, node: NodeId) -> Arc<NodeSlot> {
        // Both slots are inserted in `new` and never removed.
        self.nodes
            .get(&node)
            .map(|entry| Arc::clone(&entry))
            .unwrap_or_else(|| unreachable!("slot missing for {node}"))
    }

    /// Enable or disable a node.
    ///
    /// Enabling starts the listener with the current document; disabling
    /// stops traffic acceptance without discarding configuration or the
    /// recorded applied version.
    pub async fn toggle(
        &self,
        node: NodeId,
        enabled: bool,
        remark: Option<String>,
    ) -> Result<NodeState> {
        if remark.as_ref().is_some_and(|r| r.len() > MAX_REMARK_BYTES) {
            return Err(Error::validation(
                "remark",
                format!("must not exceed {MAX_REMARK_BYTES} bytes"),
            ));
        }

        let slot = self.slot(node);
        let _op = slot.op_lock.lock().await;

        if let Some(remark) = remark {
            slot.write_meta(|meta| meta.remark = remark);
        }

        if enabled {
            if node == NodeId::Node2 {
                self.require_socks5_configured()?;
            }
            let (already_enabled, _, _) = slot.read_meta();
            if already_enabled && slot.handle.is_running().await {
                // Re-enabling a healthy node only refreshes the remark.
                tracing::debug!(node = %node, "node already enabled");
                return Ok(self.state_of(node, &slot).await);
            }
            let (config, version) = self.effective_config(node)?;
            slot.set_status(NodeStatus::Applying);
            if let Err(e) = slot.handle.start(&config).await {
                self.force_disable(&slot, node);
                return Err(Error::ApplyFailed {
                    node,
                    cause: e.to_string(),
                });
            }
            slot.write_meta(|meta| {
                meta.enabled = true;
                meta.last_applied_version = Some(version);
            });
            slot.set_status(NodeStatus::Enabled);
            tracing::info!(node = %node, version, "node enabled");
        } else {
            if slot.handle.is_running().await {
                if let Err(e) = slot.handle.stop().await {
                    self.force_disable(&slot, node);
                    return Err(Error::ApplyFailed {
                        node,
                        cause: e.to_string(),
                    });
                }
            }
            slot.write_meta(|meta| meta.enabled = false);
            slot.set_status(NodeStatus::Disabled);
            tracing::info!(node = %node, "node disabled");
        }

        Ok(self.state_of(node, &slot).await)
    }

    /// Push the node's current document into its running process.
    pub async fn apply_config(&self, node: NodeId) -> Result<NodeState> {
        let slot = self.slot(node);
        let _op = slot.op_lock.lock().await;

        let (enabled, _, _) = slot.read_meta();
        if !enabled {
            return Err(Error::ApplyFailed {
                node,
                cause: "node is disabled".into(),
            });
        }

        let (config, version) = self.effective_config(node)?;
        slot.set_status(NodeStatus::Applying);
        match slot.handle.reload(&config).await {
            Ok(()) => {
                slot.write_meta(|meta| meta.last_applied_version = Some(version));
                slot.set_status(NodeStatus::Enabled);
                tracing::info!(node = %node, version, "config applied");
                Ok(self.state_of(node, &slot).await)
            }
            Err(e) => {
                self.force_disable(&slot, node);
                Err(Error::ApplyFailed {
                    node,
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Current state of one node.
    pub async fn status(&self, node: NodeId) -> NodeState {
        let slot = self.slot(node);
        self.state_of(node, &slot).await
    }

    /// Current state of every node, in canonical order.
    pub async fn all_status(&self) -> Vec<NodeState> {
        let mut states = Vec::with_capacity(NodeId::ALL.len());
        for node in NodeId::ALL {
            states.push(self.status(node).await);
        }
        states
    }

    /// Node enablement records for full-bundle export.
    pub fn snapshot_records(&self) -> Vec<NodeRecord> {
        NodeId::ALL
            .iter()
            .map(|&node| {
                let (enabled, _, remark) = self.slot(node).read_meta();
                NodeRecord {
                    node,
                    enabled,
                    remark,
                }
            })
            .collect()
    }

    /// Restart the managed server: stop every enabled node, then reapply
    /// its last-committed configuration.
    ///
    /// A node that fails to come back is forced `Failed` → `Disabled`;
    /// the call then fails naming every such node while the others stay
    /// enabled.
    pub async fn restart(&self) -> Result<()> {
        let mut failed = Vec::new();

        for node in NodeId::ALL {
            let slot = self.slot(node);
            let _op = slot.op_lock.lock().await;

            let (enabled, _, _) = slot.read_meta();
            if !enabled {
                continue;
            }

            slot.set_status(NodeStatus::Applying);
            let (config, version) = match self.effective_config(node) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(node = %node, error = %e, "restart: no usable config");
                    self.force_disable(&slot, node);
                    failed.push(node);
                    continue;
                }
            };

            let mut outcome = Ok(());
            if slot.handle.is_running().await {
                outcome = slot.handle.stop().await;
            }
            if outcome.is_ok() {
                outcome = slot.handle.start(&config).await;
            }

            match outcome {
                Ok(()) => {
                    slot.write_meta(|meta| meta.last_applied_version = Some(version));
                    slot.set_status(NodeStatus::Enabled);
                    tracing::info!(node = %node, version, "node restarted");
                }
                Err(e) => {
                    tracing::error!(node = %node, error = %e, "restart failed");
                    self.force_disable(&slot, node);
                    failed.push(node);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::RestartFailed(failed))
        }
    }

    /// Consume store change notifications, reapplying configuration to
    /// the affected node while it is enabled.
    pub fn spawn_change_listener(
        self: &Arc<Self>,
        mut changes: broadcast::Receiver<ChangeNotice>,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(notice) => {
                        let node = NodeId::affected_by(notice.key);
                        let (enabled, _, _) = orchestrator.slot(node).read_meta();
                        if !enabled {
                            continue;
                        }
                        if let Err(e) = orchestrator.apply_config(node).await {
                            tracing::warn!(node = %node, error = %e, "auto-apply failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Compose the configuration a node's process actually runs from,
    /// together with the document version it reflects.
    fn effective_config(&self, node: NodeId) -> Result<(EffectiveNodeConfig, u64)> {
        let doc = self.store.get(node.config_key())?;
        let version = doc.version;
        let ConfigPayload::Hysteria2(mut hysteria2) = doc.payload else {
            return Err(Error::NotConfigured("node document is not a hysteria2 payload"));
        };

        let mut socks5_outbound = None;
        if node == NodeId::Node2 {
            if let ConfigPayload::Socks5(socks5) = self.store.get(ConfigKey::Socks5)?.payload {
                if !socks5.listen.is_empty() {
                    socks5_outbound = Some(socks5);
                }
            }
            if hysteria2.listen.is_empty() {
                if let ConfigPayload::Hysteria2(node1) =
                    self.store.get(ConfigKey::Hysteria2Node1)?.payload
                {
                    if let Some((host, port)) = node1.listen.rsplit_once(':') {
                        if let Some(next) = port.parse::<u16>().ok().and_then(|p| p.checked_add(1))
                        {
                            hysteria2.listen = format!("{host}:{next}");
                        }
                    }
                }
            }
        }

        Ok((
            EffectiveNodeConfig {
                hysteria2,
                socks5_outbound,
            },
            version,
        ))
    }

    fn require_socks5_configured(&self) -> Result<()> {
        let doc = self.store.get(ConfigKey::Socks5)?;
        match &doc.payload {
            ConfigPayload::Socks5(config) if !config.listen.is_empty() => Ok(()),
            _ => Err(Error::validation(
                "socks5.listen",
                "socks5 address is required before enabling node2",
            )),
        }
    }

    /// Apply error path: recorded state must match observed reality, so
    /// the node goes Failed, then Disabled.
    fn force_disable(&self, slot: &NodeSlot, node: NodeId) {
        slot.set_status(NodeStatus::Failed);
        tracing::warn!(node = %node, "node marked failed, forcing disabled");
        slot.write_meta(|meta| meta.enabled = false);
        slot.set_status(NodeStatus::Disabled);
    }

    async fn state_of(&self, node: NodeId, slot: &NodeSlot) -> NodeState {
        let (enabled, last_applied_version, remark) = slot.read_meta();
        NodeState {
            node_id: node,
            enabled,
            status: slot.status(),
            last_applied_version,
            remark,
            running: slot.handle.is_running().await,
        }
    }
}
