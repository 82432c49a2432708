//! Request handlers for the control surface.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::bundle;
use crate::certs::AcmePaths;
use crate::config::schema::{ConfigKey, ConfigPayload, Hysteria2Config, Socks5Config};
use crate::config::validation;
use crate::error::{Error, Result};
use crate::orchestrator::{NodeId, NodeState};
use crate::store::{ConfigDocument, Update};

use super::AppState;

/// Imported bundles larger than this are rejected before decoding.
const MAX_BUNDLE_UPLOAD: usize = 2 * 1024 * 1024;

/// Placeholder returned in place of stored SOCKS5 passwords.
const MASKED: &str = "******";

#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub key: ConfigKey,
    pub payload: ConfigPayload,
    pub expected_version: u64,
}

#[derive(Debug, Serialize)]
pub struct CommitOutcome {
    pub key: ConfigKey,
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Comma-separated key names; absent means every key.
    pub keys: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enable: bool,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NodeStatusResponse {
    #[serde(flatten)]
    pub state: NodeState,
    /// Effective listen port; node2 falls back to node1's port plus one
    /// when its own listen address leaves the port unset.
    pub port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct CertStored {
    pub path: PathBuf,
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ConfigDocument>> {
    let key = parse_key(&key)?;
    Ok(Json(state.store.get(key)?))
}

pub async fn list_config(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConfigDocument>>> {
    let docs = match query.keys {
        Some(raw) => {
            let keys = raw
                .split(',')
                .map(|part| parse_key(part.trim()))
                .collect::<Result<Vec<_>>>()?;
            state.store.list(&keys)?
        }
        None => state.store.documents(),
    };
    Ok(Json(docs))
}

/// Commit a batch of documents all-or-nothing.
pub async fn update_configs(
    State(state): State<AppState>,
    Json(updates): Json<Vec<ConfigUpdate>>,
) -> Result<Json<Vec<CommitOutcome>>> {
    if updates.is_empty() {
        return Err(Error::validation("updates", "empty batch"));
    }
    for update in &updates {
        validation::validate(update.key, &update.payload)?;
    }

    let batch: Vec<Update> = updates
        .iter()
        .map(|u| (u.key, u.payload.clone(), u.expected_version))
        .collect();
    let versions = state.store.batch_commit(&batch).await?;

    let outcomes = updates
        .iter()
        .zip(versions)
        .map(|(update, version)| CommitOutcome {
            key: update.key,
            version,
        })
        .collect();
    Ok(Json(outcomes))
}

pub async fn get_hysteria2(State(state): State<AppState>) -> Result<Json<ConfigDocument>> {
    Ok(Json(state.store.get(ConfigKey::Hysteria2Node1)?))
}

pub async fn update_hysteria2(
    State(state): State<AppState>,
    Json(config): Json<Hysteria2Config>,
) -> Result<Json<CommitOutcome>> {
    commit_typed(&state, ConfigKey::Hysteria2Node1, ConfigPayload::Hysteria2(config)).await
}

pub async fn get_node2(State(state): State<AppState>) -> Result<Json<ConfigDocument>> {
    Ok(Json(state.store.get(ConfigKey::Hysteria2Node2)?))
}

pub async fn update_node2(
    State(state): State<AppState>,
    Json(config): Json<Hysteria2Config>,
) -> Result<Json<CommitOutcome>> {
    commit_typed(&state, ConfigKey::Hysteria2Node2, ConfigPayload::Hysteria2(config)).await
}

/// SOCKS5 reads mask the stored password; clients resubmit the real one
/// on update.
pub async fn get_socks5(State(state): State<AppState>) -> Result<Json<ConfigDocument>> {
    let mut doc = state.store.get(ConfigKey::Socks5)?;
    if let ConfigPayload::Socks5(config) = &mut doc.payload {
        if config.password.is_some() {
            config.password = Some(MASKED.to_string());
        }
    }
    Ok(Json(doc))
}

pub async fn update_socks5(
    State(state): State<AppState>,
    Json(config): Json<Socks5Config>,
) -> Result<Json<CommitOutcome>> {
    commit_typed(&state, ConfigKey::Socks5, ConfigPayload::Socks5(config)).await
}

pub async fn acme_path(State(state): State<AppState>) -> Result<Json<AcmePaths>> {
    let doc = state.store.get(ConfigKey::Hysteria2Node1)?;
    let ConfigPayload::Hysteria2(config) = &doc.payload else {
        return Err(Error::NotConfigured("node1 has no hysteria2 document"));
    };
    Ok(Json(state.certs.resolve_acme_path(config)?))
}

pub async fn export_single(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    let key = parse_key(&key)?;
    let doc = state.store.get(key)?;
    let bytes = bundle::encode_single(&doc)?;
    Ok(attachment(format!("{key}-{}.bin", unix_timestamp()), bytes))
}

pub async fn export_full(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let documents = state.store.documents();
    let nodes = state.orchestrator.snapshot_records();
    let cert_refs: Vec<bundle::CertRef> = state
        .certs
        .stored_assets()
        .into_iter()
        .map(|(slot, path)| bundle::CertRef {
            slot,
            path: path.display().to_string(),
        })
        .collect();
    let bytes = bundle::encode_full(&documents, &nodes, &cert_refs)?;
    Ok(attachment(
        format!("control-plane-full-{}.bin", unix_timestamp()),
        bytes,
    ))
}

/// Import one document: decode, validate, commit at the current version.
pub async fn import_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CommitOutcome>> {
    let (_, data) = read_upload(&mut multipart, MAX_BUNDLE_UPLOAD).await?;
    let draft = bundle::decode_single(&data)?;
    validation::validate(draft.key, &draft.payload)?;

    let current = state.store.get(draft.key)?;
    let version = state
        .store
        .commit(draft.key, draft.payload, current.version)
        .await?;
    tracing::info!(key = %draft.key, version, "document imported");
    Ok(Json(CommitOutcome {
        key: draft.key,
        version,
    }))
}

/// Import a full bundle. Documents are validated up front and committed
/// all-or-nothing; node enablement is reconciled afterwards, so a node
/// that fails to start reports an error without undoing the commit.
pub async fn import_full(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<CommitOutcome>>> {
    let (_, data) = read_upload(&mut multipart, MAX_BUNDLE_UPLOAD).await?;
    let draft = bundle::decode_full(&data)?;

    for doc in &draft.documents {
        validation::validate(doc.key, &doc.payload)?;
    }

    let mut batch = Vec::with_capacity(draft.documents.len());
    for doc in &draft.documents {
        let current = state.store.get(doc.key)?;
        batch.push((doc.key, doc.payload.clone(), current.version));
    }
    let versions = state.store.batch_commit(&batch).await?;

    if !draft.cert_refs.is_empty() {
        tracing::info!(
            count = draft.cert_refs.len(),
            "bundle carries certificate references; assets must be uploaded separately"
        );
    }

    for record in &draft.nodes {
        let current = state.orchestrator.status(record.node).await;
        if current.enabled != record.enabled || current.remark != record.remark {
            state
                .orchestrator
                .toggle(record.node, record.enabled, Some(record.remark.clone()))
                .await?;
        }
    }

    let outcomes = draft
        .documents
        .iter()
        .zip(versions)
        .map(|(doc, version)| CommitOutcome {
            key: doc.key,
            version,
        })
        .collect();
    Ok(Json(outcomes))
}

pub async fn upload_cert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CertStored>> {
    let (filename, data) = read_upload(&mut multipart, MAX_BUNDLE_UPLOAD).await?;
    let path = state.certs.store(&filename, &data)?;
    Ok(Json(CertStored { path }))
}

pub async fn all_nodes(State(state): State<AppState>) -> Json<Vec<NodeStatusResponse>> {
    let nodes = state
        .orchestrator
        .all_status()
        .await
        .into_iter()
        .map(|node_state| {
            let port = effective_port(&state, node_state.node_id);
            NodeStatusResponse {
                state: node_state,
                port,
            }
        })
        .collect();
    Json(nodes)
}

pub async fn node_status(
    State(state): State<AppState>,
    Path(node): Path<String>,
) -> Result<Json<NodeStatusResponse>> {
    let node = parse_node(&node)?;
    let node_state = state.orchestrator.status(node).await;
    let port = effective_port(&state, node);
    Ok(Json(NodeStatusResponse {
        state: node_state,
        port,
    }))
}

pub async fn toggle_node(
    State(state): State<AppState>,
    Path(node): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<NodeState>> {
    let node = parse_node(&node)?;
    let node_state = state
        .orchestrator
        .toggle(node, request.enable, request.remark)
        .await?;
    Ok(Json(node_state))
}

pub async fn restart_server(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.orchestrator.restart().await?;
    Ok(Json(json!({ "restarted": true })))
}

async fn commit_typed(
    state: &AppState,
    key: ConfigKey,
    payload: ConfigPayload,
) -> Result<Json<CommitOutcome>> {
    validation::validate(key, &payload)?;
    let current = state.store.get(key)?;
    let version = state.store.commit(key, payload, current.version).await?;
    Ok(Json(CommitOutcome { key, version }))
}

fn parse_key(raw: &str) -> Result<ConfigKey> {
    // An unrecognized key names a document that does not exist.
    raw.parse().map_err(|_| Error::NotFound(raw.to_string()))
}

fn parse_node(raw: &str) -> Result<NodeId> {
    raw.parse()
        .map_err(|_| Error::validation("node", format!("unknown node: {raw}")))
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn attachment(filename: String, bytes: bytes::Bytes) -> impl IntoResponse {
    (
        [
            (
                header::CONTENT_TYPE.as_str(),
                "application/octet-stream".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION.as_str(),
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
}

/// Pull the `file` field out of a multipart upload, capped.
async fn read_upload(multipart: &mut Multipart, cap: usize) -> Result<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::MalformedBundle(format!("multipart: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.bin").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::MalformedBundle(format!("multipart: {e}")))?;
        if data.len() > cap {
            return Err(Error::MalformedBundle(format!(
                "upload exceeds {cap} bytes"
            )));
        }
        return Ok((filename, data.to_vec()));
    }
    Err(Error::MalformedBundle("missing file field".into()))
}

fn listen_port(listen: &str) -> Option<u16> {
    listen.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
}

fn effective_port(state: &AppState, node: NodeId) -> Option<u16> {
    let doc = state.store.get(node.config_key()).ok()?;
    let ConfigPayload::Hysteria2(config) = doc.payload else {
        return None;
    };
    if let Some(port) = listen_port(&config.listen) {
        return Some(port);
    }
    if node == NodeId::Node2 {
        let doc = state.store.get(ConfigKey::Hysteria2Node1).ok()?;
        if let ConfigPayload::Hysteria2(config) = doc.payload {
            return listen_port(&config.listen).and_then(|p| p.checked_add(1));
        }
    }
    None
}
