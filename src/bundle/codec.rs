//! Binary envelope encoding for configuration bundles.
//!
//! ## Wire Format
//! All multi-byte integers are big-endian.
//! ```text
//! magic           4 bytes  b"CPB1"
//! format version  u8       currently 1
//! kind            u8       1 = single document, 2 = full bundle
//!
//! document record:
//!   key tag       u8       1 = hysteria2_node1, 2 = hysteria2_node2, 3 = socks5
//!   payload len   u32
//!   payload       JSON bytes (ConfigPayload)
//!
//! full bundle body:
//!   doc count     u8, then document records
//!   node count    u8, then: node tag u8, enabled u8, remark len u16, remark
//!   cert count    u8, then: slot tag u8, path len u16, path
//! ```
//! Any truncation, unknown tag, or trailing bytes fails the whole parse.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::certs::CertSlot;
use crate::config::schema::{ConfigKey, ConfigPayload};
use crate::error::{Error, Result};
use crate::orchestrator::{NodeId, NodeRecord};
use crate::store::ConfigDocument;

use super::{CertRef, DocumentDraft, FullBundleDraft};

const MAGIC: &[u8; 4] = b"CPB1";
const FORMAT_VERSION: u8 = 1;
const KIND_SINGLE: u8 = 1;
const KIND_FULL: u8 = 2;

/// Upper bound on any length field; matches the import upload cap.
const MAX_SECTION_BYTES: usize = 2 * 1024 * 1024;

/// Serialize one document (current payload, version omitted).
pub fn encode_single(doc: &ConfigDocument) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, KIND_SINGLE);
    put_document(&mut buf, doc.key, &doc.payload)?;
    Ok(buf.freeze())
}

/// Serialize every document plus node enablement and certificate
/// references into one bundle.
pub fn encode_full(
    documents: &[ConfigDocument],
    nodes: &[NodeRecord],
    cert_refs: &[CertRef],
) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, KIND_FULL);

    buf.put_u8(documents.len() as u8);
    for doc in documents {
        put_document(&mut buf, doc.key, &doc.payload)?;
    }

    buf.put_u8(nodes.len() as u8);
    for record in nodes {
        buf.put_u8(node_tag(record.node));
        buf.put_u8(record.enabled as u8);
        put_string16(&mut buf, "remark", &record.remark)?;
    }

    buf.put_u8(cert_refs.len() as u8);
    for cert in cert_refs {
        buf.put_u8(slot_tag(cert.slot));
        put_string16(&mut buf, "cert path", &cert.path)?;
    }

    Ok(buf.freeze())
}

/// Parse a single-document bundle.
pub fn decode_single(bytes: &[u8]) -> Result<DocumentDraft> {
    let mut buf = bytes;
    take_header(&mut buf, KIND_SINGLE)?;
    let draft = take_document(&mut buf)?;
    expect_end(buf)?;
    Ok(draft)
}

/// Parse a full bundle, document by document.
pub fn decode_full(bytes: &[u8]) -> Result<FullBundleDraft> {
    let mut buf = bytes;
    take_header(&mut buf, KIND_FULL)?;

    let doc_count = take_u8(&mut buf, "document count")?;
    let mut documents = Vec::with_capacity(doc_count as usize);
    for _ in 0..doc_count {
        documents.push(take_document(&mut buf)?);
    }

    let node_count = take_u8(&mut buf, "node count")?;
    let mut nodes = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        let node = node_from_tag(take_u8(&mut buf, "node tag")?)?;
        let enabled = match take_u8(&mut buf, "node enabled flag")? {
            0 => false,
            1 => true,
            other => {
                return Err(Error::MalformedBundle(format!(
                    "enabled flag must be 0 or 1, got {other}"
                )))
            }
        };
        let remark = take_string16(&mut buf, "node remark")?;
        nodes.push(NodeRecord {
            node,
            enabled,
            remark,
        });
    }

    let cert_count = take_u8(&mut buf, "certificate count")?;
    let mut cert_refs = Vec::with_capacity(cert_count as usize);
    for _ in 0..cert_count {
        let slot = slot_from_tag(take_u8(&mut buf, "certificate slot tag")?)?;
        let path = take_string16(&mut buf, "certificate path")?;
        cert_refs.push(CertRef { slot, path });
    }

    expect_end(buf)?;
    Ok(FullBundleDraft {
        documents,
        nodes,
        cert_refs,
    })
}

fn put_header(buf: &mut BytesMut, kind: u8) {
    buf.put_slice(MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u8(kind);
}

fn put_document(buf: &mut BytesMut, key: ConfigKey, payload: &ConfigPayload) -> Result<()> {
    let body = serde_json::to_vec(payload)
        .map_err(|e| Error::Persistence(format!("encode payload: {e}")))?;
    buf.put_u8(key_tag(key));
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(())
}

/// Write a u16-length-prefixed string, refusing values the length field
/// cannot represent; a wrapped length would encode a bundle that can
/// never be decoded.
fn put_string16(buf: &mut BytesMut, what: &str, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(Error::validation(
            what,
            format!("{} bytes does not fit a bundle record", value.len()),
        ));
    }
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn take_header(buf: &mut &[u8], expected_kind: u8) -> Result<()> {
    if buf.remaining() < MAGIC.len() {
        return Err(Error::MalformedBundle("truncated before magic".into()));
    }
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(Error::MalformedBundle("unknown format magic".into()));
    }
    buf.advance(MAGIC.len());

    let version = take_u8(buf, "format version")?;
    if version != FORMAT_VERSION {
        return Err(Error::MalformedBundle(format!(
            "unsupported format version {version}"
        )));
    }

    let kind = take_u8(buf, "bundle kind")?;
    if kind != expected_kind {
        return Err(Error::MalformedBundle(format!(
            "wrong bundle kind: expected {expected_kind}, got {kind}"
        )));
    }
    Ok(())
}

fn take_document(buf: &mut &[u8]) -> Result<DocumentDraft> {
    let key = key_from_tag(take_u8(buf, "document key tag")?)?;
    let len = take_u32(buf, "payload length")? as usize;
    if len > MAX_SECTION_BYTES {
        return Err(Error::MalformedBundle(format!(
            "payload length {len} exceeds limit"
        )));
    }
    if buf.remaining() < len {
        return Err(Error::MalformedBundle("truncated payload".into()));
    }
    let payload: ConfigPayload = serde_json::from_slice(&buf[..len])
        .map_err(|e| Error::MalformedBundle(format!("payload for {key}: {e}")))?;
    buf.advance(len);

    if !payload.matches_key(key) {
        return Err(Error::MalformedBundle(format!(
            "payload shape does not match key {key}"
        )));
    }
    Ok(DocumentDraft { key, payload })
}

fn take_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(Error::MalformedBundle(format!("truncated at {what}")));
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::MalformedBundle(format!("truncated at {what}")));
    }
    Ok(buf.get_u32())
}

fn take_string16(buf: &mut &[u8], what: &str) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(Error::MalformedBundle(format!("truncated at {what}")));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::MalformedBundle(format!("truncated at {what}")));
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| Error::MalformedBundle(format!("{what} is not UTF-8")))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn expect_end(buf: &[u8]) -> Result<()> {
    if buf.has_remaining() {
        return Err(Error::MalformedBundle(format!(
            "{} trailing bytes after bundle",
            buf.remaining()
        )));
    }
    Ok(())
}

fn key_tag(key: ConfigKey) -> u8 {
    match key {
        ConfigKey::Hysteria2Node1 => 1,
        ConfigKey::Hysteria2Node2 => 2,
        ConfigKey::Socks5 => 3,
    }
}

fn key_from_tag(tag: u8) -> Result<ConfigKey> {
    match tag {
        1 => Ok(ConfigKey::Hysteria2Node1),
        2 => Ok(ConfigKey::Hysteria2Node2),
        3 => Ok(ConfigKey::Socks5),
        other => Err(Error::MalformedBundle(format!("unknown key tag {other}"))),
    }
}

fn node_tag(node: NodeId) -> u8 {
    match node {
        NodeId::Node1 => 1,
        NodeId::Node2 => 2,
    }
}

fn node_from_tag(tag: u8) -> Result<NodeId> {
    match tag {
        1 => Ok(NodeId::Node1),
        2 => Ok(NodeId::Node2),
        other => Err(Error::MalformedBundle(format!("unknown node tag {other}"))),
    }
}

fn slot_tag(slot: CertSlot) -> u8 {
    match slot {
        CertSlot::Certificate => 1,
        CertSlot::PrivateKey => 2,
    }
}

fn slot_from_tag(tag: u8) -> Result<CertSlot> {
    match tag {
        1 => Ok(CertSlot::Certificate),
        2 => Ok(CertSlot::PrivateKey),
        other => Err(Error::MalformedBundle(format!("unknown slot tag {other}"))),
    }
}
