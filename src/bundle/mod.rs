//! Portable configuration bundles.
//!
//! Export and import of configuration as an opaque, versioned binary
//! envelope rather than raw JSON: shape drift between releases is
//! detected at import time (bad magic, unknown tag, bad length) instead
//! of silently corrupting state.
//!
//! Document versions never travel on the wire; importing always mints a
//! new version through the normal commit path, and imported drafts pass
//! through validation before any commit.

pub mod codec;

use crate::certs::CertSlot;
use crate::config::schema::{ConfigKey, ConfigPayload};
use crate::orchestrator::NodeRecord;

pub use codec::{decode_full, decode_single, encode_full, encode_single};

/// A parsed, not-yet-committed document from an imported bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDraft {
    pub key: ConfigKey,
    pub payload: ConfigPayload,
}

/// Reference to a stored certificate asset inside a full bundle.
///
/// Only the reference travels; certificate bytes stay with the
/// certificate manager.
#[derive(Debug, Clone, PartialEq)]
pub struct CertRef {
    pub slot: CertSlot,
    pub path: String,
}

/// A parsed full-deployment bundle awaiting validation and commit.
#[derive(Debug, Clone, PartialEq)]
pub struct FullBundleDraft {
    pub documents: Vec<DocumentDraft>,
    pub nodes: Vec<NodeRecord>,
    pub cert_refs: Vec<CertRef>,
}
