//! # Credential Ledger
//!
//! Records document-issuance facts keyed by a derived identifier, the
//! *ledger key*: a SHA-256 digest over the document content hash, the
//! student id, the issuance timestamp, the issuer, and a monotonic
//! sequence number. Including the sequence number makes the derivation
//! collision-resistant even when the host hands out identical timestamps
//! for rapid repeated calls.
//!
//! Records are append-only: once inserted, only the `valid` flag ever
//! changes, and every flip is idempotent-guarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

use crate::roles::Principal;
use crate::students::StudentId;
use crate::token::{DocumentKind, TokenId};

/// Hex-encoded SHA-256 digest identifying one issuance record.
pub type LedgerKey = String;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No record exists under this key.
    #[error("document record not found: {0}")]
    NotFound(LedgerKey),

    /// A record already exists under this key.
    #[error("duplicate document: a record already exists under key {0}")]
    DuplicateDocument(LedgerKey),

    /// The record is already revoked.
    #[error("document {0} is already revoked")]
    AlreadyRevoked(LedgerKey),

    /// The record is already valid.
    #[error("document {0} is already valid")]
    AlreadyValid(LedgerKey),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One issuance fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// The ownership token minted for this issuance.
    pub token_id: TokenId,
    /// Content hash of the signed document.
    pub content_hash: String,
    /// The student the document was issued to.
    pub student_id: StudentId,
    /// Issuance timestamp.
    pub created_at: DateTime<Utc>,
    /// The manager that issued the document.
    pub issuer: Principal,
    /// Document kind.
    pub kind: DocumentKind,
    /// Whether the issuance is currently valid.
    pub valid: bool,
}

/// Derives the ledger key for an issuance attempt.
///
/// The digest mixes everything that identifies the attempt plus `sequence`,
/// a per-orchestrator monotonic counter, so two attempts can never share a
/// key even within the same timestamp tick.
pub fn derive_ledger_key(
    content_hash: &str,
    student_id: StudentId,
    timestamp: DateTime<Utc>,
    issuer: &str,
    sequence: u64,
) -> LedgerKey {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(student_id.to_be_bytes());
    hasher.update(timestamp.timestamp_millis().to_be_bytes());
    hasher.update(issuer.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// The credential ledger — issuance records plus lookup indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialLedger {
    /// Records keyed by derived ledger key.
    records: HashMap<LedgerKey, DocumentRecord>,
    /// Secondary index: token id -> ledger key.
    token_index: HashMap<TokenId, LedgerKey>,
    /// Per-student ledger keys, in issuance order.
    student_index: HashMap<StudentId, Vec<LedgerKey>>,
}

impl CredentialLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a record exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Inserts a new record under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateDocument`] if the key is taken —
    /// collisions are rejected, never overwritten.
    pub fn insert(&mut self, key: LedgerKey, record: DocumentRecord) -> Result<(), LedgerError> {
        if self.records.contains_key(&key) {
            return Err(LedgerError::DuplicateDocument(key));
        }
        self.token_index.insert(record.token_id, key.clone());
        self.student_index
            .entry(record.student_id)
            .or_default()
            .push(key.clone());
        self.records.insert(key, record);
        Ok(())
    }

    /// Fetches a record by ledger key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown key.
    pub fn get(&self, key: &str) -> Result<&DocumentRecord, LedgerError> {
        self.records
            .get(key)
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))
    }

    /// Fetches the ledger key and record for a token id, if the token was
    /// minted through this ledger.
    pub fn get_by_token(&self, token_id: TokenId) -> Option<(&LedgerKey, &DocumentRecord)> {
        let key = self.token_index.get(&token_id)?;
        self.records.get(key).map(|record| (key, record))
    }

    /// Flips the record to invalid.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown key.
    /// Returns [`LedgerError::AlreadyRevoked`] if already invalid.
    pub fn revoke(&mut self, key: &str) -> Result<(), LedgerError> {
        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
        if !record.valid {
            return Err(LedgerError::AlreadyRevoked(key.to_string()));
        }
        record.valid = false;
        Ok(())
    }

    /// Flips the record back to valid.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] for an unknown key.
    /// Returns [`LedgerError::AlreadyValid`] if already valid.
    pub fn reactivate(&mut self, key: &str) -> Result<(), LedgerError> {
        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;
        if record.valid {
            return Err(LedgerError::AlreadyValid(key.to_string()));
        }
        record.valid = true;
        Ok(())
    }

    /// Ledger keys issued for a student, in issuance order. Empty for
    /// unknown students.
    pub fn keys_of_student(&self, student_id: StudentId) -> &[LedgerKey] {
        self.student_index
            .get(&student_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of issuance records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing has been issued yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
