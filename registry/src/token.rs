//! # Credential Token Store
//!
//! Mints one transferable ownership token per successfully issued document
//! and keeps its metadata for off-system viewers and marketplaces.
//!
//! ## Security Model
//!
//! - **Mint gating**: every mint, revoke, and reactivate call presents a
//!   [`MintAuthority`] — a single-assignment capability handle created
//!   together with the store at wiring time. There is no mutable "owner"
//!   field to reassign; whoever holds the handle is the minting authority.
//! - **Global dedup**: a secondary index maps `(content hash, student)` to
//!   the token id, so at most one token can ever be minted for a given
//!   document-student pair, regardless of issuer or timestamp.
//! - **Ownership is orthogonal to validity**: transferring a token never
//!   touches its metadata, and revocation never moves the token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::roles::Principal;
use crate::students::StudentId;

/// Sequential token identifier, assigned from 1.
pub type TokenId = u64;

/// Process-wide store id source, so a capability handle can never be
/// replayed against a different store instance.
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during token-store operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The referenced token id has never been minted.
    #[error("token not found: {0}")]
    NotFound(TokenId),

    /// A token already exists for this (content hash, student) pair.
    #[error("already minted: token {0} covers this document and student")]
    AlreadyMinted(TokenId),

    /// The token is already revoked.
    #[error("token {0} is already revoked")]
    AlreadyRevoked(TokenId),

    /// The token is already valid.
    #[error("token {0} is already valid")]
    AlreadyValid(TokenId),

    /// The presented capability was issued by a different store.
    #[error("mint authority does not belong to this store")]
    ForeignAuthority,

    /// The caller does not hold the token it tried to transfer.
    #[error("unauthorized: {caller} does not hold token {token}")]
    NotHolder {
        /// The principal that attempted the transfer.
        caller: Principal,
        /// The token involved.
        token: TokenId,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The kind of academic document a credential covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// A full academic transcript.
    Transcript,
    /// A degree diploma.
    Diploma,
    /// A course-completion certificate.
    Certificate,
    /// A proof of current enrollment.
    EnrollmentProof,
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Transcript => write!(f, "Transcript"),
            DocumentKind::Diploma => write!(f, "Diploma"),
            DocumentKind::Certificate => write!(f, "Certificate"),
            DocumentKind::EnrollmentProof => write!(f, "EnrollmentProof"),
        }
    }
}

/// The single-assignment minting capability for one token store.
///
/// Created exactly once, by [`CredentialTokenStore::new`], and handed to
/// whichever component is wired as the store's sole writer. Deliberately
/// neither `Clone` nor serializable — the handle itself is the privilege.
#[derive(Debug)]
pub struct MintAuthority {
    store: u64,
}

/// Metadata recorded for a minted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// The student the credential was issued to.
    pub student_id: StudentId,
    /// Document kind.
    pub kind: DocumentKind,
    /// Content hash of the underlying document.
    pub content_hash: String,
    /// Off-system resource locator (e.g. an IPFS URI).
    pub uri: String,
    /// Mint timestamp.
    pub issued_at: DateTime<Utc>,
    /// Principal that requested the issuance.
    pub issued_by: Principal,
    /// Whether the credential is currently valid. Flipped by revoke and
    /// reactivate; the record itself is permanent.
    pub valid: bool,
}

/// The credential token store.
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialTokenStore {
    /// Identity of this store, matched against presented capabilities.
    store_id: u64,
    /// Token metadata keyed by id.
    tokens: HashMap<TokenId, TokenMetadata>,
    /// Current holder of each token.
    holders: HashMap<TokenId, Principal>,
    /// Per-holder token lists. Unordered — transfers swap-remove.
    holdings: HashMap<Principal, Vec<TokenId>>,
    /// Global dedup index: `"<hash>:<student>"` -> token id.
    dedup_index: HashMap<String, TokenId>,
    /// Per-student token lists, in mint order.
    student_tokens: HashMap<StudentId, Vec<TokenId>>,
    /// Next token id to assign. Starts at 1.
    next_token_id: TokenId,
}

/// Key for the global dedup index. A composed string rather than a tuple so
/// the store stays serializable as plain JSON.
fn dedup_key(content_hash: &str, student_id: StudentId) -> String {
    format!("{content_hash}:{student_id}")
}

impl CredentialTokenStore {
    /// Creates an empty store together with its one and only minting
    /// capability. The caller decides who gets the handle.
    pub fn new() -> (Self, MintAuthority) {
        let store_id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        let store = Self {
            store_id,
            tokens: HashMap::new(),
            holders: HashMap::new(),
            holdings: HashMap::new(),
            dedup_index: HashMap::new(),
            student_tokens: HashMap::new(),
            next_token_id: 1,
        };
        (store, MintAuthority { store: store_id })
    }

    /// Mints a token for an issued document and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ForeignAuthority`] if `auth` was issued by a
    /// different store.
    /// Returns [`TokenError::AlreadyMinted`] if a token already covers this
    /// (content hash, student) pair — the durable global-dedup guarantee.
    #[allow(clippy::too_many_arguments)]
    pub fn mint(
        &mut self,
        auth: &MintAuthority,
        student_id: StudentId,
        recipient: Principal,
        kind: DocumentKind,
        content_hash: String,
        uri: String,
        issued_by: Principal,
    ) -> Result<TokenId, TokenError> {
        self.verify(auth)?;

        let key = dedup_key(&content_hash, student_id);
        if let Some(existing) = self.dedup_index.get(&key) {
            return Err(TokenError::AlreadyMinted(*existing));
        }

        let id = self.next_token_id;
        self.next_token_id += 1;

        self.tokens.insert(
            id,
            TokenMetadata {
                student_id,
                kind,
                content_hash,
                uri,
                issued_at: Utc::now(),
                issued_by,
                valid: true,
            },
        );
        self.dedup_index.insert(key, id);
        self.student_tokens.entry(student_id).or_default().push(id);
        self.holders.insert(id, recipient.clone());
        self.holdings.entry(recipient).or_default().push(id);

        Ok(id)
    }

    /// Marks the token invalid.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ForeignAuthority`] for a mismatched capability.
    /// Returns [`TokenError::NotFound`] for an unused id.
    /// Returns [`TokenError::AlreadyRevoked`] if already invalid.
    pub fn revoke(&mut self, auth: &MintAuthority, id: TokenId) -> Result<(), TokenError> {
        self.verify(auth)?;
        let meta = self.tokens.get_mut(&id).ok_or(TokenError::NotFound(id))?;
        if !meta.valid {
            return Err(TokenError::AlreadyRevoked(id));
        }
        meta.valid = false;
        Ok(())
    }

    /// Marks the token valid again.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ForeignAuthority`] for a mismatched capability.
    /// Returns [`TokenError::NotFound`] for an unused id.
    /// Returns [`TokenError::AlreadyValid`] if already valid.
    pub fn reactivate(&mut self, auth: &MintAuthority, id: TokenId) -> Result<(), TokenError> {
        self.verify(auth)?;
        let meta = self.tokens.get_mut(&id).ok_or(TokenError::NotFound(id))?;
        if meta.valid {
            return Err(TokenError::AlreadyValid(id));
        }
        meta.valid = true;
        Ok(())
    }

    /// Returns whether the token is currently valid. False for ids that
    /// have never been minted — callers that need to distinguish "never
    /// existed" should combine this with [`metadata`](Self::metadata).
    pub fn is_valid(&self, id: TokenId) -> bool {
        self.tokens.get(&id).is_some_and(|meta| meta.valid)
    }

    /// Fetches token metadata.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::NotFound`] for an unused id.
    pub fn metadata(&self, id: TokenId) -> Result<&TokenMetadata, TokenError> {
        self.tokens.get(&id).ok_or(TokenError::NotFound(id))
    }

    /// Returns the token id covering `(content_hash, student_id)`, if one
    /// was ever minted.
    pub fn token_for_document(
        &self,
        content_hash: &str,
        student_id: StudentId,
    ) -> Option<TokenId> {
        self.dedup_index
            .get(&dedup_key(content_hash, student_id))
            .copied()
    }

    /// Token ids minted for a student, in mint order. Empty for unknown
    /// students.
    pub fn tokens_of_student(&self, student_id: StudentId) -> &[TokenId] {
        self.student_tokens
            .get(&student_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of tokens ever minted.
    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    // -----------------------------------------------------------------------
    // Ownership layer (external-viewer compatible)
    // -----------------------------------------------------------------------

    /// Returns the current holder of a token, or `None` if it was never
    /// minted.
    pub fn owner_of(&self, id: TokenId) -> Option<&str> {
        self.holders.get(&id).map(String::as_str)
    }

    /// Token ids currently held by `holder`. Order is unspecified.
    pub fn tokens_of_holder(&self, holder: &str) -> &[TokenId] {
        self.holdings
            .get(holder)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Transfers a token to a new holder. Holder-gated — no capability is
    /// involved, and metadata (including validity) is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::NotFound`] for an unused id.
    /// Returns [`TokenError::NotHolder`] if `caller` does not hold the token.
    pub fn transfer(
        &mut self,
        caller: &str,
        id: TokenId,
        to: Principal,
    ) -> Result<(), TokenError> {
        let holder = self.holders.get_mut(&id).ok_or(TokenError::NotFound(id))?;
        if holder != caller {
            return Err(TokenError::NotHolder {
                caller: caller.to_string(),
                token: id,
            });
        }

        if let Some(list) = self.holdings.get_mut(caller) {
            if let Some(pos) = list.iter().position(|t| *t == id) {
                list.swap_remove(pos);
            }
        }
        *holder = to.clone();
        self.holdings.entry(to).or_default().push(id);
        Ok(())
    }

    fn verify(&self, auth: &MintAuthority) -> Result<(), TokenError> {
        if auth.store != self.store_id {
            return Err(TokenError::ForeignAuthority);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint_one(
        store: &mut CredentialTokenStore,
        auth: &MintAuthority,
        student: StudentId,
        hash: &str,
    ) -> TokenId {
        store
            .mint(
                auth,
                student,
                format!("wallet_{student}"),
                DocumentKind::Transcript,
                hash.into(),
                "ipfs://x".into(),
                "manager".into(),
            )
            .unwrap()
    }

    #[test]
    fn mint_assigns_sequential_ids() {
        let (mut store, auth) = CredentialTokenStore::new();
        assert_eq!(mint_one(&mut store, &auth, 1, "h1"), 1);
        assert_eq!(mint_one(&mut store, &auth, 2, "h2"), 2);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn duplicate_document_student_pair_rejected() {
        let (mut store, auth) = CredentialTokenStore::new();
        let first = mint_one(&mut store, &auth, 1, "hash");

        // Different issuer and uri, same (hash, student): still rejected.
        let result = store.mint(
            &auth,
            1,
            "other_wallet".into(),
            DocumentKind::Diploma,
            "hash".into(),
            "ipfs://y".into(),
            "other_manager".into(),
        );
        assert!(matches!(result, Err(TokenError::AlreadyMinted(id)) if id == first));

        // Same hash for a different student is fine.
        assert_eq!(mint_one(&mut store, &auth, 2, "hash"), 2);
    }

    #[test]
    fn foreign_authority_rejected() {
        let (mut store_a, _auth_a) = CredentialTokenStore::new();
        let (_store_b, auth_b) = CredentialTokenStore::new();

        let result = store_a.mint(
            &auth_b,
            1,
            "w".into(),
            DocumentKind::Certificate,
            "h".into(),
            "u".into(),
            "m".into(),
        );
        assert!(matches!(result, Err(TokenError::ForeignAuthority)));
    }

    #[test]
    fn revoke_reactivate_roundtrip() {
        let (mut store, auth) = CredentialTokenStore::new();
        let id = mint_one(&mut store, &auth, 1, "h");
        assert!(store.is_valid(id));

        store.revoke(&auth, id).unwrap();
        assert!(!store.is_valid(id));
        assert!(matches!(
            store.revoke(&auth, id),
            Err(TokenError::AlreadyRevoked(_))
        ));

        store.reactivate(&auth, id).unwrap();
        assert!(store.is_valid(id));
        assert!(matches!(
            store.reactivate(&auth, id),
            Err(TokenError::AlreadyValid(_))
        ));
    }

    #[test]
    fn is_valid_false_for_unknown_ids() {
        let (store, _auth) = CredentialTokenStore::new();
        assert!(!store.is_valid(99));
        assert!(store.metadata(99).is_err());
    }

    #[test]
    fn revoked_token_still_enumerable() {
        let (mut store, auth) = CredentialTokenStore::new();
        let id = mint_one(&mut store, &auth, 7, "h");
        store.revoke(&auth, id).unwrap();

        assert_eq!(store.tokens_of_student(7), &[id]);
        assert_eq!(store.token_for_document("h", 7), Some(id));
    }

    #[test]
    fn transfer_moves_holdership_only() {
        let (mut store, auth) = CredentialTokenStore::new();
        let id = mint_one(&mut store, &auth, 1, "h");
        assert_eq!(store.owner_of(id), Some("wallet_1"));

        store.transfer("wallet_1", id, "collector".into()).unwrap();
        assert_eq!(store.owner_of(id), Some("collector"));
        assert_eq!(store.tokens_of_holder("wallet_1"), &[] as &[TokenId]);
        assert_eq!(store.tokens_of_holder("collector"), &[id]);

        // Metadata untouched: still valid, still attributed to the student.
        assert!(store.is_valid(id));
        assert_eq!(store.metadata(id).unwrap().student_id, 1);
    }

    #[test]
    fn transfer_of_revoked_token_does_not_reactivate() {
        let (mut store, auth) = CredentialTokenStore::new();
        let id = mint_one(&mut store, &auth, 1, "h");
        store.revoke(&auth, id).unwrap();

        store.transfer("wallet_1", id, "collector".into()).unwrap();
        assert!(!store.is_valid(id));
    }

    #[test]
    fn transfer_by_non_holder_rejected() {
        let (mut store, auth) = CredentialTokenStore::new();
        let id = mint_one(&mut store, &auth, 1, "h");
        let result = store.transfer("mallory", id, "mallory".into());
        assert!(matches!(result, Err(TokenError::NotHolder { .. })));
        assert_eq!(store.owner_of(id), Some("wallet_1"));
    }

    #[test]
    fn store_serialization_roundtrip() {
        let (mut store, auth) = CredentialTokenStore::new();
        let id = mint_one(&mut store, &auth, 1, "h");

        let json = serde_json::to_string(&store).unwrap();
        let restored: CredentialTokenStore = serde_json::from_str(&json).unwrap();
        assert!(restored.is_valid(id));
        assert_eq!(restored.token_for_document("h", 1), Some(id));
        assert_eq!(restored.owner_of(id), Some("wallet_1"));
    }
}
