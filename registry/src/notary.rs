//! # Document Notary
//!
//! The issuance orchestrator: the only writer over the credential ledger
//! and the token store. It cross-checks the access registry before
//! accepting an issuance request, derives the ledger key, and keeps the
//! ledger record and the token's validity flag moving through one
//! transactional path so the two can never drift apart.
//!
//! Issuance is atomic from the caller's perspective: the token is minted
//! first, and the ledger record is written only after the mint succeeds.
//! Every failure leaves both stores untouched.

use serde::{Deserialize, Serialize};

use crate::ledger::{derive_ledger_key, CredentialLedger, DocumentRecord, LedgerError, LedgerKey};
use crate::roles::{AccessRegistry, Principal, Role};
use crate::students::StudentId;
use crate::token::{
    CredentialTokenStore, DocumentKind, MintAuthority, TokenError, TokenId, TokenMetadata,
};
use chrono::Utc;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during notarization operations.
#[derive(Debug, Error)]
pub enum NotaryError {
    /// The caller does not hold the `Manager` role.
    #[error("unauthorized: caller {0} does not hold the Manager role")]
    NotManager(Principal),

    /// The caller lacks administrator privileges.
    #[error("unauthorized: caller {0} lacks administrator privileges")]
    NotAdmin(Principal),

    /// The document content hash was empty.
    #[error("content hash is required")]
    HashRequired,

    /// The target student does not exist.
    #[error("student not found: id {0}")]
    StudentNotFound(StudentId),

    /// The target student is deactivated.
    #[error("student {0} is inactive")]
    StudentInactive(StudentId),

    /// The target student has no linked wallet to receive the token.
    #[error("student {0} has no linked wallet")]
    NoWallet(StudentId),

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A token-store operation failed.
    #[error(transparent)]
    Token(#[from] TokenError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The receipt returned by a successful issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDocument {
    /// Derived key of the ledger record.
    pub ledger_key: LedgerKey,
    /// Id of the ownership token minted for the student.
    pub token_id: TokenId,
}

/// The document notary. Owns the ledger, the token store, and the store's
/// minting capability; reads the access registry through borrowed
/// references and never mutates it.
#[derive(Debug)]
pub struct DocumentNotary {
    ledger: CredentialLedger,
    tokens: CredentialTokenStore,
    authority: MintAuthority,
    /// Monotonic issuance counter mixed into key derivation.
    sequence: u64,
}

impl DocumentNotary {
    /// Creates a notary over `tokens`, holding `authority` as its minting
    /// capability. The wiring layer creates the pair and hands both here —
    /// after construction nothing else can mint into the store.
    pub fn new(tokens: CredentialTokenStore, authority: MintAuthority) -> Self {
        Self {
            ledger: CredentialLedger::new(),
            tokens,
            authority,
            sequence: 0,
        }
    }

    /// Issues a document to a student: validates the request against the
    /// registry, mints the ownership token, and records the issuance fact.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::NotManager`] unless `caller` holds the
    /// `Manager` role.
    /// Returns [`NotaryError::HashRequired`] for an empty content hash.
    /// Returns [`NotaryError::StudentNotFound`] / [`NotaryError::StudentInactive`] /
    /// [`NotaryError::NoWallet`] when the target student cannot receive a
    /// credential.
    /// Returns [`TokenError::AlreadyMinted`] (wrapped) if a token already
    /// covers this (hash, student) pair; no ledger record is written in
    /// that case.
    pub fn sign_document(
        &mut self,
        caller: &str,
        registry: &AccessRegistry,
        content_hash: &str,
        student_id: StudentId,
        kind: DocumentKind,
        uri: &str,
    ) -> Result<SignedDocument, NotaryError> {
        if registry.role_of(caller) != Role::Manager {
            return Err(NotaryError::NotManager(caller.to_string()));
        }
        if content_hash.is_empty() {
            return Err(NotaryError::HashRequired);
        }

        let student = registry
            .student(student_id)
            .map_err(|_| NotaryError::StudentNotFound(student_id))?;
        if !student.active {
            return Err(NotaryError::StudentInactive(student_id));
        }
        if student.wallet.is_empty() {
            return Err(NotaryError::NoWallet(student_id));
        }
        let recipient = student.wallet.clone();

        let now = Utc::now();
        self.sequence += 1;
        let key = derive_ledger_key(content_hash, student_id, now, caller, self.sequence);
        if self.ledger.contains(&key) {
            return Err(LedgerError::DuplicateDocument(key).into());
        }

        // Mint before writing the ledger record: a dedup rejection at the
        // token store must leave the ledger untouched.
        let token_id = self.tokens.mint(
            &self.authority,
            student_id,
            recipient,
            kind,
            content_hash.to_string(),
            uri.to_string(),
            caller.to_string(),
        )?;

        self.ledger.insert(
            key.clone(),
            DocumentRecord {
                token_id,
                content_hash: content_hash.to_string(),
                student_id,
                created_at: now,
                issuer: caller.to_string(),
                kind,
                valid: true,
            },
        )?;

        Ok(SignedDocument {
            ledger_key: key,
            token_id,
        })
    }

    /// Revokes an issued document: flips the ledger record and forwards
    /// the flip to the token store so both validity flags stay in sync.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::NotAdmin`] unless `caller` is an administrator.
    /// Returns [`LedgerError::NotFound`] (wrapped) for an unknown key.
    /// Returns [`LedgerError::AlreadyRevoked`] (wrapped) if already revoked.
    pub fn revoke_document(
        &mut self,
        caller: &str,
        registry: &AccessRegistry,
        key: &str,
    ) -> Result<(), NotaryError> {
        self.ensure_admin(caller, registry)?;

        let record = self.ledger.get(key)?;
        if !record.valid {
            return Err(LedgerError::AlreadyRevoked(key.to_string()).into());
        }
        let token_id = record.token_id;

        // Token first: the ledger flip below cannot fail after the checks
        // above, so a token-store failure aborts with nothing applied.
        self.tokens.revoke(&self.authority, token_id)?;
        self.ledger.revoke(key)?;
        Ok(())
    }

    /// Reactivates a revoked document, restoring both validity flags.
    ///
    /// # Errors
    ///
    /// Returns [`NotaryError::NotAdmin`] unless `caller` is an administrator.
    /// Returns [`LedgerError::NotFound`] (wrapped) for an unknown key.
    /// Returns [`LedgerError::AlreadyValid`] (wrapped) if already valid.
    pub fn reactivate_document(
        &mut self,
        caller: &str,
        registry: &AccessRegistry,
        key: &str,
    ) -> Result<(), NotaryError> {
        self.ensure_admin(caller, registry)?;

        let record = self.ledger.get(key)?;
        if record.valid {
            return Err(LedgerError::AlreadyValid(key.to_string()).into());
        }
        let token_id = record.token_id;

        self.tokens.reactivate(&self.authority, token_id)?;
        self.ledger.reactivate(key)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetches an issuance record by ledger key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] (wrapped) for an unknown key.
    pub fn document(&self, key: &str) -> Result<&DocumentRecord, NotaryError> {
        Ok(self.ledger.get(key)?)
    }

    /// Fetches the ledger key and record behind a token id, if any.
    pub fn document_by_token(&self, token_id: TokenId) -> Option<(&LedgerKey, &DocumentRecord)> {
        self.ledger.get_by_token(token_id)
    }

    /// Ledger keys issued for a student, in issuance order.
    pub fn documents_of_student(&self, student_id: StudentId) -> &[LedgerKey] {
        self.ledger.keys_of_student(student_id)
    }

    /// Token ids minted for a student, proxied from the token store.
    pub fn tokens_of_student(&self, student_id: StudentId) -> &[TokenId] {
        self.tokens.tokens_of_student(student_id)
    }

    /// Whether the token is currently valid. False for unknown ids.
    pub fn is_token_valid(&self, token_id: TokenId) -> bool {
        self.tokens.is_valid(token_id)
    }

    /// Token metadata by id.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::NotFound`] (wrapped) for an unused id.
    pub fn token_metadata(&self, token_id: TokenId) -> Result<&TokenMetadata, NotaryError> {
        Ok(self.tokens.metadata(token_id)?)
    }

    /// Current holder of a token, or `None` if never minted.
    pub fn token_owner(&self, token_id: TokenId) -> Option<&str> {
        self.tokens.owner_of(token_id)
    }

    /// Token ids currently held by `holder`.
    pub fn tokens_of_holder(&self, holder: &str) -> &[TokenId] {
        self.tokens.tokens_of_holder(holder)
    }

    /// Transfers a token to a new holder. Holder-gated; validity and
    /// metadata are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::NotFound`] / [`TokenError::NotHolder`] (wrapped).
    pub fn transfer_token(
        &mut self,
        caller: &str,
        token_id: TokenId,
        to: Principal,
    ) -> Result<(), NotaryError> {
        Ok(self.tokens.transfer(caller, token_id, to)?)
    }

    /// Total number of issuance records.
    pub fn document_count(&self) -> usize {
        self.ledger.len()
    }

    /// Total number of tokens ever minted.
    pub fn token_count(&self) -> usize {
        self.tokens.count()
    }

    fn ensure_admin(&self, caller: &str, registry: &AccessRegistry) -> Result<(), NotaryError> {
        if !registry.is_admin(caller) {
            return Err(NotaryError::NotAdmin(caller.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::students::NewStudent;

    /// Helper: registry with one admin ("admin"), one manager ("manager"),
    /// and one active student, plus a fresh notary.
    fn setup() -> (AccessRegistry, DocumentNotary, StudentId) {
        let mut registry = AccessRegistry::new("admin");
        registry.add_manager("admin", "manager").unwrap();
        let student_id = registry
            .register_student(
                "admin",
                NewStudent {
                    wallet: "student_wallet".into(),
                    code: "S001".into(),
                    name: "Grace Hopper".into(),
                    email: "grace@example.edu".into(),
                },
            )
            .unwrap();

        let (tokens, authority) = CredentialTokenStore::new();
        let notary = DocumentNotary::new(tokens, authority);
        (registry, notary, student_id)
    }

    #[test]
    fn sign_document_mints_and_records() {
        let (registry, mut notary, student_id) = setup();
        let signed = notary
            .sign_document(
                "manager",
                &registry,
                "abcd",
                student_id,
                DocumentKind::Transcript,
                "ipfs://x",
            )
            .unwrap();

        assert_eq!(signed.token_id, 1);
        let record = notary.document(&signed.ledger_key).unwrap();
        assert_eq!(record.token_id, signed.token_id);
        assert_eq!(record.issuer, "manager");
        assert!(record.valid);
        assert!(notary.is_token_valid(signed.token_id));
        assert_eq!(notary.token_owner(signed.token_id), Some("student_wallet"));
    }

    #[test]
    fn non_manager_cannot_sign() {
        let (registry, mut notary, student_id) = setup();
        for caller in ["admin", "student_wallet", "stranger"] {
            let result = notary.sign_document(
                caller,
                &registry,
                "abcd",
                student_id,
                DocumentKind::Transcript,
                "ipfs://x",
            );
            assert!(
                matches!(result, Err(NotaryError::NotManager(_))),
                "{caller} must not be able to sign"
            );
        }
        assert_eq!(notary.document_count(), 0);
        assert_eq!(notary.token_count(), 0);
    }

    #[test]
    fn empty_hash_rejected() {
        let (registry, mut notary, student_id) = setup();
        let result = notary.sign_document(
            "manager",
            &registry,
            "",
            student_id,
            DocumentKind::Transcript,
            "ipfs://x",
        );
        assert!(matches!(result, Err(NotaryError::HashRequired)));
    }

    #[test]
    fn unknown_student_rejected() {
        let (registry, mut notary, _) = setup();
        let result = notary.sign_document(
            "manager",
            &registry,
            "abcd",
            999,
            DocumentKind::Transcript,
            "ipfs://x",
        );
        assert!(matches!(result, Err(NotaryError::StudentNotFound(999))));
    }

    #[test]
    fn inactive_student_rejected() {
        let (mut registry, mut notary, student_id) = setup();
        registry.deactivate_student("admin", student_id).unwrap();

        let result = notary.sign_document(
            "manager",
            &registry,
            "abcd",
            student_id,
            DocumentKind::Transcript,
            "ipfs://x",
        );
        assert!(matches!(result, Err(NotaryError::StudentInactive(_))));
    }

    #[test]
    fn duplicate_issuance_blocked_by_token_dedup() {
        let (mut registry, mut notary, student_id) = setup();
        notary
            .sign_document(
                "manager",
                &registry,
                "abcd",
                student_id,
                DocumentKind::Transcript,
                "ipfs://x",
            )
            .unwrap();

        // Different issuer, later timestamp — the (hash, student) pair is
        // still globally deduplicated, and the failed attempt leaves no
        // ledger record behind.
        registry.add_manager("admin", "manager2").unwrap();
        let result = notary.sign_document(
            "manager2",
            &registry,
            "abcd",
            student_id,
            DocumentKind::Transcript,
            "ipfs://y",
        );
        assert!(matches!(
            result,
            Err(NotaryError::Token(TokenError::AlreadyMinted(1)))
        ));
        assert_eq!(notary.document_count(), 1);
        assert_eq!(notary.token_count(), 1);
    }

    #[test]
    fn revoke_syncs_both_validity_flags() {
        let (registry, mut notary, student_id) = setup();
        let signed = notary
            .sign_document(
                "manager",
                &registry,
                "abcd",
                student_id,
                DocumentKind::Diploma,
                "ipfs://x",
            )
            .unwrap();

        notary
            .revoke_document("admin", &registry, &signed.ledger_key)
            .unwrap();
        assert!(!notary.document(&signed.ledger_key).unwrap().valid);
        assert!(!notary.is_token_valid(signed.token_id));

        // Idempotent guard.
        let again = notary.revoke_document("admin", &registry, &signed.ledger_key);
        assert!(matches!(
            again,
            Err(NotaryError::Ledger(LedgerError::AlreadyRevoked(_)))
        ));
    }

    #[test]
    fn reactivate_restores_both_flags() {
        let (registry, mut notary, student_id) = setup();
        let signed = notary
            .sign_document(
                "manager",
                &registry,
                "abcd",
                student_id,
                DocumentKind::Diploma,
                "ipfs://x",
            )
            .unwrap();

        notary
            .revoke_document("admin", &registry, &signed.ledger_key)
            .unwrap();
        notary
            .reactivate_document("admin", &registry, &signed.ledger_key)
            .unwrap();

        assert!(notary.document(&signed.ledger_key).unwrap().valid);
        assert!(notary.is_token_valid(signed.token_id));

        let again = notary.reactivate_document("admin", &registry, &signed.ledger_key);
        assert!(matches!(
            again,
            Err(NotaryError::Ledger(LedgerError::AlreadyValid(_)))
        ));
    }

    #[test]
    fn revoke_is_admin_gated() {
        let (registry, mut notary, student_id) = setup();
        let signed = notary
            .sign_document(
                "manager",
                &registry,
                "abcd",
                student_id,
                DocumentKind::Transcript,
                "ipfs://x",
            )
            .unwrap();

        let result = notary.revoke_document("manager", &registry, &signed.ledger_key);
        assert!(matches!(result, Err(NotaryError::NotAdmin(_))));
        assert!(notary.is_token_valid(signed.token_id));
    }

    #[test]
    fn revoke_unknown_key_not_found() {
        let (registry, mut notary, _) = setup();
        let result = notary.revoke_document("admin", &registry, "no_such_key");
        assert!(matches!(
            result,
            Err(NotaryError::Ledger(LedgerError::NotFound(_)))
        ));
    }

    #[test]
    fn lookup_by_token_and_per_student_enumeration() {
        let (registry, mut notary, student_id) = setup();
        let a = notary
            .sign_document(
                "manager",
                &registry,
                "h1",
                student_id,
                DocumentKind::Transcript,
                "ipfs://1",
            )
            .unwrap();
        let b = notary
            .sign_document(
                "manager",
                &registry,
                "h2",
                student_id,
                DocumentKind::Certificate,
                "ipfs://2",
            )
            .unwrap();

        let (key, record) = notary.document_by_token(a.token_id).unwrap();
        assert_eq!(key, &a.ledger_key);
        assert_eq!(record.content_hash, "h1");

        assert_eq!(
            notary.documents_of_student(student_id),
            &[a.ledger_key.clone(), b.ledger_key.clone()]
        );
        assert_eq!(
            notary.tokens_of_student(student_id),
            &[a.token_id, b.token_id]
        );
    }
}
