//! # Tessera Registry
//!
//! Core of the Tessera institutional credential system: a central
//! authorization and role ledger plus a content-addressed
//! document-issuance-and-notarization engine that mints one transferable
//! ownership token per issued document.
//!
//! - **Roles** — the authoritative role/identity table, manager allow-list,
//!   and student directory. Everything else queries it for authorization.
//! - **Ledger** — issuance facts keyed by a derived identifier, with
//!   collision rejection and idempotent validity toggles.
//! - **Token** — one ownership token per issued document, with a global
//!   (hash, student) dedup index and a holder/transfer layer.
//! - **Notary** — the single writer over ledger and token store. Holds the
//!   store's minting capability and keeps both validity flags in sync.
//! - **Institution** — wiring facade; constructs everything in dependency
//!   order and registers the deployer as administrator.
//!
//! ## Design Principles
//!
//! 1. State transitions are sequential and transactional: every entry
//!    point either fully applies its writes or fails with a specific
//!    reason, leaving all tables unchanged.
//! 2. Nothing is ever deleted. Deactivation and revocation flip flags;
//!    ids and records are permanent history.
//! 3. Absence is explicit: lookups return `Option` / `Result`, never a
//!    magic zero.
//! 4. Privilege is a value, not a field: minting requires the capability
//!    handle created at wiring time.
//! 5. Every public type is serializable (serde) for wire transport and
//!    persistent storage — except capability handles, deliberately.

pub mod institution;
pub mod ledger;
pub mod notary;
pub mod roles;
pub mod students;
pub mod token;

pub use institution::Institution;
pub use ledger::{CredentialLedger, DocumentRecord, LedgerError, LedgerKey};
pub use notary::{DocumentNotary, NotaryError, SignedDocument};
pub use roles::{AccessError, AccessRegistry, AccountEntry, Principal, Role};
pub use students::{NewStudent, StudentDirectory, StudentError, StudentId, StudentRecord};
pub use token::{
    CredentialTokenStore, DocumentKind, MintAuthority, TokenError, TokenId, TokenMetadata,
};
