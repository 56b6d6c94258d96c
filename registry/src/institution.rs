//! # Institution Wiring
//!
//! Bootstraps a complete institution in dependency order: access registry
//! first, then the token store together with its minting capability, then
//! the notary that receives the capability. The deploying principal ends
//! up as registry owner with the `Admin` role.
//!
//! [`Institution`] is the facade hosting layers talk to — the node binary,
//! the test suites, and the external voting / violation-points subsystems
//! all go through it rather than reaching into individual components.

use crate::ledger::{DocumentRecord, LedgerKey};
use crate::notary::{DocumentNotary, NotaryError, SignedDocument};
use crate::roles::{AccessRegistry, AccessError, Principal, Role};
use crate::students::{NewStudent, StudentId, StudentRecord};
use crate::token::{CredentialTokenStore, DocumentKind, TokenId, TokenMetadata};

/// A fully wired institution: registry plus notary (which owns the ledger
/// and the token store).
#[derive(Debug)]
pub struct Institution {
    registry: AccessRegistry,
    notary: DocumentNotary,
}

impl Institution {
    /// Wires up a new institution. `deployer` becomes registry owner and
    /// administrator; the notary receives the token store's single
    /// minting capability.
    pub fn bootstrap(deployer: impl Into<Principal>) -> Self {
        let registry = AccessRegistry::new(deployer);
        let (tokens, authority) = CredentialTokenStore::new();
        let notary = DocumentNotary::new(tokens, authority);
        Self { registry, notary }
    }

    /// Read access to the registry, for collaborators that only query.
    pub fn registry(&self) -> &AccessRegistry {
        &self.registry
    }

    /// Read access to the notary.
    pub fn notary(&self) -> &DocumentNotary {
        &self.notary
    }

    // -----------------------------------------------------------------------
    // Registry administration
    // -----------------------------------------------------------------------

    /// See [`AccessRegistry::assign_role`].
    pub fn assign_role(
        &mut self,
        caller: &str,
        principal: impl Into<Principal>,
        role: Role,
    ) -> Result<(), AccessError> {
        self.registry.assign_role(caller, principal, role)
    }

    /// See [`AccessRegistry::transfer_ownership`].
    pub fn transfer_ownership(
        &mut self,
        caller: &str,
        new_owner: impl Into<Principal>,
    ) -> Result<(), AccessError> {
        self.registry.transfer_ownership(caller, new_owner)
    }

    /// See [`AccessRegistry::add_manager`].
    pub fn add_manager(
        &mut self,
        caller: &str,
        principal: impl Into<Principal>,
    ) -> Result<(), AccessError> {
        self.registry.add_manager(caller, principal)
    }

    /// See [`AccessRegistry::remove_manager`].
    pub fn remove_manager(&mut self, caller: &str, principal: &str) -> Result<(), AccessError> {
        self.registry.remove_manager(caller, principal)
    }

    /// See [`AccessRegistry::register_student`].
    pub fn register_student(
        &mut self,
        caller: &str,
        student: NewStudent,
    ) -> Result<StudentId, AccessError> {
        self.registry.register_student(caller, student)
    }

    /// See [`AccessRegistry::register_students_batch`].
    pub fn register_students_batch(
        &mut self,
        caller: &str,
        students: Vec<NewStudent>,
    ) -> Result<usize, AccessError> {
        self.registry.register_students_batch(caller, students)
    }

    /// See [`AccessRegistry::deactivate_student`].
    pub fn deactivate_student(&mut self, caller: &str, id: StudentId) -> Result<(), AccessError> {
        self.registry.deactivate_student(caller, id)
    }

    /// See [`AccessRegistry::activate_student`].
    pub fn activate_student(&mut self, caller: &str, id: StudentId) -> Result<(), AccessError> {
        self.registry.activate_student(caller, id)
    }

    // -----------------------------------------------------------------------
    // Collaborator surface (voting / violation-points subsystems)
    // -----------------------------------------------------------------------

    /// Role held by `principal` — `Role::None` for unknown principals.
    pub fn role_of(&self, principal: &str) -> Role {
        self.registry.role_of(principal)
    }

    /// Whether `wallet` belongs to a currently active student.
    pub fn is_active_student(&self, wallet: &str) -> bool {
        self.registry.is_active_student(wallet)
    }

    // -----------------------------------------------------------------------
    // Student reads
    // -----------------------------------------------------------------------

    /// See [`AccessRegistry::student`].
    pub fn student(&self, id: StudentId) -> Result<&StudentRecord, AccessError> {
        self.registry.student(id)
    }

    /// See [`AccessRegistry::student_id_by_wallet`].
    pub fn student_id_by_wallet(&self, wallet: &str) -> Option<StudentId> {
        self.registry.student_id_by_wallet(wallet)
    }

    /// See [`AccessRegistry::student_id_by_code`].
    pub fn student_id_by_code(&self, code: &str) -> Option<StudentId> {
        self.registry.student_id_by_code(code)
    }

    // -----------------------------------------------------------------------
    // Notarization
    // -----------------------------------------------------------------------

    /// See [`DocumentNotary::sign_document`].
    pub fn sign_document(
        &mut self,
        caller: &str,
        content_hash: &str,
        student_id: StudentId,
        kind: DocumentKind,
        uri: &str,
    ) -> Result<SignedDocument, NotaryError> {
        self.notary
            .sign_document(caller, &self.registry, content_hash, student_id, kind, uri)
    }

    /// See [`DocumentNotary::revoke_document`].
    pub fn revoke_document(&mut self, caller: &str, key: &str) -> Result<(), NotaryError> {
        self.notary.revoke_document(caller, &self.registry, key)
    }

    /// See [`DocumentNotary::reactivate_document`].
    pub fn reactivate_document(&mut self, caller: &str, key: &str) -> Result<(), NotaryError> {
        self.notary.reactivate_document(caller, &self.registry, key)
    }

    /// See [`DocumentNotary::document`].
    pub fn document(&self, key: &str) -> Result<&DocumentRecord, NotaryError> {
        self.notary.document(key)
    }

    /// See [`DocumentNotary::document_by_token`].
    pub fn document_by_token(&self, token_id: TokenId) -> Option<(&LedgerKey, &DocumentRecord)> {
        self.notary.document_by_token(token_id)
    }

    /// See [`DocumentNotary::documents_of_student`].
    pub fn documents_of_student(&self, student_id: StudentId) -> &[LedgerKey] {
        self.notary.documents_of_student(student_id)
    }

    /// See [`DocumentNotary::tokens_of_student`].
    pub fn tokens_of_student(&self, student_id: StudentId) -> &[TokenId] {
        self.notary.tokens_of_student(student_id)
    }

    /// See [`DocumentNotary::is_token_valid`].
    pub fn is_token_valid(&self, token_id: TokenId) -> bool {
        self.notary.is_token_valid(token_id)
    }

    /// See [`DocumentNotary::token_metadata`].
    pub fn token_metadata(&self, token_id: TokenId) -> Result<&TokenMetadata, NotaryError> {
        self.notary.token_metadata(token_id)
    }

    /// See [`DocumentNotary::token_owner`].
    pub fn token_owner(&self, token_id: TokenId) -> Option<&str> {
        self.notary.token_owner(token_id)
    }

    /// See [`DocumentNotary::tokens_of_holder`].
    pub fn tokens_of_holder(&self, holder: &str) -> &[TokenId] {
        self.notary.tokens_of_holder(holder)
    }

    /// See [`DocumentNotary::transfer_token`].
    pub fn transfer_token(
        &mut self,
        caller: &str,
        token_id: TokenId,
        to: Principal,
    ) -> Result<(), NotaryError> {
        self.notary.transfer_token(caller, token_id, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_registers_deployer_as_admin() {
        let institution = Institution::bootstrap("deployer");
        assert_eq!(institution.registry().owner(), "deployer");
        assert_eq!(institution.role_of("deployer"), Role::Admin);
        assert!(institution.registry().is_registered("deployer"));
    }

    #[test]
    fn facade_wires_sign_through_registry_checks() {
        let mut institution = Institution::bootstrap("admin");
        institution.add_manager("admin", "mgr").unwrap();
        let id = institution
            .register_student(
                "admin",
                NewStudent {
                    wallet: "w1".into(),
                    code: "S001".into(),
                    name: "n".into(),
                    email: "e@x".into(),
                },
            )
            .unwrap();

        let signed = institution
            .sign_document("mgr", "hash", id, DocumentKind::Transcript, "ipfs://x")
            .unwrap();
        assert!(institution.is_token_valid(signed.token_id));
        assert_eq!(institution.token_owner(signed.token_id), Some("w1"));
    }
}
