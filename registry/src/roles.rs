//! # Roles & Access Registry
//!
//! The authoritative role and identity table for a Tessera institution.
//! Every other component asks this registry one question: *who is this
//! principal allowed to be?*
//!
//! ## Security Model
//!
//! - **Exclusive ownership**: exactly one principal owns the registry at a
//!   time. Only the owner can assign roles or hand ownership to a successor.
//! - **Administrator gating**: manager and student administration requires
//!   either the `Admin` role or registry ownership.
//! - **Manager allow-list**: managers are tracked in a growable array plus
//!   an index map, giving O(1) membership tests and O(1) removal via
//!   swap-with-last-and-truncate. Enumeration order is unspecified.
//!
//! Reads never fail: an unknown principal simply has [`Role::None`] and is
//! not registered.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::students::{NewStudent, StudentDirectory, StudentError, StudentId, StudentRecord};

/// An opaque identity reference — hex-encoded wallet address or account id.
/// Used as a map key throughout the registry.
pub type Principal = String;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during access-registry operations.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The caller is not the registry owner.
    #[error("unauthorized: caller {0} is not the registry owner")]
    NotOwner(Principal),

    /// The caller holds neither the `Admin` role nor registry ownership.
    #[error("unauthorized: caller {0} lacks administrator privileges")]
    NotAdmin(Principal),

    /// The principal is already in the manager set.
    #[error("manager already registered: {0}")]
    ManagerExists(Principal),

    /// The principal is not in the manager set.
    #[error("manager not found: {0}")]
    ManagerNotFound(Principal),

    /// A student-directory operation failed.
    #[error(transparent)]
    Student(#[from] StudentError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The authorization role held by a principal.
///
/// Determines which gated entry points a caller may invoke. `None` is the
/// default for principals the registry has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    /// No role assigned. The default for unknown principals.
    #[default]
    None,
    /// An enrolled student.
    Student,
    /// Teaching staff. Carries no registry privileges of its own.
    Teacher,
    /// Institution administrator — may manage managers and students.
    Admin,
    /// Credential manager — may issue documents through the notary.
    Manager,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::None => write!(f, "None"),
            Role::Student => write!(f, "Student"),
            Role::Teacher => write!(f, "Teacher"),
            Role::Admin => write!(f, "Admin"),
            Role::Manager => write!(f, "Manager"),
        }
    }
}

/// A principal's entry in the account table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Current role.
    pub role: Role,
    /// Whether the principal has ever been explicitly registered.
    /// Removing a role later does not clear this flag.
    pub registered: bool,
}

/// The access registry — role table, manager set, and student directory.
///
/// In a deployed institution this state lives in the hosting ledger's
/// storage. The in-memory representation here is the authoritative
/// validation logic, invoked transactionally by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRegistry {
    /// The exclusive owner. Transferable via [`transfer_ownership`](Self::transfer_ownership).
    owner: Principal,
    /// Account table: principal -> role + registration flag.
    accounts: HashMap<Principal, AccountEntry>,
    /// Live manager set. Unordered — removal swaps the last element in.
    managers: Vec<Principal>,
    /// Index into `managers`, kept consistent with the live set.
    manager_index: HashMap<Principal, usize>,
    /// The student directory (dual-indexed by wallet and code).
    directory: StudentDirectory,
}

impl AccessRegistry {
    /// Creates a registry owned by `deployer`, who is registered with the
    /// `Admin` role so the deploying account can administer the institution
    /// immediately.
    pub fn new(deployer: impl Into<Principal>) -> Self {
        let owner = deployer.into();
        let mut accounts = HashMap::new();
        accounts.insert(
            owner.clone(),
            AccountEntry {
                role: Role::Admin,
                registered: true,
            },
        );
        Self {
            owner,
            accounts,
            managers: Vec::new(),
            manager_index: HashMap::new(),
            directory: StudentDirectory::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Ownership & roles
    // -----------------------------------------------------------------------

    /// Returns the current registry owner.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Transfers registry ownership to `new_owner`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotOwner`] if `caller` is not the current owner.
    pub fn transfer_ownership(
        &mut self,
        caller: &str,
        new_owner: impl Into<Principal>,
    ) -> Result<(), AccessError> {
        self.ensure_owner(caller)?;
        self.owner = new_owner.into();
        Ok(())
    }

    /// Assigns `role` to `principal` and marks it registered.
    ///
    /// Explicitly assigning [`Role::None`] still marks the principal as
    /// registered — the registry remembers having seen it.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotOwner`] if `caller` is not the owner.
    pub fn assign_role(
        &mut self,
        caller: &str,
        principal: impl Into<Principal>,
        role: Role,
    ) -> Result<(), AccessError> {
        self.ensure_owner(caller)?;
        self.accounts.insert(
            principal.into(),
            AccountEntry {
                role,
                registered: true,
            },
        );
        Ok(())
    }

    /// Returns the role of `principal`, or [`Role::None`] if unknown.
    pub fn role_of(&self, principal: &str) -> Role {
        self.accounts
            .get(principal)
            .map(|e| e.role)
            .unwrap_or_default()
    }

    /// Returns whether `principal` has ever been registered.
    pub fn is_registered(&self, principal: &str) -> bool {
        self.accounts.get(principal).is_some_and(|e| e.registered)
    }

    /// Returns whether `principal` may administer the registry: either it
    /// holds the `Admin` role or it is the current owner.
    pub fn is_admin(&self, principal: &str) -> bool {
        principal == self.owner || self.role_of(principal) == Role::Admin
    }

    // -----------------------------------------------------------------------
    // Manager set
    // -----------------------------------------------------------------------

    /// Adds `principal` to the manager set, assigning it the `Manager` role.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotAdmin`] if `caller` is not an administrator.
    /// Returns [`AccessError::ManagerExists`] if the principal is already a manager.
    pub fn add_manager(
        &mut self,
        caller: &str,
        principal: impl Into<Principal>,
    ) -> Result<(), AccessError> {
        self.ensure_admin(caller)?;
        let principal = principal.into();
        if self.manager_index.contains_key(&principal) {
            return Err(AccessError::ManagerExists(principal));
        }

        self.manager_index
            .insert(principal.clone(), self.managers.len());
        self.managers.push(principal.clone());
        self.accounts.insert(
            principal,
            AccountEntry {
                role: Role::Manager,
                registered: true,
            },
        );
        Ok(())
    }

    /// Removes `principal` from the manager set and resets its role to
    /// `None`. The principal stays registered.
    ///
    /// Removal is O(1): the last manager is swapped into the freed slot and
    /// the index map is updated for the moved entry.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotAdmin`] if `caller` is not an administrator.
    /// Returns [`AccessError::ManagerNotFound`] if the principal is not a manager.
    pub fn remove_manager(&mut self, caller: &str, principal: &str) -> Result<(), AccessError> {
        self.ensure_admin(caller)?;
        let slot = self
            .manager_index
            .remove(principal)
            .ok_or_else(|| AccessError::ManagerNotFound(principal.to_string()))?;

        self.managers.swap_remove(slot);
        if slot < self.managers.len() {
            // A trailing manager was moved into the freed slot.
            self.manager_index
                .insert(self.managers[slot].clone(), slot);
        }

        if let Some(entry) = self.accounts.get_mut(principal) {
            entry.role = Role::None;
        }
        Ok(())
    }

    /// Returns whether `principal` is currently in the manager set.
    pub fn is_manager(&self, principal: &str) -> bool {
        self.manager_index.contains_key(principal)
    }

    /// Returns the live manager set. Order is unspecified.
    pub fn managers(&self) -> &[Principal] {
        &self.managers
    }

    /// Returns the number of managers.
    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    // -----------------------------------------------------------------------
    // Student administration
    // -----------------------------------------------------------------------

    /// Registers a student and assigns its wallet the `Student` role.
    ///
    /// Ids are sequential from 1 and never reused.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotAdmin`] if `caller` is not an administrator,
    /// or wraps the directory failure (`DuplicateWallet`, `DuplicateCode`,
    /// `InvalidInput`).
    pub fn register_student(
        &mut self,
        caller: &str,
        student: NewStudent,
    ) -> Result<StudentId, AccessError> {
        self.ensure_admin(caller)?;
        let wallet = student.wallet.clone();
        let id = self.directory.register(student, Utc::now())?;
        self.accounts.insert(
            wallet,
            AccountEntry {
                role: Role::Student,
                registered: true,
            },
        );
        Ok(id)
    }

    /// Registers a batch of students, skipping rows whose wallet or code is
    /// already taken (including duplicates earlier in the same batch).
    ///
    /// Returns the number of rows actually inserted — callers of a bulk
    /// import must check the count, not assume every row succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotAdmin`] if `caller` is not an administrator.
    /// Returns [`StudentError::BatchTooLarge`] (wrapped) above the batch cap.
    pub fn register_students_batch(
        &mut self,
        caller: &str,
        students: Vec<NewStudent>,
    ) -> Result<usize, AccessError> {
        self.ensure_admin(caller)?;
        let ids = self.directory.register_batch(students, Utc::now())?;
        let wallets: Vec<Principal> = ids
            .iter()
            .filter_map(|id| self.directory.get(*id).ok())
            .map(|record| record.wallet.clone())
            .collect();
        for wallet in wallets {
            self.accounts.insert(
                wallet,
                AccountEntry {
                    role: Role::Student,
                    registered: true,
                },
            );
        }
        Ok(ids.len())
    }

    /// Deactivates a student record. The record is never deleted — only the
    /// `active` flag is flipped.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotAdmin`] if `caller` is not an administrator.
    /// Wraps `NotFound` / `AlreadyInactive` from the directory.
    pub fn deactivate_student(&mut self, caller: &str, id: StudentId) -> Result<(), AccessError> {
        self.ensure_admin(caller)?;
        self.directory.deactivate(id)?;
        Ok(())
    }

    /// Reactivates a previously deactivated student record.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotAdmin`] if `caller` is not an administrator.
    /// Wraps `NotFound` / `AlreadyActive` from the directory.
    pub fn activate_student(&mut self, caller: &str, id: StudentId) -> Result<(), AccessError> {
        self.ensure_admin(caller)?;
        self.directory.activate(id)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Student reads (failure-free unless noted)
    // -----------------------------------------------------------------------

    /// Fetches a student record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StudentError::NotFound`] (wrapped) for an unknown id.
    pub fn student(&self, id: StudentId) -> Result<&StudentRecord, AccessError> {
        Ok(self.directory.get(id)?)
    }

    /// Returns the student id linked to `wallet`, if any.
    pub fn student_id_by_wallet(&self, wallet: &str) -> Option<StudentId> {
        self.directory.id_by_wallet(wallet)
    }

    /// Returns the student id registered under `code`, if any.
    pub fn student_id_by_code(&self, code: &str) -> Option<StudentId> {
        self.directory.id_by_code(code)
    }

    /// Returns whether `wallet` belongs to a currently active student.
    /// False for unknown wallets. This is the shared primitive consumed by
    /// the voting and violation-points subsystems.
    pub fn is_active_student(&self, wallet: &str) -> bool {
        self.directory.is_active_wallet(wallet)
    }

    /// Returns the total number of student records ever created.
    pub fn student_count(&self) -> usize {
        self.directory.len()
    }

    /// Returns the number of currently active students.
    pub fn active_student_count(&self) -> usize {
        self.directory.active_len()
    }

    // -----------------------------------------------------------------------
    // Internal guards
    // -----------------------------------------------------------------------

    fn ensure_owner(&self, caller: &str) -> Result<(), AccessError> {
        if caller != self.owner {
            return Err(AccessError::NotOwner(caller.to_string()));
        }
        Ok(())
    }

    fn ensure_admin(&self, caller: &str) -> Result<(), AccessError> {
        if !self.is_admin(caller) {
            return Err(AccessError::NotAdmin(caller.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::students::NewStudent;

    fn new_student(wallet: &str, code: &str) -> NewStudent {
        NewStudent {
            wallet: wallet.into(),
            code: code.into(),
            name: "Test Student".into(),
            email: "student@example.edu".into(),
        }
    }

    #[test]
    fn deployer_is_owner_and_admin() {
        let registry = AccessRegistry::new("deployer");
        assert_eq!(registry.owner(), "deployer");
        assert!(registry.is_admin("deployer"));
        assert_eq!(registry.role_of("deployer"), Role::Admin);
        assert!(registry.is_registered("deployer"));
    }

    #[test]
    fn unknown_principal_has_no_role() {
        let registry = AccessRegistry::new("deployer");
        assert_eq!(registry.role_of("stranger"), Role::None);
        assert!(!registry.is_registered("stranger"));
        assert!(!registry.is_manager("stranger"));
    }

    #[test]
    fn assign_role_requires_owner() {
        let mut registry = AccessRegistry::new("deployer");
        let result = registry.assign_role("stranger", "alice", Role::Teacher);
        assert!(result.is_err());

        registry.assign_role("deployer", "alice", Role::Teacher).unwrap();
        assert_eq!(registry.role_of("alice"), Role::Teacher);
        assert!(registry.is_registered("alice"));
    }

    #[test]
    fn assign_none_still_registers() {
        let mut registry = AccessRegistry::new("deployer");
        registry.assign_role("deployer", "alice", Role::None).unwrap();
        assert_eq!(registry.role_of("alice"), Role::None);
        assert!(registry.is_registered("alice"));
    }

    #[test]
    fn ownership_transfer() {
        let mut registry = AccessRegistry::new("deployer");
        registry.transfer_ownership("deployer", "successor").unwrap();
        assert_eq!(registry.owner(), "successor");

        // Old owner has lost the ownership gate (but keeps its Admin role).
        assert!(registry.transfer_ownership("deployer", "x").is_err());
        assert!(registry.is_admin("deployer"));
    }

    #[test]
    fn add_manager_sets_role() {
        let mut registry = AccessRegistry::new("deployer");
        registry.add_manager("deployer", "mgr").unwrap();
        assert!(registry.is_manager("mgr"));
        assert_eq!(registry.role_of("mgr"), Role::Manager);
        assert!(registry.is_registered("mgr"));
    }

    #[test]
    fn duplicate_manager_rejected() {
        let mut registry = AccessRegistry::new("deployer");
        registry.add_manager("deployer", "mgr").unwrap();
        assert!(registry.add_manager("deployer", "mgr").is_err());
    }

    #[test]
    fn remove_manager_resets_role_but_keeps_registration() {
        let mut registry = AccessRegistry::new("deployer");
        registry.add_manager("deployer", "mgr").unwrap();
        registry.remove_manager("deployer", "mgr").unwrap();
        assert!(!registry.is_manager("mgr"));
        assert_eq!(registry.role_of("mgr"), Role::None);
        assert!(registry.is_registered("mgr"));
    }

    #[test]
    fn remove_unknown_manager_rejected() {
        let mut registry = AccessRegistry::new("deployer");
        assert!(registry.remove_manager("deployer", "ghost").is_err());
    }

    #[test]
    fn swap_remove_keeps_index_consistent() {
        let mut registry = AccessRegistry::new("deployer");
        for name in ["m1", "m2", "m3", "m4"] {
            registry.add_manager("deployer", name).unwrap();
        }

        // Remove from the middle: the last manager is swapped into its slot.
        registry.remove_manager("deployer", "m2").unwrap();
        assert_eq!(registry.manager_count(), 3);
        assert!(!registry.is_manager("m2"));
        for name in ["m1", "m3", "m4"] {
            assert!(registry.is_manager(name), "{name} should remain a manager");
        }

        // The moved entry must still be removable through the index.
        registry.remove_manager("deployer", "m4").unwrap();
        assert_eq!(registry.manager_count(), 2);
        assert!(registry.is_manager("m1"));
        assert!(registry.is_manager("m3"));
    }

    #[test]
    fn manager_gate_accepts_admin_role_and_owner() {
        let mut registry = AccessRegistry::new("deployer");
        registry.assign_role("deployer", "second_admin", Role::Admin).unwrap();

        registry.add_manager("second_admin", "mgr_a").unwrap();
        registry.add_manager("deployer", "mgr_b").unwrap();
        assert!(registry.add_manager("mgr_a", "mgr_c").is_err());
    }

    #[test]
    fn register_student_links_wallet_role() {
        let mut registry = AccessRegistry::new("deployer");
        let id = registry
            .register_student("deployer", new_student("wallet_1", "S001"))
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(registry.role_of("wallet_1"), Role::Student);
        assert_eq!(registry.student_id_by_wallet("wallet_1"), Some(1));
        assert!(registry.is_active_student("wallet_1"));
    }

    #[test]
    fn register_student_requires_admin() {
        let mut registry = AccessRegistry::new("deployer");
        let result = registry.register_student("stranger", new_student("w", "S001"));
        assert!(result.is_err());
        assert_eq!(registry.student_count(), 0);
    }

    #[test]
    fn batch_registration_links_wallet_roles() {
        let mut registry = AccessRegistry::new("deployer");
        let inserted = registry
            .register_students_batch(
                "deployer",
                vec![
                    new_student("w1", "S001"),
                    new_student("w2", "S002"),
                    new_student("w1", "S003"), // duplicate wallet — skipped
                ],
            )
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(registry.role_of("w1"), Role::Student);
        assert_eq!(registry.role_of("w2"), Role::Student);
        assert_eq!(registry.student_id_by_code("S003"), None);
    }

    #[test]
    fn deactivation_is_admin_gated() {
        let mut registry = AccessRegistry::new("deployer");
        let id = registry
            .register_student("deployer", new_student("w1", "S001"))
            .unwrap();
        assert!(registry.deactivate_student("w1", id).is_err());
        registry.deactivate_student("deployer", id).unwrap();
        assert!(!registry.is_active_student("w1"));
    }

    #[test]
    fn registry_serialization_roundtrip() {
        let mut registry = AccessRegistry::new("deployer");
        registry.add_manager("deployer", "mgr").unwrap();
        registry
            .register_student("deployer", new_student("w1", "S001"))
            .unwrap();

        let json = serde_json::to_string(&registry).unwrap();
        let restored: AccessRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.owner(), "deployer");
        assert!(restored.is_manager("mgr"));
        assert_eq!(restored.student_id_by_code("S001"), Some(1));
    }
}
