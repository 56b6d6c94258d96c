//! # Student Directory
//!
//! Append-mostly store of student records with two independent unique
//! indices: wallet → id and human-readable code → id. Ids are assigned
//! sequentially starting at 1 and are never reused, even after
//! deactivation — a record is never physically deleted, only its `active`
//! flag changes.
//!
//! The original system used id 0 as a "not found" sentinel. This
//! implementation does not reproduce the sentinel: lookups return
//! `Option<StudentId>` and direct fetches return a `NotFound` error, so
//! absence is explicit in the types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::roles::Principal;

/// Sequential student identifier, assigned from 1.
pub type StudentId = u64;

/// Upper bound on a single bulk-import batch.
pub const MAX_BATCH_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during student-directory operations.
#[derive(Debug, Error)]
pub enum StudentError {
    /// No student record exists for this id.
    #[error("student not found: id {0}")]
    NotFound(StudentId),

    /// A student is already registered under this wallet.
    #[error("duplicate wallet: a student is already registered for {0}")]
    DuplicateWallet(Principal),

    /// The human-readable code is already in use.
    #[error("duplicate code: '{0}' is already in use")]
    DuplicateCode(String),

    /// The student is already inactive.
    #[error("student {0} is already inactive")]
    AlreadyInactive(StudentId),

    /// The student is already active.
    #[error("student {0} is already active")]
    AlreadyActive(StudentId),

    /// The batch exceeds the bulk-import cap.
    #[error("batch too large: {size} entries exceeds the maximum of {max}")]
    BatchTooLarge {
        /// Number of entries in the rejected batch.
        size: usize,
        /// The configured cap.
        max: usize,
    },

    /// A required field was empty.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The caller-supplied fields of a registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    /// Wallet / principal to link. Must be unique across the directory.
    pub wallet: Principal,
    /// Human-readable code (e.g. "S001"). Must be unique.
    pub code: String,
    /// Full name.
    pub name: String,
    /// Contact email.
    pub email: String,
}

/// A registered student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    /// Sequential id, assigned at registration. Never reused.
    pub id: StudentId,
    /// Linked wallet / principal.
    pub wallet: Principal,
    /// Unique human-readable code.
    pub code: String,
    /// Full name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Whether the student is currently active. Deactivation flips this
    /// flag; the record itself is permanent.
    pub active: bool,
    /// Timestamp of registration.
    pub registered_at: DateTime<Utc>,
}

/// The student directory — records plus both unique indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentDirectory {
    /// Records keyed by id.
    students: HashMap<StudentId, StudentRecord>,
    /// Unique index: wallet -> id.
    wallet_index: HashMap<Principal, StudentId>,
    /// Unique index: code -> id.
    code_index: HashMap<String, StudentId>,
    /// Next id to assign. Starts at 1; 0 is never a valid id.
    next_id: StudentId,
}

impl StudentDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            students: HashMap::new(),
            wallet_index: HashMap::new(),
            code_index: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a single student and returns the assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StudentError::InvalidInput`] if the wallet or code is empty.
    /// Returns [`StudentError::DuplicateWallet`] / [`StudentError::DuplicateCode`]
    /// if either unique index already holds an entry.
    pub fn register(
        &mut self,
        student: NewStudent,
        now: DateTime<Utc>,
    ) -> Result<StudentId, StudentError> {
        if student.wallet.is_empty() {
            return Err(StudentError::InvalidInput("wallet must not be empty"));
        }
        if student.code.is_empty() {
            return Err(StudentError::InvalidInput("code must not be empty"));
        }
        if self.wallet_index.contains_key(&student.wallet) {
            return Err(StudentError::DuplicateWallet(student.wallet));
        }
        if self.code_index.contains_key(&student.code) {
            return Err(StudentError::DuplicateCode(student.code));
        }

        let id = self.next_id;
        self.next_id += 1;

        self.wallet_index.insert(student.wallet.clone(), id);
        self.code_index.insert(student.code.clone(), id);
        self.students.insert(
            id,
            StudentRecord {
                id,
                wallet: student.wallet,
                code: student.code,
                name: student.name,
                email: student.email,
                active: true,
                registered_at: now,
            },
        );
        Ok(id)
    }

    /// Registers a batch of students, skipping rows that would violate a
    /// uniqueness constraint or fail field validation.
    ///
    /// Partial success is deliberate: administrative bulk imports should
    /// not abort wholesale on a stray duplicate. Returns the ids actually
    /// inserted, in batch order.
    ///
    /// # Errors
    ///
    /// Returns [`StudentError::BatchTooLarge`] if the batch exceeds
    /// [`MAX_BATCH_SIZE`]. The whole batch is rejected in that case.
    pub fn register_batch(
        &mut self,
        students: Vec<NewStudent>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StudentId>, StudentError> {
        if students.len() > MAX_BATCH_SIZE {
            return Err(StudentError::BatchTooLarge {
                size: students.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        let mut inserted = Vec::new();
        for student in students {
            // Silent skip on duplicate or invalid rows.
            if let Ok(id) = self.register(student, now) {
                inserted.push(id);
            }
        }
        Ok(inserted)
    }

    /// Marks the student inactive.
    ///
    /// # Errors
    ///
    /// Returns [`StudentError::NotFound`] for an unknown id.
    /// Returns [`StudentError::AlreadyInactive`] if already inactive.
    pub fn deactivate(&mut self, id: StudentId) -> Result<(), StudentError> {
        let record = self
            .students
            .get_mut(&id)
            .ok_or(StudentError::NotFound(id))?;
        if !record.active {
            return Err(StudentError::AlreadyInactive(id));
        }
        record.active = false;
        Ok(())
    }

    /// Marks the student active again.
    ///
    /// # Errors
    ///
    /// Returns [`StudentError::NotFound`] for an unknown id.
    /// Returns [`StudentError::AlreadyActive`] if already active.
    pub fn activate(&mut self, id: StudentId) -> Result<(), StudentError> {
        let record = self
            .students
            .get_mut(&id)
            .ok_or(StudentError::NotFound(id))?;
        if record.active {
            return Err(StudentError::AlreadyActive(id));
        }
        record.active = true;
        Ok(())
    }

    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StudentError::NotFound`] for an unknown id.
    pub fn get(&self, id: StudentId) -> Result<&StudentRecord, StudentError> {
        self.students.get(&id).ok_or(StudentError::NotFound(id))
    }

    /// Returns the id linked to `wallet`, if any.
    pub fn id_by_wallet(&self, wallet: &str) -> Option<StudentId> {
        self.wallet_index.get(wallet).copied()
    }

    /// Returns the id registered under `code`, if any.
    pub fn id_by_code(&self, code: &str) -> Option<StudentId> {
        self.code_index.get(code).copied()
    }

    /// Returns whether `wallet` belongs to a currently active student.
    /// False for unknown wallets.
    pub fn is_active_wallet(&self, wallet: &str) -> bool {
        self.id_by_wallet(wallet)
            .and_then(|id| self.students.get(&id))
            .is_some_and(|record| record.active)
    }

    /// Total number of records ever created.
    pub fn len(&self) -> usize {
        self.students.len()
    }

    /// True when no student has ever been registered.
    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Number of currently active students.
    pub fn active_len(&self) -> usize {
        self.students.values().filter(|r| r.active).count()
    }
}

impl Default for StudentDirectory {
    fn default() -> Self {
        Self::new()
    }
}
