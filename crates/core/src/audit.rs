//! Audit columns carried by every persisted aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Creation/modification timestamps and the soft-delete flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

impl Audit {
    pub fn created(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            updated_at: None,
            is_deleted: false,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.is_deleted = true;
        self.updated_at = Some(at);
    }

    /// Latest write time (creation when never modified).
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Aggregates exposing their audit columns.
pub trait Audited {
    fn audit(&self) -> &Audit;

    fn is_deleted(&self) -> bool {
        self.audit().is_deleted
    }
}
