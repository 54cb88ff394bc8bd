use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use content_core::{
    Aggregate, AggregateId, AggregateRoot, Audit, Audited, DomainError, Title, impl_uuid_newtype,
    optional_text,
};
use content_events::Event;

/// Category identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub AggregateId);

impl_uuid_newtype!(CategoryId, "CategoryId");

pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// Aggregate root: Category (optionally nested under a parent category).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    id: CategoryId,
    title: String,
    description: Option<String>,
    parent_id: Option<CategoryId>,
    audit: Audit,
    version: u64,
    created: bool,
}

impl Category {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: CategoryId) -> Self {
        Self {
            id,
            title: String::new(),
            description: None,
            parent_id: None,
            audit: Audit::created(DateTime::<Utc>::UNIX_EPOCH),
            version: 0,
            created: false,
        }
    }

    /// Rebuild a persisted category from its stored columns.
    pub fn rehydrate(
        id: CategoryId,
        title: String,
        description: Option<String>,
        parent_id: Option<CategoryId>,
        audit: Audit,
        version: u64,
    ) -> Self {
        Self {
            id,
            title,
            description,
            parent_id,
            audit,
            version,
            created: true,
        }
    }

    pub fn id_typed(&self) -> CategoryId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parent_id(&self) -> Option<CategoryId> {
        self.parent_id
    }

    /// Whether this category points at itself as parent.
    pub fn is_own_parent(&self) -> bool {
        self.parent_id == Some(self.id)
    }
}

impl AggregateRoot for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Audited for Category {
    fn audit(&self) -> &Audit {
        &self.audit
    }
}

/// Command: CreateCategory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCategory {
    pub category_id: CategoryId,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateCategory (full replacement of the editable fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCategory {
    pub category_id: CategoryId,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteCategory (soft delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCategory {
    pub category_id: CategoryId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryCommand {
    CreateCategory(CreateCategory),
    UpdateCategory(UpdateCategory),
    DeleteCategory(DeleteCategory),
}

/// Event: CategoryCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCreated {
    pub category_id: CategoryId,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CategoryUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryUpdated {
    pub category_id: CategoryId,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CategoryDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDeleted {
    pub category_id: CategoryId,
    pub occurred_at: DateTime<Utc>,
}

/// Serialized without a variant tag: the bus carries the type in `message_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryEvent {
    CategoryCreated(CategoryCreated),
    CategoryUpdated(CategoryUpdated),
    CategoryDeleted(CategoryDeleted),
}

impl Event for CategoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CategoryEvent::CategoryCreated(_) => "content.category.created",
            CategoryEvent::CategoryUpdated(_) => "content.category.updated",
            CategoryEvent::CategoryDeleted(_) => "content.category.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CategoryEvent::CategoryCreated(e) => e.occurred_at,
            CategoryEvent::CategoryUpdated(e) => e.occurred_at,
            CategoryEvent::CategoryDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Category {
    type Command = CategoryCommand;
    type Event = CategoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CategoryEvent::CategoryCreated(e) => {
                self.id = e.category_id;
                self.title = e.title.clone();
                self.description = e.description.clone();
                self.parent_id = e.parent_id;
                self.audit = Audit::created(e.occurred_at);
                self.created = true;
            }
            CategoryEvent::CategoryUpdated(e) => {
                self.title = e.title.clone();
                self.description = e.description.clone();
                self.parent_id = e.parent_id;
                self.audit.touch(e.occurred_at);
            }
            CategoryEvent::CategoryDeleted(e) => {
                self.audit.mark_deleted(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CategoryCommand::CreateCategory(cmd) => self.handle_create(cmd),
            CategoryCommand::UpdateCategory(cmd) => self.handle_update(cmd),
            CategoryCommand::DeleteCategory(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Category {
    fn ensure_live(&self, category_id: CategoryId) -> Result<(), DomainError> {
        if !self.created || self.audit.is_deleted {
            return Err(DomainError::not_found("category.not_found"));
        }
        if self.id != category_id {
            return Err(DomainError::invariant("category.id_mismatch"));
        }
        Ok(())
    }

    fn ensure_not_own_parent(
        category_id: CategoryId,
        parent_id: Option<CategoryId>,
    ) -> Result<(), DomainError> {
        if parent_id == Some(category_id) {
            return Err(DomainError::invariant("category.self_parent"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateCategory) -> Result<Vec<CategoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("category.already_exists"));
        }

        let title = Title::parse(&cmd.title)?;
        let description =
            optional_text(cmd.description.as_deref(), DESCRIPTION_MAX_CHARS, "description")?;
        Self::ensure_not_own_parent(cmd.category_id, cmd.parent_id)?;

        Ok(vec![CategoryEvent::CategoryCreated(CategoryCreated {
            category_id: cmd.category_id,
            title: title.into(),
            description,
            parent_id: cmd.parent_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateCategory) -> Result<Vec<CategoryEvent>, DomainError> {
        self.ensure_live(cmd.category_id)?;

        let title = Title::parse(&cmd.title)?;
        let description =
            optional_text(cmd.description.as_deref(), DESCRIPTION_MAX_CHARS, "description")?;
        Self::ensure_not_own_parent(cmd.category_id, cmd.parent_id)?;

        Ok(vec![CategoryEvent::CategoryUpdated(CategoryUpdated {
            category_id: cmd.category_id,
            title: title.into(),
            description,
            parent_id: cmd.parent_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteCategory) -> Result<Vec<CategoryEvent>, DomainError> {
        self.ensure_live(cmd.category_id)?;

        Ok(vec![CategoryEvent::CategoryDeleted(CategoryDeleted {
            category_id: cmd.category_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_events::execute;
    use proptest::prelude::*;

    fn create_cmd(id: CategoryId, parent_id: Option<CategoryId>) -> CategoryCommand {
        CategoryCommand::CreateCategory(CreateCategory {
            category_id: id,
            title: "Rust".to_string(),
            description: Some("Systems programming".to_string()),
            parent_id,
            occurred_at: Utc::now(),
        })
    }

    fn created(id: CategoryId) -> Category {
        let mut category = Category::empty(id);
        execute(&mut category, &create_cmd(id, None)).unwrap();
        category
    }

    #[test]
    fn create_emits_category_created_and_sets_state() {
        let id = CategoryId::new();
        let parent = CategoryId::new();
        let mut category = Category::empty(id);

        let events = execute(&mut category, &create_cmd(id, Some(parent))).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "content.category.created");
        assert_eq!(category.title(), "Rust");
        assert_eq!(category.parent_id(), Some(parent));
        assert_eq!(category.version(), 1);
        assert!(!category.is_deleted());
    }

    #[test]
    fn create_rejects_self_parent() {
        let id = CategoryId::new();
        let err = Category::empty(id).handle(&create_cmd(id, Some(id))).unwrap_err();
        assert_eq!(err, DomainError::invariant("category.self_parent"));
    }

    #[test]
    fn create_rejects_blank_title() {
        let id = CategoryId::new();
        let cmd = CategoryCommand::CreateCategory(CreateCategory {
            category_id: id,
            title: "   ".to_string(),
            description: None,
            parent_id: None,
            occurred_at: Utc::now(),
        });
        let err = Category::empty(id).handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::validation("title.required"));
    }

    #[test]
    fn create_twice_conflicts() {
        let id = CategoryId::new();
        let category = created(id);
        let err = category.handle(&create_cmd(id, None)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn update_rejects_self_parent() {
        let id = CategoryId::new();
        let category = created(id);
        let cmd = CategoryCommand::UpdateCategory(UpdateCategory {
            category_id: id,
            title: "Rust".to_string(),
            description: None,
            parent_id: Some(id),
            occurred_at: Utc::now(),
        });
        let err = category.handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::invariant("category.self_parent"));
    }

    #[test]
    fn delete_is_soft_and_not_repeatable() {
        let id = CategoryId::new();
        let mut category = created(id);
        let cmd = CategoryCommand::DeleteCategory(DeleteCategory {
            category_id: id,
            occurred_at: Utc::now(),
        });

        execute(&mut category, &cmd).unwrap();
        assert!(category.is_deleted());
        assert!(category.audit().updated_at.is_some());
        assert_eq!(category.version(), 2);

        let err = category.handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::not_found("category.not_found"));
    }

    #[test]
    fn events_serialize_without_variant_tag() {
        let id = CategoryId::new();
        let mut category = Category::empty(id);
        let events = execute(&mut category, &create_cmd(id, None)).unwrap();
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["title"], "Rust");
        assert_eq!(json["category_id"], id.to_string());
    }

    proptest! {
        #[test]
        fn a_category_is_never_its_own_parent(seed in any::<u128>()) {
            let id = CategoryId::from_uuid(uuid::Uuid::from_u128(seed));
            let result = Category::empty(id).handle(&create_cmd(id, Some(id)));
            prop_assert!(result.is_err());
        }
    }
}
