//! Categories domain module.
//!
//! Business rules for content categories, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod category;

pub use category::{
    Category, CategoryCommand, CategoryCreated, CategoryDeleted, CategoryEvent, CategoryId,
    CategoryUpdated, CreateCategory, DeleteCategory, UpdateCategory,
};
