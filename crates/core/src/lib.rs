//! `content-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod audit;
pub mod error;
pub mod id;
pub mod text;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use audit::{Audit, Audited};
pub use error::{DomainError, DomainResult};
pub use id::AggregateId;
pub use text::{Title, optional_text, required_text};
pub use value_object::ValueObject;
