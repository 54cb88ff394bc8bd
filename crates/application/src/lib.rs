//! Application layer: requests, the mediator and its handlers.
//!
//! Commands stage changes on a per-request [`CommandScope`](content_infra::CommandScope)
//! and commit them through its unit of work; queries go straight to the
//! read-side repositories.

pub mod categories;
pub mod comments;
pub mod consumers;
pub mod error;
pub mod mediator;
pub mod posts;
pub mod validation;

pub use consumers::CommentAddedEventHandler;
pub use error::{AppError, AppResult};
pub use mediator::{Mediator, Request, RequestHandler};
pub use validation::{Validate, ValidationFailure, Validator};
