//! Comments domain module.
//!
//! Business rules for comments on posts (no IO, no HTTP, no storage).

pub mod comment;

pub use comment::{
    AddComment, Comment, CommentCommand, CommentDeleted, CommentEvent, CommentId, DeleteComment,
};
