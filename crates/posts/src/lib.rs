//! Posts domain module.
//!
//! Business rules for posts, implemented purely as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod post;

pub use post::{
    CreatePost, DeletePost, Post, PostCommand, PostCreated, PostDeleted, PostEvent, PostId,
    PostState, PostUpdated, UpdatePost,
};
