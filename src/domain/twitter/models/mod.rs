//! Post and thread domain models

mod post;
mod thread;

pub use post::{NewPost, Post, PostStatus, PostedMetadata};
pub use thread::{NewThread, Thread, ThreadProgress, ThreadStatus, ThreadWithPosts};
