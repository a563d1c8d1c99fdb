pub mod posts;
pub mod threads;
