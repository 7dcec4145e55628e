// src/handlers/mod.rs

pub mod comments;
pub mod extract;
pub mod interaction;
pub mod posts;
