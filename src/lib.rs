pub mod aggregate;
pub mod config;
pub mod discover;
pub mod error;
pub mod poll;
pub mod write;
