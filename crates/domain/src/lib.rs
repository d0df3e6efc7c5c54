pub mod capability;
pub mod config;
pub mod conversation;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;
pub mod trace;
