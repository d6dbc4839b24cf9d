pub mod capability;
pub mod config;
pub mod conversation;
pub mod error;
pub mod memory;
pub mod stream;
pub mod tenant;
pub mod tool;
pub mod trace;
