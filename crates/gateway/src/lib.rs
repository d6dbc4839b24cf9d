pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod collab;
pub mod runtime;
pub mod state;
