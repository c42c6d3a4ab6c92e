pub mod config;
pub mod note;
