//! Core data models for the file-hosting service.
//!
//! These entities represent the metadata rows the service keeps about hosted
//! files — never the payload bytes themselves, which belong to the storage
//! backends. Everything serializes naturally as JSON via `serde`.

pub mod category;
pub mod chunk;
pub mod file;
pub mod user_setting;
