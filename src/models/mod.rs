//! Core data models for the image tagging service.
//!
//! These entities describe the durable metadata document stored beside each
//! image blob and the record shape returned to API clients. Both serialize
//! naturally as JSON via `serde`.

pub mod image;
