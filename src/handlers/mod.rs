//! src/handlers/mod.rs

pub mod health_handlers;
pub mod image_handlers;
