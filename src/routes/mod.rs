//! src/routes/mod.rs

pub mod routes;
