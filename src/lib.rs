// src/lib.rs
pub mod azure;
pub mod cli;
