// src/azure/mod.rs
mod client;
pub mod compute;
pub mod network;
pub mod resources;
pub mod retry;
pub mod storage;

pub use client::{ArmClient, ArmError};
