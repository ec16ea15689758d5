// src/explorer/mod.rs

pub mod client;
pub mod services;

pub use client::{AddressDataSource, ExplorerClient};
