//! Tools built on top of [`ExplorerClient`](crate::explorer::client::ExplorerClient).

pub mod address;
pub mod aggregate;
pub mod block;
pub mod modules;
pub mod search;
pub mod transaction;
