//! Client-side reader for an ERC-721 + marketplace contract pair.
//!
//! Token ids are enumerated from the token contract, metadata is fetched over
//! HTTP/IPFS, and marketplace listings and auctions are reconciled against
//! current ownership into a flat [`models::NftRecord`] read model.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod contracts;
pub mod error;
pub mod metadata;
pub mod models;

pub mod services {
    pub mod data_loader;
    pub mod listener;
    pub mod logging;
    pub mod store;
    pub mod trading;
}

pub use catalog::{Catalog, ReconcileContext};
pub use config::Config;
pub use error::{Error, Result};
