//! Reader configuration.
//!
//! Values are layered: built-in defaults, then an optional `market.toml`,
//! then `MARKET_*` environment variables (a `.env` file is loaded first).

use std::time::Duration;

use ethers::types::Address;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::rpc_url")]
    pub rpc_url: String,

    #[serde(default = "defaults::nft_address")]
    pub nft_address: String,

    #[serde(default = "defaults::marketplace_address")]
    pub marketplace_address: String,

    #[serde(default = "defaults::ipfs_gateway")]
    pub ipfs_gateway: String,

    /// Maximum number of tokens loaded at once.
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,

    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum gap between two refreshes in watch mode.
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// When unset, snapshots go to `snapshot_path` instead of MongoDB.
    #[serde(default)]
    pub mongo_uri: Option<String>,

    #[serde(default = "defaults::database")]
    pub database: String,

    #[serde(default = "defaults::snapshot_path")]
    pub snapshot_path: String,

    #[serde(default)]
    pub log_file: Option<String>,

    /// Hex private key used for write commands.
    #[serde(default)]
    pub private_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: defaults::rpc_url(),
            nft_address: defaults::nft_address(),
            marketplace_address: defaults::marketplace_address(),
            ipfs_gateway: defaults::ipfs_gateway(),
            concurrency: defaults::concurrency(),
            request_timeout_secs: defaults::request_timeout_secs(),
            poll_interval_secs: defaults::poll_interval_secs(),
            mongo_uri: None,
            database: defaults::database(),
            snapshot_path: defaults::snapshot_path(),
            log_file: None,
            private_key: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let config: Config = ::config::Config::builder()
            .add_source(::config::File::with_name("market").required(false))
            .add_source(::config::Environment::with_prefix("MARKET").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.addresses()?;
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.ipfs_gateway.trim().is_empty() {
            return Err(Error::Config("ipfs_gateway must not be empty".into()));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(Error::Config("rpc_url must not be empty".into()));
        }
        Ok(())
    }

    /// Token contract and marketplace contract addresses.
    pub fn addresses(&self) -> Result<(Address, Address)> {
        let nft = parse_address("nft_address", &self.nft_address)?;
        let market = parse_address("marketplace_address", &self.marketplace_address)?;
        Ok((nft, market))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| Error::Config(format!("{field} {value:?} is not an address: {e}")))
}

mod defaults {
    pub fn rpc_url() -> String {
        "http://127.0.0.1:8545".into()
    }

    // Default local devnet deployment addresses.
    pub fn nft_address() -> String {
        "0x5FbDB2315678afecb367f032d93F642f64180aa3".into()
    }

    pub fn marketplace_address() -> String {
        "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".into()
    }

    pub fn ipfs_gateway() -> String {
        "https://ipfs.io/ipfs/".into()
    }

    pub fn concurrency() -> usize {
        8
    }

    pub fn request_timeout_secs() -> u64 {
        15
    }

    pub fn poll_interval_secs() -> u64 {
        7
    }

    pub fn database() -> String {
        "nft-market".into()
    }

    pub fn snapshot_path() -> String {
        "market-snapshot.json".into()
    }
}
