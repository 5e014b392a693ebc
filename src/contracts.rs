//! Contract bindings and the read-side seam over them.

use std::future::Future;
use std::sync::Arc;

use ethers::contract::ContractError;
use ethers::prelude::abigen;
use ethers::providers::Middleware;
use ethers::types::{Address, U256};

use crate::error::{Error, Result};
use crate::models::{Auction, Listing, MintStatus, Royalty, Sale};

abigen!(NftToken, "src/data/nft_token.json");
abigen!(Marketplace, "src/data/marketplace.json");

/// Read-only view of the token and marketplace contracts.
pub trait MarketSource: Send + Sync {
    fn token_count(&self) -> impl Future<Output = Result<u64>> + Send;

    fn owner_of(&self, token_id: u64) -> impl Future<Output = Result<Address>> + Send;

    fn token_uri(&self, token_id: u64) -> impl Future<Output = Result<String>> + Send;

    fn all_listings(&self) -> impl Future<Output = Result<Vec<Listing>>> + Send;

    /// Index of the listing recorded for `(nft, token_id)`, if the marketplace has one.
    fn listing_index(
        &self,
        nft: Address,
        token_id: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn auction_count(&self) -> impl Future<Output = Result<u64>> + Send;

    fn auction(&self, auction_id: u64) -> impl Future<Output = Result<Auction>> + Send;

    fn is_sold(&self, nft: Address, token_id: u64) -> impl Future<Output = Result<bool>> + Send;

    fn sales(&self) -> impl Future<Output = Result<Vec<Sale>>> + Send;

    fn royalty_info(
        &self,
        token_id: u64,
        sale_price: U256,
    ) -> impl Future<Output = Result<Royalty>> + Send;

    fn mint_status(&self, account: Address) -> impl Future<Output = Result<MintStatus>> + Send;
}

pub struct ChainSource<M> {
    nft: NftToken<M>,
    market: Marketplace<M>,
}

impl<M: Middleware + 'static> ChainSource<M> {
    pub fn new(client: Arc<M>, nft_address: Address, market_address: Address) -> Self {
        Self {
            nft: NftToken::new(nft_address, Arc::clone(&client)),
            market: Marketplace::new(market_address, client),
        }
    }
}

impl<M: Middleware + 'static> MarketSource for ChainSource<M> {
    async fn token_count(&self) -> Result<u64> {
        let count = self.nft.token_count().call().await.map_err(contract_err)?;
        to_u64(count, "tokenCount")
    }

    async fn owner_of(&self, token_id: u64) -> Result<Address> {
        self.nft
            .owner_of(U256::from(token_id))
            .call()
            .await
            .map_err(contract_err)
    }

    async fn token_uri(&self, token_id: u64) -> Result<String> {
        self.nft
            .token_uri(U256::from(token_id))
            .call()
            .await
            .map_err(contract_err)
    }

    async fn all_listings(&self) -> Result<Vec<Listing>> {
        let raw = self
            .market
            .get_all_listings()
            .call()
            .await
            .map_err(contract_err)?;

        raw.into_iter()
            .enumerate()
            .map(|(index, (seller, price, nft, token_id))| {
                Ok(Listing {
                    listing_id: index as u64,
                    seller,
                    price,
                    nft,
                    token_id: to_u64(token_id, "listing tokenId")?,
                })
            })
            .collect()
    }

    async fn listing_index(&self, nft: Address, token_id: u64) -> Result<u64> {
        let index = self
            .market
            .listing_index(nft, U256::from(token_id))
            .call()
            .await
            .map_err(contract_err)?;
        to_u64(index, "listingIndex")
    }

    async fn auction_count(&self) -> Result<u64> {
        let count = self.market.auction_count().call().await.map_err(contract_err)?;
        to_u64(count, "auctionCount")
    }

    async fn auction(&self, auction_id: u64) -> Result<Auction> {
        let (seller, nft, token_id, start_price, highest_bid, highest_bidder, end_time, ended) =
            self.market
                .get_auction(U256::from(auction_id))
                .call()
                .await
                .map_err(contract_err)?;

        Ok(Auction {
            auction_id,
            seller,
            nft,
            token_id: to_u64(token_id, "auction tokenId")?,
            start_price,
            highest_bid,
            highest_bidder,
            end_time: to_u64(end_time, "auction endTime")?,
            ended,
        })
    }

    async fn is_sold(&self, nft: Address, token_id: u64) -> Result<bool> {
        self.market
            .is_sold(nft, U256::from(token_id))
            .call()
            .await
            .map_err(contract_err)
    }

    async fn sales(&self) -> Result<Vec<Sale>> {
        let raw = self.market.get_sales().call().await.map_err(contract_err)?;

        raw.into_iter()
            .map(|(seller, buyer, nft, token_id, price, timestamp)| {
                Ok(Sale {
                    seller,
                    buyer,
                    nft,
                    token_id: to_u64(token_id, "sale tokenId")?,
                    price,
                    timestamp: to_u64(timestamp, "sale timestamp")?,
                })
            })
            .collect()
    }

    async fn royalty_info(&self, token_id: u64, sale_price: U256) -> Result<Royalty> {
        let (receiver, amount) = self
            .nft
            .royalty_info(U256::from(token_id), sale_price)
            .call()
            .await
            .map_err(contract_err)?;
        Ok(Royalty { receiver, amount })
    }

    async fn mint_status(&self, account: Address) -> Result<MintStatus> {
        let fee = self.nft.mint_fee().call().await.map_err(contract_err)?;
        let cooldown = self.nft.mint_cooldown().call().await.map_err(contract_err)?;
        let last = self
            .nft
            .last_mint_time(account)
            .call()
            .await
            .map_err(contract_err)?;
        let can_mint = self.nft.can_mint(account).call().await.map_err(contract_err)?;

        Ok(MintStatus {
            fee,
            cooldown: to_u64(cooldown, "mintCooldown")?,
            last_mint_time: to_u64(last, "lastMintTime")?,
            can_mint,
        })
    }
}

pub(crate) fn contract_err<M: Middleware>(err: ContractError<M>) -> Error {
    Error::Contract(err.to_string())
}

/// Narrow an on-chain id or timestamp, refusing values above `u64::MAX`.
pub fn to_u64(value: U256, what: &str) -> Result<u64> {
    if value.bits() > 64 {
        return Err(Error::Overflow(format!("{what} {value} does not fit in u64")));
    }
    Ok(value.low_u64())
}
