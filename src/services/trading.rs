//! Signed write calls against the token and marketplace contracts.

use std::sync::Arc;

use ethers::abi::Detokenize;
use ethers::contract::ContractCall;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionReceipt, U256, U64};
use ethers::utils::{format_ether, parse_ether};
use tracing::info;

use crate::catalog::unix_now;
use crate::contracts::{contract_err, ChainSource, Marketplace, MarketSource, NftToken};
use crate::error::{Error, Result};
use crate::models::{Auction, Listing};

pub type SignedClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub async fn signed_client(
    provider: Provider<Http>,
    private_key: &str,
) -> Result<Arc<SignedClient>> {
    let chain_id = provider
        .get_chainid()
        .await
        .map_err(|e| Error::Contract(format!("chain id: {e}")))?;

    let wallet: LocalWallet = private_key
        .trim()
        .trim_start_matches("0x")
        .parse()
        .map_err(|e| Error::Config(format!("private_key: {e}")))?;
    let wallet = wallet.with_chain_id(chain_id.as_u64());

    info!(account = ?wallet.address(), chain_id = chain_id.as_u64(), "signer ready");
    Ok(Arc::new(SignerMiddleware::new(provider, wallet)))
}

/// Parse a decimal ether amount into wei. Zero is rejected.
pub fn parse_price(eth: &str) -> Result<U256> {
    let wei = parse_ether(eth.trim())
        .map_err(|e| Error::InvalidInput(format!("{eth:?} is not an ether amount: {e}")))?;
    if wei.is_zero() {
        return Err(Error::InvalidInput("price must be greater than zero".into()));
    }
    Ok(wei)
}

pub fn check_listing_buyer(listing: &Listing, buyer: Address) -> Result<()> {
    if listing.seller.is_zero() || listing.price.is_zero() {
        return Err(Error::InvalidInput(format!(
            "listing {} is not active",
            listing.listing_id
        )));
    }
    if listing.seller == buyer {
        return Err(Error::InvalidInput(format!(
            "listing {} is your own",
            listing.listing_id
        )));
    }
    Ok(())
}

pub fn check_bid(auction: &Auction, bidder: Address, amount: U256, now: u64) -> Result<()> {
    let id = auction.auction_id;
    if auction.ended {
        return Err(Error::InvalidInput(format!("auction {id} has ended")));
    }
    if auction.end_time <= now {
        return Err(Error::InvalidInput(format!(
            "auction {id} closed at {} and awaits settlement",
            auction.end_time
        )));
    }
    if auction.seller == bidder {
        return Err(Error::InvalidInput(format!("auction {id} is your own")));
    }
    if auction.highest_bid.is_zero() {
        if amount < auction.start_price {
            return Err(Error::InvalidInput(format!(
                "bid must be at least the start price of {} ETH",
                format_ether(auction.start_price)
            )));
        }
    } else if amount <= auction.highest_bid {
        return Err(Error::InvalidInput(format!(
            "bid must exceed the highest bid of {} ETH",
            format_ether(auction.highest_bid)
        )));
    }
    Ok(())
}

pub fn check_settlement(auction: &Auction, now: u64) -> Result<()> {
    if auction.ended {
        return Err(Error::InvalidInput(format!(
            "auction {} was already settled",
            auction.auction_id
        )));
    }
    if auction.end_time > now {
        return Err(Error::InvalidInput(format!(
            "auction {} is still running until {}",
            auction.auction_id, auction.end_time
        )));
    }
    Ok(())
}

pub struct Trader<M> {
    nft: NftToken<M>,
    market: Marketplace<M>,
    reader: ChainSource<M>,
    nft_address: Address,
    market_address: Address,
    account: Address,
}

impl<M: Middleware + 'static> Trader<M> {
    pub fn new(
        client: Arc<M>,
        account: Address,
        nft_address: Address,
        market_address: Address,
    ) -> Self {
        Self {
            nft: NftToken::new(nft_address, Arc::clone(&client)),
            market: Marketplace::new(market_address, Arc::clone(&client)),
            reader: ChainSource::new(client, nft_address, market_address),
            nft_address,
            market_address,
            account,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub async fn mint(&self, uri: &str) -> Result<TransactionReceipt> {
        if uri.trim().is_empty() {
            return Err(Error::InvalidInput("metadata URI must not be empty".into()));
        }

        let status = self.reader.mint_status(self.account).await?;
        if !status.can_mint {
            return Err(Error::InvalidInput(format!(
                "mint cooldown active until {}",
                status.next_mint_at()
            )));
        }

        info!(uri, fee = %format_ether(status.fee), "minting");
        confirm(self.nft.mint(uri.trim().to_string()).value(status.fee), "mint").await
    }

    pub async fn list_item(&self, token_id: u64, price: U256) -> Result<TransactionReceipt> {
        self.ensure_owner(token_id).await?;
        self.ensure_approval().await?;

        info!(token_id, price = %format_ether(price), "listing");
        confirm(
            self.market
                .list_item(self.nft_address, U256::from(token_id), price),
            "listItem",
        )
        .await
    }

    pub async fn buy_item(&self, listing_id: u64) -> Result<TransactionReceipt> {
        let listing = self.listing(listing_id).await?;
        check_listing_buyer(&listing, self.account)?;

        info!(listing_id, price = %format_ether(listing.price), "buying");
        confirm(
            self.market
                .buy_item(U256::from(listing_id))
                .value(listing.price),
            "buyItem",
        )
        .await
    }

    pub async fn cancel_listing(&self, listing_id: u64) -> Result<TransactionReceipt> {
        self.ensure_seller(listing_id).await?;
        confirm(
            self.market.cancel_listing(U256::from(listing_id)),
            "cancelListing",
        )
        .await
    }

    pub async fn update_price(&self, listing_id: u64, price: U256) -> Result<TransactionReceipt> {
        self.ensure_seller(listing_id).await?;
        confirm(
            self.market.update_price(U256::from(listing_id), price),
            "updatePrice",
        )
        .await
    }

    pub async fn create_auction(
        &self,
        token_id: u64,
        start_price: U256,
        duration_secs: u64,
    ) -> Result<TransactionReceipt> {
        if duration_secs == 0 {
            return Err(Error::InvalidInput("auction duration must be positive".into()));
        }
        self.ensure_owner(token_id).await?;
        self.ensure_approval().await?;

        info!(token_id, start = %format_ether(start_price), duration_secs, "creating auction");
        confirm(
            self.market.create_auction(
                self.nft_address,
                U256::from(token_id),
                start_price,
                U256::from(duration_secs),
            ),
            "createAuction",
        )
        .await
    }

    pub async fn bid(&self, auction_id: u64, amount: U256) -> Result<TransactionReceipt> {
        let auction = self.reader.auction(auction_id).await?;
        check_bid(&auction, self.account, amount, unix_now())?;

        info!(auction_id, amount = %format_ether(amount), "bidding");
        confirm(
            self.market.bid(U256::from(auction_id)).value(amount),
            "bid",
        )
        .await
    }

    pub async fn end_auction(&self, auction_id: u64) -> Result<TransactionReceipt> {
        let auction = self.reader.auction(auction_id).await?;
        check_settlement(&auction, unix_now())?;

        confirm(
            self.market.end_auction(U256::from(auction_id)),
            "endAuction",
        )
        .await
    }

    async fn listing(&self, listing_id: u64) -> Result<Listing> {
        self.reader
            .all_listings()
            .await?
            .into_iter()
            .find(|l| l.listing_id == listing_id)
            .ok_or_else(|| Error::InvalidInput(format!("no listing with id {listing_id}")))
    }

    async fn ensure_seller(&self, listing_id: u64) -> Result<()> {
        let listing = self.listing(listing_id).await?;
        if listing.seller != self.account {
            return Err(Error::InvalidInput(format!(
                "listing {listing_id} belongs to another seller"
            )));
        }
        Ok(())
    }

    async fn ensure_owner(&self, token_id: u64) -> Result<()> {
        let owner = self.reader.owner_of(token_id).await?;
        if owner != self.account {
            return Err(Error::InvalidInput(format!(
                "token {token_id} is not owned by this account"
            )));
        }
        Ok(())
    }

    async fn ensure_approval(&self) -> Result<()> {
        let approved = self
            .nft
            .is_approved_for_all(self.account, self.market_address)
            .call()
            .await
            .map_err(contract_err)?;

        if !approved {
            info!("approving marketplace for all tokens");
            confirm(
                self.nft.set_approval_for_all(self.market_address, true),
                "setApprovalForAll",
            )
            .await?;
        }
        Ok(())
    }
}

async fn confirm<M: Middleware, D: Detokenize>(
    call: ContractCall<M, D>,
    what: &str,
) -> Result<TransactionReceipt> {
    let pending = call.send().await.map_err(contract_err)?;
    let tx_hash = pending.tx_hash();
    info!(?tx_hash, "{what} sent, waiting for confirmation");

    let receipt = pending
        .await
        .map_err(|e| Error::Contract(format!("{what}: {e}")))?
        .ok_or_else(|| Error::Contract(format!("{what}: transaction {tx_hash:?} was dropped")))?;

    if receipt.status == Some(U64::zero()) {
        return Err(Error::Contract(format!("{what}: transaction {tx_hash:?} reverted")));
    }

    info!(?tx_hash, block = ?receipt.block_number, "{what} confirmed");
    Ok(receipt)
}
