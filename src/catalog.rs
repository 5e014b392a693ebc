//! Reconciliation of chain state into the NFT read model, and the views over it.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::{Address, U256};
use serde::Serialize;

use crate::metadata::resolve_uri;
use crate::models::{
    addr_hex, Auction, Listing, NftRecord, SaleState, TokenRecord, UNCATEGORIZED, UNTITLED,
};

/// Addresses and clock used while reconciling.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub nft: Address,
    pub market: Address,
    pub gateway: String,
    pub now: u64,
}

impl ReconcileContext {
    pub fn new(nft: Address, market: Address, gateway: &str) -> Self {
        Self {
            nft,
            market,
            gateway: gateway.to_string(),
            now: unix_now(),
        }
    }

    /// Same addresses, clock moved to the current time.
    pub fn refreshed(&self) -> Self {
        Self {
            now: unix_now(),
            ..self.clone()
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Merge token records with marketplace state.
///
/// Listings and auctions only apply while the token is still held by their
/// seller (or escrowed by the marketplace). An open auction wins over a
/// listing, and within each kind the most recent entry wins.
pub fn reconcile(
    tokens: Vec<TokenRecord>,
    listings: &[Listing],
    auctions: &[Auction],
    sold: &HashSet<u64>,
    ctx: &ReconcileContext,
) -> Vec<NftRecord> {
    let mut listings_by_token: HashMap<u64, Vec<&Listing>> = HashMap::new();
    for listing in listings.iter().filter(|l| l.nft == ctx.nft) {
        listings_by_token
            .entry(listing.token_id)
            .or_default()
            .push(listing);
    }

    let mut auctions_by_token: HashMap<u64, Vec<&Auction>> = HashMap::new();
    for auction in auctions.iter().filter(|a| a.nft == ctx.nft) {
        auctions_by_token
            .entry(auction.token_id)
            .or_default()
            .push(auction);
    }

    tokens
        .into_iter()
        .map(|token| {
            let token_listings = listings_by_token
                .get(&token.token_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let token_auctions = auctions_by_token
                .get(&token.token_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let sale = sale_state(&token, token_listings, token_auctions, sold, ctx);
            build_record(token, sale, ctx)
        })
        .collect()
}

fn sale_state(
    token: &TokenRecord,
    listings: &[&Listing],
    auctions: &[&Auction],
    sold: &HashSet<u64>,
    ctx: &ReconcileContext,
) -> SaleState {
    let held_for = |seller: Address| token.owner == seller || token.owner == ctx.market;
    let flagged_sold = sold.contains(&token.token_id);
    // After a sale, an escrowed listing counts only if it follows a listing by someone else.
    let relisted_in_escrow = |listing_id: u64, seller: Address| {
        token.owner == ctx.market
            && listings
                .iter()
                .any(|earlier| earlier.listing_id < listing_id && earlier.seller != seller)
    };

    let auction = auctions
        .iter()
        .filter(|a| !a.ended && !a.seller.is_zero() && held_for(a.seller))
        .max_by_key(|a| a.auction_id);

    if let Some(auction) = auction {
        return SaleState::OnAuction {
            auction_id: auction.auction_id,
            seller: auction.seller,
            start_price: auction.start_price,
            highest_bid: auction.highest_bid,
            highest_bidder: (!auction.highest_bidder.is_zero()).then_some(auction.highest_bidder),
            end_time: auction.end_time,
            settlement_due: auction.end_time <= ctx.now,
        };
    }

    let listing = listings
        .iter()
        .filter(|l| !l.seller.is_zero() && !l.price.is_zero() && held_for(l.seller))
        .filter(|l| {
            !flagged_sold || token.owner == l.seller || relisted_in_escrow(l.listing_id, l.seller)
        })
        .max_by_key(|l| l.listing_id);

    if let Some(listing) = listing {
        return SaleState::Listed {
            listing_id: listing.listing_id,
            seller: listing.seller,
            price: listing.price,
        };
    }

    if flagged_sold {
        let price = listings
            .iter()
            .filter(|l| !l.price.is_zero())
            .max_by_key(|l| l.listing_id)
            .map(|l| l.price);
        return SaleState::Sold { price };
    }

    SaleState::Unlisted
}

fn build_record(token: TokenRecord, sale: SaleState, ctx: &ReconcileContext) -> NftRecord {
    let metadata = token.metadata;

    NftRecord {
        token_id: token.token_id,
        owner: token.owner,
        token_uri: token.token_uri,
        name: non_empty(metadata.name).unwrap_or_else(|| UNTITLED.to_string()),
        description: metadata.description.unwrap_or_default(),
        image: non_empty(metadata.image).map(|image| resolve_uri(&image, &ctx.gateway)),
        category: non_empty(metadata.category).unwrap_or_else(|| UNCATEGORIZED.to_string()),
        creator: non_empty(metadata.creator).unwrap_or_else(|| addr_hex(token.owner)),
        attributes: metadata.attributes,
        sale,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaleKind {
    #[default]
    All,
    BuyNow,
    Auction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarketSort {
    #[default]
    Recent,
    PriceLow,
    PriceHigh,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuctionSort {
    #[default]
    EndingSoon,
    NewlyListed,
    HighestBid,
    LowestBid,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketFilter {
    pub query: String,
    pub kind: SaleKind,
    pub category: Option<String>,
    pub min_price: Option<U256>,
    pub max_price: Option<U256>,
    pub sort: MarketSort,
}

impl MarketFilter {
    fn matches(&self, record: &NftRecord) -> bool {
        let kind = match self.kind {
            SaleKind::All => !matches!(record.sale, SaleState::Sold { .. }),
            SaleKind::BuyNow => record.sale.is_listed(),
            SaleKind::Auction => record.sale.is_auction(),
        };

        let category = self
            .category
            .as_deref()
            .map_or(true, |c| record.category.eq_ignore_ascii_case(c));

        let price = if self.min_price.is_none() && self.max_price.is_none() {
            true
        } else {
            record.sale.effective_price().is_some_and(|price| {
                self.min_price.map_or(true, |min| price >= min)
                    && self.max_price.map_or(true, |max| price <= max)
            })
        };

        kind && category && price && matches_query(record, &self.query)
    }
}

fn matches_query(record: &NftRecord, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty()
        || record.name.to_lowercase().contains(&query)
        || record.creator.to_lowercase().contains(&query)
}

/// Unpriced records always sort after priced ones.
fn by_price(a: &NftRecord, b: &NftRecord, descending: bool) -> Ordering {
    match (a.sale.effective_price(), b.sale.effective_price()) {
        (Some(x), Some(y)) if descending => y.cmp(&x),
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HomeView<'a> {
    pub featured: Option<&'a NftRecord>,
    pub trending: Vec<&'a NftRecord>,
    pub live_auctions: Vec<&'a NftRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuctionStats {
    pub count: usize,
    pub total_volume: U256,
    pub average: Option<U256>,
}

/// Reconciled records, kept in ascending token id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    items: Vec<NftRecord>,
}

impl Catalog {
    pub fn new(mut items: Vec<NftRecord>) -> Self {
        items.sort_by_key(|item| item.token_id);
        Self { items }
    }

    pub fn items(&self) -> &[NftRecord] {
        &self.items
    }

    pub fn into_items(self) -> Vec<NftRecord> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, token_id: u64) -> Option<&NftRecord> {
        self.items
            .binary_search_by_key(&token_id, |item| item.token_id)
            .ok()
            .map(|index| &self.items[index])
    }

    fn newest_first(&self) -> impl Iterator<Item = &NftRecord> {
        self.items.iter().rev()
    }

    fn live_auctions(&self) -> impl Iterator<Item = &NftRecord> {
        self.newest_first().filter(|item| {
            matches!(
                item.sale,
                SaleState::OnAuction {
                    settlement_due: false,
                    ..
                }
            )
        })
    }

    pub fn home(&self, n: usize) -> HomeView<'_> {
        HomeView {
            featured: self.newest_first().next(),
            trending: self.newest_first().take(n).collect(),
            live_auctions: self.live_auctions().take(n).collect(),
        }
    }

    pub fn marketplace(&self, filter: &MarketFilter) -> Vec<&NftRecord> {
        let mut found: Vec<&NftRecord> = self
            .newest_first()
            .filter(|item| filter.matches(item))
            .collect();

        match filter.sort {
            MarketSort::Recent => {}
            MarketSort::PriceLow => found.sort_by(|a, b| by_price(a, b, false)),
            MarketSort::PriceHigh => found.sort_by(|a, b| by_price(a, b, true)),
        }

        found
    }

    /// Open auctions that are still accepting bids.
    pub fn auctions(&self, query: &str, sort: AuctionSort) -> Vec<&NftRecord> {
        let mut found: Vec<&NftRecord> = self
            .live_auctions()
            .filter(|item| matches_query(item, query))
            .collect();

        match sort {
            AuctionSort::EndingSoon => found.sort_by_key(|item| auction_key(item).1),
            AuctionSort::NewlyListed => {
                found.sort_by_key(|item| std::cmp::Reverse(auction_key(item).0))
            }
            AuctionSort::HighestBid => found.sort_by(|a, b| by_price(a, b, true)),
            AuctionSort::LowestBid => found.sort_by(|a, b| by_price(a, b, false)),
        }

        found
    }

    /// Auctions past their end time that nobody has ended yet.
    pub fn pending_settlement(&self) -> Vec<&NftRecord> {
        self.items
            .iter()
            .filter(|item| {
                matches!(
                    item.sale,
                    SaleState::OnAuction {
                        settlement_due: true,
                        ..
                    }
                )
            })
            .collect()
    }

    pub fn auction_stats(&self) -> AuctionStats {
        let prices: Vec<U256> = self
            .live_auctions()
            .filter_map(|item| item.sale.effective_price())
            .collect();

        let count = prices.len();
        let total_volume = prices
            .iter()
            .fold(U256::zero(), |sum, price| sum.saturating_add(*price));
        let average = (count > 0).then(|| total_volume / U256::from(count));

        AuctionStats {
            count,
            total_volume,
            average,
        }
    }

    pub fn owned_by(&self, account: Address) -> Vec<&NftRecord> {
        self.items
            .iter()
            .filter(|item| item.is_owned_by(account))
            .collect()
    }

    pub fn created_by(&self, account: Address) -> Vec<&NftRecord> {
        self.items
            .iter()
            .filter(|item| item.is_created_by(account))
            .collect()
    }

    pub fn on_auction_by(&self, account: Address) -> Vec<&NftRecord> {
        self.items
            .iter()
            .filter(|item| item.sale.is_auction() && item.sale.seller() == Some(account))
            .collect()
    }
}

fn auction_key(item: &NftRecord) -> (u64, u64) {
    match item.sale {
        SaleState::OnAuction {
            auction_id,
            end_time,
            ..
        } => (auction_id, end_time),
        _ => (0, u64::MAX),
    }
}
