use std::collections::HashSet;

use ethers::types::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::catalog::{reconcile, Catalog, ReconcileContext};
use crate::contracts::MarketSource;
use crate::error::Result;
use crate::metadata::MetadataFetcher;
use crate::models::{self, Auction, Listing, NftDetail, SaleState, TokenRecord};

pub mod chain_data {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TokenFailure {
        pub token_id: u64,
        pub reason: String,
    }

    /// Outcome of one pass over the token contract.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct LoadReport {
        pub token_count: u64,
        pub loaded: usize,
        pub failures: Vec<TokenFailure>,
    }

    impl LoadReport {
        pub fn is_complete(&self) -> bool {
            self.failures.is_empty()
        }
    }

    pub async fn load_token<S: MarketSource, F: MetadataFetcher>(
        source: &S,
        fetcher: &F,
        token_id: u64,
    ) -> Result<TokenRecord> {
        let owner = source.owner_of(token_id).await?;
        let token_uri = source.token_uri(token_id).await?;
        let metadata = fetcher.fetch(&token_uri).await?;

        Ok(TokenRecord {
            token_id,
            owner,
            token_uri,
            metadata,
        })
    }

    /// Enumerate `1..=tokenCount` with at most `concurrency` tokens in flight.
    ///
    /// A token that fails to load is skipped and recorded in the report.
    pub async fn load_tokens<S: MarketSource, F: MetadataFetcher>(
        source: &S,
        fetcher: &F,
        concurrency: usize,
    ) -> Result<(Vec<TokenRecord>, LoadReport)> {
        let token_count = source.token_count().await?;

        let results: Vec<(u64, Result<TokenRecord>)> = stream::iter(1..=token_count)
            .map(|token_id| async move { (token_id, load_token(source, fetcher, token_id).await) })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let mut report = LoadReport {
            token_count,
            ..LoadReport::default()
        };
        let mut tokens: Vec<TokenRecord> = Vec::with_capacity(results.len());

        for (token_id, result) in results {
            match result {
                Ok(token) => tokens.push(token),
                Err(err) => {
                    warn!(token_id, error = %err, "failed to load token, skipping");
                    report.failures.push(TokenFailure {
                        token_id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        report.loaded = tokens.len();

        info!(
            loaded = report.loaded,
            failed = report.failures.len(),
            total = token_count,
            "tokens fetched"
        );

        Ok((tokens, report))
    }

    pub async fn load_listings<S: MarketSource>(source: &S) -> Result<Vec<Listing>> {
        let listings = source.all_listings().await?;
        info!(count = listings.len(), "listings fetched");
        Ok(listings)
    }

    pub async fn load_auctions<S: MarketSource>(
        source: &S,
        concurrency: usize,
    ) -> Result<Vec<Auction>> {
        let auction_count = source.auction_count().await?;

        let auctions: Vec<Auction> = stream::iter(0..auction_count)
            .map(|auction_id| source.auction(auction_id))
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        info!(count = auctions.len(), "auctions fetched");
        Ok(auctions)
    }

    /// `isSold` for every distinct token of `nft` that has been listed.
    pub async fn load_sold_flags<S: MarketSource>(
        source: &S,
        nft: Address,
        listings: &[Listing],
        concurrency: usize,
    ) -> Result<HashSet<u64>> {
        let mut listed: Vec<u64> = listings
            .iter()
            .filter(|l| l.nft == nft)
            .map(|l| l.token_id)
            .collect();
        listed.sort_unstable();
        listed.dedup();

        let flags: Vec<(u64, bool)> = stream::iter(listed)
            .map(|token_id| async move {
                source
                    .is_sold(nft, token_id)
                    .await
                    .map(|sold| (token_id, sold))
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        Ok(flags
            .into_iter()
            .filter_map(|(token_id, sold)| sold.then_some(token_id))
            .collect())
    }

    pub async fn load_catalog<S: MarketSource, F: MetadataFetcher>(
        source: &S,
        fetcher: &F,
        ctx: &ReconcileContext,
        concurrency: usize,
    ) -> Result<(Catalog, LoadReport)> {
        let (tokens, report) = load_tokens(source, fetcher, concurrency).await?;
        let listings = load_listings(source).await?;
        let auctions = load_auctions(source, concurrency).await?;
        let sold = load_sold_flags(source, ctx.nft, &listings, concurrency).await?;

        let catalog = Catalog::new(reconcile(tokens, &listings, &auctions, &sold, ctx));
        Ok((catalog, report))
    }

    /// Full view of a single token: reconciled record, royalty on its price, and sales history.
    pub async fn load_detail<S: MarketSource, F: MetadataFetcher>(
        source: &S,
        fetcher: &F,
        ctx: &ReconcileContext,
        token_id: u64,
        concurrency: usize,
    ) -> Result<NftDetail> {
        let token = load_token(source, fetcher, token_id).await?;

        let all_listings = load_listings(source).await?;
        // Reverts for tokens that were never listed.
        let index = match source.listing_index(ctx.nft, token_id).await {
            Ok(index) => Some(index),
            Err(err) => {
                debug!(token_id, error = %err, "listing index unavailable, scanning listings");
                None
            }
        };
        let listings: Vec<Listing> = match index
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| all_listings.get(i))
            .filter(|l| l.nft == ctx.nft && l.token_id == token_id)
        {
            Some(indexed) => vec![*indexed],
            None => all_listings
                .into_iter()
                .filter(|l| l.nft == ctx.nft && l.token_id == token_id)
                .collect(),
        };

        let auctions: Vec<Auction> = load_auctions(source, concurrency)
            .await?
            .into_iter()
            .filter(|a| a.nft == ctx.nft && a.token_id == token_id)
            .collect();

        let mut sold = HashSet::new();
        if source.is_sold(ctx.nft, token_id).await? {
            sold.insert(token_id);
        }

        let record = reconcile(vec![token], &listings, &auctions, &sold, ctx).remove(0);

        let reference_price = match record.sale {
            SaleState::Sold { price } => price,
            ref sale => sale.effective_price(),
        };
        let royalty = match reference_price.filter(|p| !p.is_zero()) {
            Some(price) => royalty_or_none(source, token_id, price).await,
            None => None,
        };

        let mut history: Vec<models::Sale> = source
            .sales()
            .await?
            .into_iter()
            .filter(|s| s.nft == ctx.nft && s.token_id == token_id)
            .collect();
        history.sort_by_key(|s| s.timestamp);

        Ok(NftDetail {
            record,
            royalty,
            history,
        })
    }

    // Contracts without ERC-2981 revert here; the detail view still renders.
    async fn royalty_or_none<S: MarketSource>(
        source: &S,
        token_id: u64,
        price: U256,
    ) -> Option<models::Royalty> {
        match source.royalty_info(token_id, price).await {
            Ok(royalty) => Some(royalty),
            Err(err) => {
                warn!(token_id, error = %err, "royalty lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::chain_data::*;
    use super::*;
    use crate::error::Error;
    use crate::models::{MintStatus, Royalty, Sale, TokenMetadata};

    fn nft() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn market() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn alice() -> Address {
        Address::repeat_byte(0x01)
    }

    fn bob() -> Address {
        Address::repeat_byte(0x02)
    }

    #[derive(Default)]
    struct FakeChain {
        owners: HashMap<u64, Address>,
        token_count: u64,
        listings: Vec<Listing>,
        auctions: Vec<Auction>,
        sold: HashSet<u64>,
        sales: Vec<Sale>,
        royalty_bps: Option<u64>,
        index_reverts: bool,
    }

    impl MarketSource for FakeChain {
        async fn token_count(&self) -> Result<u64> {
            Ok(self.token_count)
        }

        async fn owner_of(&self, token_id: u64) -> Result<Address> {
            self.owners
                .get(&token_id)
                .copied()
                .ok_or_else(|| Error::Contract(format!("ERC721: invalid token ID {token_id}")))
        }

        async fn token_uri(&self, token_id: u64) -> Result<String> {
            Ok(format!("ipfs://meta/{token_id}.json"))
        }

        async fn all_listings(&self) -> Result<Vec<Listing>> {
            Ok(self.listings.clone())
        }

        async fn listing_index(&self, nft: Address, token_id: u64) -> Result<u64> {
            if self.index_reverts {
                return Err(Error::Contract("execution reverted".into()));
            }
            Ok(self
                .listings
                .iter()
                .filter(|l| l.nft == nft && l.token_id == token_id)
                .map(|l| l.listing_id)
                .max()
                .unwrap_or(u64::MAX))
        }

        async fn auction_count(&self) -> Result<u64> {
            Ok(self.auctions.len() as u64)
        }

        async fn auction(&self, auction_id: u64) -> Result<Auction> {
            self.auctions
                .get(auction_id as usize)
                .copied()
                .ok_or_else(|| Error::Contract("no such auction".into()))
        }

        async fn is_sold(&self, _nft: Address, token_id: u64) -> Result<bool> {
            Ok(self.sold.contains(&token_id))
        }

        async fn sales(&self) -> Result<Vec<Sale>> {
            Ok(self.sales.clone())
        }

        async fn royalty_info(&self, _token_id: u64, sale_price: U256) -> Result<Royalty> {
            match self.royalty_bps {
                Some(bps) => Ok(Royalty {
                    receiver: alice(),
                    amount: sale_price * U256::from(bps) / U256::from(10_000u64),
                }),
                None => Err(Error::Contract("execution reverted".into())),
            }
        }

        async fn mint_status(&self, _account: Address) -> Result<MintStatus> {
            Ok(MintStatus {
                fee: U256::zero(),
                cooldown: 0,
                last_mint_time: 0,
                can_mint: true,
            })
        }
    }

    /// Serves `Token #<id>` for every URI except the ones listed as broken.
    struct FakeGateway {
        broken: HashSet<String>,
    }

    impl MetadataFetcher for FakeGateway {
        async fn fetch(&self, uri: &str) -> Result<TokenMetadata> {
            if self.broken.contains(uri) {
                return Err(Error::metadata(uri, "token URI returned HTML, not JSON"));
            }
            let id = uri
                .trim_start_matches("ipfs://meta/")
                .trim_end_matches(".json");
            Ok(TokenMetadata {
                name: Some(format!("Token #{id}")),
                category: Some("Art".into()),
                ..TokenMetadata::default()
            })
        }
    }

    fn gateway() -> FakeGateway {
        FakeGateway {
            broken: HashSet::new(),
        }
    }

    fn ctx() -> ReconcileContext {
        ReconcileContext {
            nft: nft(),
            market: market(),
            gateway: "https://ipfs.io/ipfs/".into(),
            now: 1_000,
        }
    }

    fn chain_with(owners: &[(u64, Address)]) -> FakeChain {
        FakeChain {
            token_count: owners.len() as u64,
            owners: owners.iter().copied().collect(),
            ..FakeChain::default()
        }
    }

    #[tokio::test]
    async fn loads_tokens_in_order() {
        let chain = chain_with(&[(1, alice()), (2, bob()), (3, alice())]);

        let (tokens, report) = load_tokens(&chain, &gateway(), 2).await.unwrap();

        let ids: Vec<u64> = tokens.iter().map(|t| t.token_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(tokens[1].owner, bob());
        assert_eq!(tokens[2].metadata.name.as_deref(), Some("Token #3"));
        assert!(report.is_complete());
        assert_eq!(report.loaded, 3);
    }

    #[tokio::test]
    async fn failed_tokens_are_reported_not_fatal() {
        let mut chain = chain_with(&[(1, alice()), (3, alice())]);
        chain.token_count = 3;
        let fetcher = FakeGateway {
            broken: ["ipfs://meta/3.json".to_string()].into_iter().collect(),
        };

        let (tokens, report) = load_tokens(&chain, &fetcher, 4).await.unwrap();

        assert_eq!(tokens.len(), 1);
        assert_eq!(report.token_count, 3);
        let failed: Vec<u64> = report.failures.iter().map(|f| f.token_id).collect();
        assert_eq!(failed, vec![2, 3]);
        assert!(report.failures[1].reason.contains("HTML"));
    }

    #[tokio::test]
    async fn catalog_reconciles_listings_and_auctions() {
        let mut chain = chain_with(&[(1, alice()), (2, bob()), (3, market())]);
        chain.listings = vec![
            Listing {
                listing_id: 0,
                seller: alice(),
                price: U256::from(500),
                nft: nft(),
                token_id: 1,
            },
            Listing {
                listing_id: 1,
                seller: alice(),
                price: U256::from(800),
                nft: nft(),
                token_id: 2,
            },
        ];
        chain.auctions = vec![Auction {
            auction_id: 0,
            seller: bob(),
            nft: nft(),
            token_id: 3,
            start_price: U256::from(100),
            highest_bid: U256::zero(),
            highest_bidder: Address::zero(),
            end_time: 5_000,
            ended: false,
        }];
        chain.sold = [2].into_iter().collect();

        let (catalog, report) = load_catalog(&chain, &gateway(), &ctx(), 3).await.unwrap();

        assert!(report.is_complete());
        assert!(catalog.get(1).unwrap().sale.is_listed());
        assert_eq!(
            catalog.get(2).unwrap().sale,
            SaleState::Sold {
                price: Some(U256::from(800))
            }
        );
        assert!(catalog.get(3).unwrap().sale.is_auction());
    }

    #[tokio::test]
    async fn sold_flags_only_for_listed_tokens() {
        let mut chain = chain_with(&[(1, alice()), (2, alice())]);
        chain.sold = [1, 2].into_iter().collect();
        chain.listings = vec![Listing {
            listing_id: 0,
            seller: alice(),
            price: U256::from(1),
            nft: nft(),
            token_id: 2,
        }];

        let sold = load_sold_flags(&chain, nft(), &chain.listings, 1).await.unwrap();
        assert_eq!(sold, [2].into_iter().collect());
    }

    #[tokio::test]
    async fn detail_includes_royalty_and_history() {
        let mut chain = chain_with(&[(1, alice())]);
        chain.royalty_bps = Some(500);
        chain.listings = vec![Listing {
            listing_id: 0,
            seller: alice(),
            price: U256::from(10_000),
            nft: nft(),
            token_id: 1,
        }];
        chain.sales = vec![
            Sale {
                seller: bob(),
                buyer: alice(),
                nft: nft(),
                token_id: 1,
                price: U256::from(7_000),
                timestamp: 900,
            },
            Sale {
                seller: alice(),
                buyer: bob(),
                nft: nft(),
                token_id: 1,
                price: U256::from(5_000),
                timestamp: 100,
            },
            Sale {
                seller: alice(),
                buyer: bob(),
                nft: nft(),
                token_id: 2,
                price: U256::from(1),
                timestamp: 50,
            },
        ];

        let detail = load_detail(&chain, &gateway(), &ctx(), 1, 2).await.unwrap();

        assert!(detail.record.sale.is_listed());
        assert_eq!(
            detail.royalty,
            Some(Royalty {
                receiver: alice(),
                amount: U256::from(500),
            })
        );
        let stamps: Vec<u64> = detail.history.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![100, 900]);
    }

    #[tokio::test]
    async fn detail_survives_missing_royalty_support() {
        let mut chain = chain_with(&[(1, alice())]);
        chain.listings = vec![Listing {
            listing_id: 0,
            seller: alice(),
            price: U256::from(10_000),
            nft: nft(),
            token_id: 1,
        }];

        let detail = load_detail(&chain, &gateway(), &ctx(), 1, 1).await.unwrap();
        assert_eq!(detail.royalty, None);
    }

    #[tokio::test]
    async fn detail_falls_back_when_listing_index_reverts() {
        let mut chain = chain_with(&[(1, alice()), (2, bob())]);
        chain.index_reverts = true;
        chain.listings = vec![
            Listing {
                listing_id: 0,
                seller: bob(),
                price: U256::from(300),
                nft: nft(),
                token_id: 2,
            },
            Listing {
                listing_id: 1,
                seller: alice(),
                price: U256::from(10_000),
                nft: nft(),
                token_id: 1,
            },
        ];

        let detail = load_detail(&chain, &gateway(), &ctx(), 1, 1).await.unwrap();

        assert_eq!(
            detail.record.sale,
            SaleState::Listed {
                listing_id: 1,
                seller: alice(),
                price: U256::from(10_000),
            }
        );
    }

    #[tokio::test]
    async fn detail_of_missing_token_fails() {
        let chain = chain_with(&[(1, alice())]);
        let err = load_detail(&chain, &gateway(), &ctx(), 9, 1).await.unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }
}
