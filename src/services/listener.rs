use std::fmt;
use std::time::{Duration, Instant};

use ethers::providers::{Http, Middleware, Provider, StreamExt};
use ethers::types::{Address, U256};
use ethers::utils::format_ether;
use tracing::{debug, info, warn};

use crate::catalog::{unix_now, Catalog, ReconcileContext};
use crate::contracts::MarketSource;
use crate::error::{Error, Result};
use crate::metadata::MetadataFetcher;
use crate::models::{addr_hex, NftRecord, SaleState, Snapshot};

use super::data_loader::chain_data::{load_catalog, LoadReport};
use super::store::SnapshotStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketChange {
    Minted {
        token_id: u64,
        owner: Address,
    },
    Transferred {
        token_id: u64,
        from: Address,
        to: Address,
    },
    Listed {
        token_id: u64,
        listing_id: u64,
        price: U256,
    },
    Delisted {
        token_id: u64,
    },
    Repriced {
        token_id: u64,
        old: U256,
        new: U256,
    },
    AuctionStarted {
        token_id: u64,
        auction_id: u64,
        start_price: U256,
        end_time: u64,
    },
    BidPlaced {
        token_id: u64,
        auction_id: u64,
        bidder: Option<Address>,
        amount: U256,
    },
    AuctionClosed {
        token_id: u64,
        auction_id: u64,
    },
    Sold {
        token_id: u64,
        price: Option<U256>,
    },
    MetadataChanged {
        token_id: u64,
    },
}

impl fmt::Display for MarketChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketChange::Minted { token_id, owner } => {
                write!(f, "Token {token_id} minted to {}", addr_hex(*owner))
            }
            MarketChange::Transferred { token_id, from, to } => write!(
                f,
                "Token {token_id} transferred from {} to {}",
                addr_hex(*from),
                addr_hex(*to)
            ),
            MarketChange::Listed {
                token_id,
                listing_id,
                price,
            } => write!(
                f,
                "Token {token_id} listed (listing {listing_id}) for {} ETH",
                format_ether(*price)
            ),
            MarketChange::Delisted { token_id } => write!(f, "Token {token_id} delisted"),
            MarketChange::Repriced { token_id, old, new } => write!(
                f,
                "Token {token_id} repriced from {} to {} ETH",
                format_ether(*old),
                format_ether(*new)
            ),
            MarketChange::AuctionStarted {
                token_id,
                auction_id,
                start_price,
                end_time,
            } => write!(
                f,
                "Auction {auction_id} started for token {token_id} at {} ETH, ends {end_time}",
                format_ether(*start_price)
            ),
            MarketChange::BidPlaced {
                token_id,
                auction_id,
                bidder,
                amount,
            } => write!(
                f,
                "Bid of {} ETH on auction {auction_id} (token {token_id}) by {}",
                format_ether(*amount),
                bidder.map(addr_hex).unwrap_or_else(|| "unknown".into())
            ),
            MarketChange::AuctionClosed {
                token_id,
                auction_id,
            } => write!(f, "Auction {auction_id} for token {token_id} closed"),
            MarketChange::Sold { token_id, price } => match price {
                Some(price) => write!(f, "Token {token_id} sold for {} ETH", format_ether(*price)),
                None => write!(f, "Token {token_id} sold"),
            },
            MarketChange::MetadataChanged { token_id } => {
                write!(f, "Token {token_id} metadata changed")
            }
        }
    }
}

pub mod watching {
    use super::*;

    /// Changes between two catalog passes. Tokens missing from `next` are ignored,
    /// since a token that failed to load is indistinguishable from one that vanished.
    pub fn diff(prev: &Catalog, next: &Catalog) -> Vec<MarketChange> {
        let mut changes = Vec::new();

        for item in next.items() {
            match prev.get(item.token_id) {
                None => {
                    changes.push(MarketChange::Minted {
                        token_id: item.token_id,
                        owner: item.owner,
                    });
                    sale_changes(item.token_id, &SaleState::Unlisted, &item.sale, &mut changes);
                }
                Some(old) => record_changes(old, item, &mut changes),
            }
        }

        changes
    }

    /// Keep the last known record of every token that failed to load this pass.
    pub fn carry_over(previous: &Catalog, next: Catalog, report: &LoadReport) -> Catalog {
        if report.is_complete() {
            return next;
        }

        let mut items = next.into_items();
        for failure in &report.failures {
            if let Some(old) = previous.get(failure.token_id) {
                debug!(token_id = failure.token_id, "keeping previous record");
                items.push(old.clone());
            }
        }
        Catalog::new(items)
    }

    fn record_changes(old: &NftRecord, new: &NftRecord, changes: &mut Vec<MarketChange>) {
        if old.owner != new.owner {
            changes.push(MarketChange::Transferred {
                token_id: new.token_id,
                from: old.owner,
                to: new.owner,
            });
        }
        if old.token_uri != new.token_uri
            || old.name != new.name
            || old.description != new.description
            || old.image != new.image
        {
            changes.push(MarketChange::MetadataChanged {
                token_id: new.token_id,
            });
        }
        sale_changes(new.token_id, &old.sale, &new.sale, changes);
    }

    fn sale_changes(token_id: u64, old: &SaleState, new: &SaleState, out: &mut Vec<MarketChange>) {
        match (old, new) {
            (
                SaleState::Listed {
                    listing_id: a,
                    price: old_price,
                    ..
                },
                SaleState::Listed {
                    listing_id: b,
                    price: new_price,
                    ..
                },
            ) if a == b => {
                if old_price != new_price {
                    out.push(MarketChange::Repriced {
                        token_id,
                        old: *old_price,
                        new: *new_price,
                    });
                }
                return;
            }
            (
                SaleState::OnAuction {
                    auction_id: a,
                    highest_bid: old_bid,
                    ..
                },
                SaleState::OnAuction {
                    auction_id: b,
                    highest_bid: new_bid,
                    highest_bidder,
                    ..
                },
            ) if a == b => {
                if old_bid != new_bid {
                    out.push(MarketChange::BidPlaced {
                        token_id,
                        auction_id: *b,
                        bidder: *highest_bidder,
                        amount: *new_bid,
                    });
                }
                return;
            }
            (SaleState::Unlisted, SaleState::Unlisted)
            | (SaleState::Sold { .. }, SaleState::Sold { .. }) => return,
            _ => {}
        }

        match old {
            SaleState::Listed { .. } if !matches!(new, SaleState::Sold { .. }) => {
                out.push(MarketChange::Delisted { token_id })
            }
            SaleState::OnAuction { auction_id, .. } => out.push(MarketChange::AuctionClosed {
                token_id,
                auction_id: *auction_id,
            }),
            _ => {}
        }

        match new {
            SaleState::Listed {
                listing_id, price, ..
            } => out.push(MarketChange::Listed {
                token_id,
                listing_id: *listing_id,
                price: *price,
            }),
            SaleState::OnAuction {
                auction_id,
                start_price,
                end_time,
                ..
            } => out.push(MarketChange::AuctionStarted {
                token_id,
                auction_id: *auction_id,
                start_price: *start_price,
                end_time: *end_time,
            }),
            SaleState::Sold { price } if !matches!(old, SaleState::Sold { .. }) => {
                out.push(MarketChange::Sold {
                    token_id,
                    price: *price,
                })
            }
            _ => {}
        }
    }

    /// Refresh the catalog on new blocks, at most once per `poll_interval`,
    /// logging every change and persisting a snapshot after each pass.
    pub async fn watch_market<S: MarketSource, F: MetadataFetcher>(
        provider: &Provider<Http>,
        source: &S,
        fetcher: &F,
        ctx: &ReconcileContext,
        store: &SnapshotStore,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Result<()> {
        let mut previous = match store.load().await? {
            Some(snapshot) => {
                info!(
                    items = snapshot.items.len(),
                    block = ?snapshot.block,
                    "resuming from snapshot"
                );
                Catalog::new(snapshot.items)
            }
            None => Catalog::default(),
        };

        previous = refresh(provider, source, fetcher, ctx, store, concurrency, previous).await?;
        let mut last_refresh = Instant::now();

        let mut stream = provider
            .watch_blocks()
            .await
            .map_err(|e| Error::Contract(e.to_string()))?;

        while let Some(block_hash) = stream.next().await {
            if last_refresh.elapsed() < poll_interval {
                debug!(?block_hash, "refreshed recently, skipping block");
                continue;
            }

            let current = previous.clone();
            match refresh(provider, source, fetcher, ctx, store, concurrency, current).await {
                Ok(catalog) => previous = catalog,
                Err(err) => warn!(error = %err, "refresh failed, keeping previous catalog"),
            }
            last_refresh = Instant::now();
        }

        Ok(())
    }

    async fn refresh<S: MarketSource, F: MetadataFetcher>(
        provider: &Provider<Http>,
        source: &S,
        fetcher: &F,
        ctx: &ReconcileContext,
        store: &SnapshotStore,
        concurrency: usize,
        previous: Catalog,
    ) -> Result<Catalog> {
        let block = match provider.get_block_number().await {
            Ok(number) => Some(number.as_u64()),
            Err(err) => {
                warn!(error = %err, "could not read block number");
                None
            }
        };

        let (loaded, report) = load_catalog(source, fetcher, &ctx.refreshed(), concurrency).await?;
        let catalog = carry_over(&previous, loaded, &report);

        let changes = diff(&previous, &catalog);
        for change in &changes {
            info!("{change}");
        }
        info!(
            block = ?block,
            items = catalog.len(),
            changes = changes.len(),
            failed = report.failures.len(),
            "catalog refreshed"
        );

        store
            .save(&Snapshot {
                block,
                taken_at: unix_now(),
                items: catalog.items().to_vec(),
            })
            .await?;

        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::watching::{carry_over, diff};
    use super::*;
    use crate::services::data_loader::chain_data::TokenFailure;

    fn alice() -> Address {
        Address::repeat_byte(0x01)
    }

    fn bob() -> Address {
        Address::repeat_byte(0x02)
    }

    fn record(token_id: u64, owner: Address, sale: SaleState) -> NftRecord {
        NftRecord {
            token_id,
            owner,
            token_uri: format!("ipfs://meta/{token_id}"),
            name: format!("Token #{token_id}"),
            description: String::new(),
            image: None,
            category: "Art".into(),
            creator: addr_hex(owner),
            attributes: Vec::new(),
            sale,
        }
    }

    fn listed(listing_id: u64, price: u64) -> SaleState {
        SaleState::Listed {
            listing_id,
            seller: alice(),
            price: U256::from(price),
        }
    }

    fn auction(auction_id: u64, bid: u64) -> SaleState {
        SaleState::OnAuction {
            auction_id,
            seller: alice(),
            start_price: U256::from(10),
            highest_bid: U256::from(bid),
            highest_bidder: (bid > 0).then_some(bob()),
            end_time: 2_000,
            settlement_due: false,
        }
    }

    fn changes(before: Vec<NftRecord>, after: Vec<NftRecord>) -> Vec<MarketChange> {
        diff(&Catalog::new(before), &Catalog::new(after))
    }

    #[test]
    fn identical_catalogs_have_no_changes() {
        let items = vec![record(1, alice(), listed(0, 5)), record(2, bob(), auction(0, 3))];
        assert!(changes(items.clone(), items).is_empty());
    }

    #[test]
    fn new_listed_token_is_minted_then_listed() {
        let found = changes(vec![], vec![record(1, alice(), listed(3, 5))]);
        assert_eq!(
            found,
            vec![
                MarketChange::Minted {
                    token_id: 1,
                    owner: alice()
                },
                MarketChange::Listed {
                    token_id: 1,
                    listing_id: 3,
                    price: U256::from(5)
                },
            ]
        );
    }

    #[test]
    fn sale_reports_transfer_and_sold() {
        let found = changes(
            vec![record(1, alice(), listed(0, 5))],
            vec![record(
                1,
                bob(),
                SaleState::Sold {
                    price: Some(U256::from(5)),
                },
            )],
        );
        assert_eq!(
            found,
            vec![
                MarketChange::Transferred {
                    token_id: 1,
                    from: alice(),
                    to: bob()
                },
                MarketChange::Sold {
                    token_id: 1,
                    price: Some(U256::from(5))
                },
            ]
        );
    }

    #[test]
    fn price_update_is_a_reprice() {
        let found = changes(
            vec![record(1, alice(), listed(0, 5))],
            vec![record(1, alice(), listed(0, 8))],
        );
        assert_eq!(
            found,
            vec![MarketChange::Repriced {
                token_id: 1,
                old: U256::from(5),
                new: U256::from(8)
            }]
        );
    }

    #[test]
    fn cancel_is_a_delisting() {
        let found = changes(
            vec![record(1, alice(), listed(0, 5))],
            vec![record(1, alice(), SaleState::Unlisted)],
        );
        assert_eq!(found, vec![MarketChange::Delisted { token_id: 1 }]);
    }

    #[test]
    fn auction_lifecycle() {
        let bid = changes(
            vec![record(1, alice(), auction(4, 0))],
            vec![record(1, alice(), auction(4, 12))],
        );
        assert_eq!(
            bid,
            vec![MarketChange::BidPlaced {
                token_id: 1,
                auction_id: 4,
                bidder: Some(bob()),
                amount: U256::from(12)
            }]
        );

        let closed = changes(
            vec![record(1, alice(), auction(4, 12))],
            vec![record(1, bob(), SaleState::Unlisted)],
        );
        assert_eq!(
            closed,
            vec![
                MarketChange::Transferred {
                    token_id: 1,
                    from: alice(),
                    to: bob()
                },
                MarketChange::AuctionClosed {
                    token_id: 1,
                    auction_id: 4
                },
            ]
        );
    }

    #[test]
    fn moving_from_listing_to_auction() {
        let found = changes(
            vec![record(1, alice(), listed(0, 5))],
            vec![record(1, alice(), auction(1, 0))],
        );
        assert_eq!(
            found,
            vec![
                MarketChange::Delisted { token_id: 1 },
                MarketChange::AuctionStarted {
                    token_id: 1,
                    auction_id: 1,
                    start_price: U256::from(10),
                    end_time: 2_000
                },
            ]
        );
    }

    #[test]
    fn vanished_tokens_are_ignored() {
        let found = changes(vec![record(1, alice(), SaleState::Unlisted)], vec![]);
        assert!(found.is_empty());
    }

    #[test]
    fn failed_token_keeps_its_record_across_passes() {
        let first = Catalog::new(vec![
            record(1, alice(), listed(0, 5)),
            record(2, bob(), SaleState::Unlisted),
        ]);

        let broken = LoadReport {
            token_count: 2,
            loaded: 1,
            failures: vec![TokenFailure {
                token_id: 2,
                reason: "token URI returned HTML, not JSON".into(),
            }],
        };
        let second = carry_over(
            &first,
            Catalog::new(vec![record(1, alice(), listed(0, 5))]),
            &broken,
        );
        assert_eq!(second, first);
        assert!(diff(&first, &second).is_empty());

        let third = carry_over(&second, first.clone(), &LoadReport::default());
        assert!(diff(&second, &third).is_empty());
    }

    #[test]
    fn failed_token_never_seen_stays_absent() {
        let report = LoadReport {
            token_count: 1,
            loaded: 0,
            failures: vec![TokenFailure {
                token_id: 1,
                reason: "contract error: execution reverted".into(),
            }],
        };
        let next = carry_over(&Catalog::default(), Catalog::default(), &report);
        assert!(next.is_empty());
    }

    #[test]
    fn changes_render_in_ether() {
        let change = MarketChange::Listed {
            token_id: 7,
            listing_id: 2,
            price: U256::exp10(17),
        };
        let rendered = change.to_string();
        assert!(rendered.starts_with("Token 7 listed (listing 2) for 0.1"));
        assert!(rendered.ends_with(" ETH"));
    }
}
