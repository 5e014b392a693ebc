//! Command-line parsing and plain-text rendering for the `nft-market` binary.

use ethers::types::{Address, U256};
use ethers::utils::format_ether;

use crate::catalog::{AuctionSort, MarketFilter, MarketSort, SaleKind};
use crate::error::{Error, Result};
use crate::models::{addr_hex, NftRecord, SaleState};
use crate::services::trading::parse_price;

pub const USAGE: &str = "\
usage: nft-market <command> [args]

read commands:
  catalog                                  load, reconcile and store a snapshot
  home                                     featured, trending and live auctions
  market [query] [--sort recent|price-low|price-high] [--kind all|buy-now|auction]
         [--category name] [--min eth] [--max eth]
  auctions [query] [--sort ending-soon|newly-listed|price-high|price-low]
  mine <address>                           owned, created and on-auction tokens
  detail <token-id>                        record, royalty and sales history
  mint-status <address>                    fee and cooldown for an account
  watch                                    refresh on every new block

write commands (need MARKET_PRIVATE_KEY):
  mint <metadata-uri>
  list <token-id> <eth>
  buy <listing-id>
  cancel <listing-id>
  reprice <listing-id> <eth>
  auction <token-id> <start-eth> <duration-secs>
  bid <auction-id> <eth>
  settle <auction-id>";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Catalog,
    Home,
    Market(MarketFilter),
    Auctions { query: String, sort: AuctionSort },
    Mine(Address),
    Detail(u64),
    MintStatus(Address),
    Watch,
    Mint(String),
    List { token_id: u64, price: U256 },
    Buy(u64),
    Cancel(u64),
    Reprice { listing_id: u64, price: U256 },
    Auction { token_id: u64, start_price: U256, duration_secs: u64 },
    Bid { auction_id: u64, amount: U256 },
    Settle(u64),
}

impl Command {
    /// Parse arguments following the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let name = args.next().ok_or_else(|| usage("missing command"))?;
        let (positional, flags) = split_flags(args)?;
        let arg = |index: usize, what: &str| -> Result<&str> {
            positional
                .get(index)
                .map(String::as_str)
                .ok_or_else(|| usage(&format!("{name} needs <{what}>")))
        };

        let command = match name.as_str() {
            "catalog" => Command::Catalog,
            "home" => Command::Home,
            "watch" => Command::Watch,
            "market" => {
                let mut filter = MarketFilter {
                    query: positional.join(" "),
                    ..MarketFilter::default()
                };
                for (flag, value) in &flags {
                    match flag.as_str() {
                        "sort" => filter.sort = parse_market_sort(value)?,
                        "kind" => filter.kind = parse_kind(value)?,
                        "category" => filter.category = Some(value.clone()),
                        "min" => filter.min_price = Some(parse_bound(value)?),
                        "max" => filter.max_price = Some(parse_bound(value)?),
                        other => return Err(usage(&format!("unknown flag --{other}"))),
                    }
                }
                Command::Market(filter)
            }
            "auctions" => {
                let mut sort = AuctionSort::default();
                for (flag, value) in &flags {
                    match flag.as_str() {
                        "sort" => sort = parse_auction_sort(value)?,
                        other => return Err(usage(&format!("unknown flag --{other}"))),
                    }
                }
                Command::Auctions {
                    query: positional.join(" "),
                    sort,
                }
            }
            "mine" => Command::Mine(parse_account(arg(0, "address")?)?),
            "detail" => Command::Detail(parse_id(arg(0, "token-id")?)?),
            "mint-status" => Command::MintStatus(parse_account(arg(0, "address")?)?),
            "mint" => Command::Mint(arg(0, "metadata-uri")?.to_string()),
            "list" => Command::List {
                token_id: parse_id(arg(0, "token-id")?)?,
                price: parse_price(arg(1, "eth")?)?,
            },
            "buy" => Command::Buy(parse_id(arg(0, "listing-id")?)?),
            "cancel" => Command::Cancel(parse_id(arg(0, "listing-id")?)?),
            "reprice" => Command::Reprice {
                listing_id: parse_id(arg(0, "listing-id")?)?,
                price: parse_price(arg(1, "eth")?)?,
            },
            "auction" => Command::Auction {
                token_id: parse_id(arg(0, "token-id")?)?,
                start_price: parse_price(arg(1, "start-eth")?)?,
                duration_secs: parse_id(arg(2, "duration-secs")?)?,
            },
            "bid" => Command::Bid {
                auction_id: parse_id(arg(0, "auction-id")?)?,
                amount: parse_price(arg(1, "eth")?)?,
            },
            "settle" => Command::Settle(parse_id(arg(0, "auction-id")?)?),
            other => return Err(usage(&format!("unknown command {other:?}"))),
        };

        Ok(command)
    }

    pub fn needs_signer(&self) -> bool {
        matches!(
            self,
            Command::Mint(_)
                | Command::List { .. }
                | Command::Buy(_)
                | Command::Cancel(_)
                | Command::Reprice { .. }
                | Command::Auction { .. }
                | Command::Bid { .. }
                | Command::Settle(_)
        )
    }
}

type Flags = Vec<(String, String)>;

fn split_flags(args: impl Iterator<Item = String>) -> Result<(Vec<String>, Flags)> {
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    let mut args = args.peekable();

    while let Some(arg) = args.next() {
        match arg.strip_prefix("--") {
            Some(flag) => match flag.split_once('=') {
                Some((key, value)) => flags.push((key.to_string(), value.to_string())),
                None => {
                    let value = args
                        .next()
                        .ok_or_else(|| usage(&format!("--{flag} needs a value")))?;
                    flags.push((flag.to_string(), value));
                }
            },
            None => positional.push(arg),
        }
    }

    Ok((positional, flags))
}

fn usage(msg: &str) -> Error {
    Error::InvalidInput(msg.to_string())
}

fn parse_id(value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| usage(&format!("{value:?} is not a non-negative integer")))
}

fn parse_account(value: &str) -> Result<Address> {
    value
        .trim()
        .parse()
        .map_err(|_| usage(&format!("{value:?} is not an address")))
}

// Range bounds may be zero, unlike prices.
fn parse_bound(value: &str) -> Result<U256> {
    ethers::utils::parse_ether(value.trim())
        .map_err(|_| usage(&format!("{value:?} is not an ether amount")))
}

fn parse_kind(value: &str) -> Result<SaleKind> {
    match value {
        "all" => Ok(SaleKind::All),
        "buy-now" => Ok(SaleKind::BuyNow),
        "auction" => Ok(SaleKind::Auction),
        other => Err(usage(&format!("unknown sale kind {other:?}"))),
    }
}

fn parse_market_sort(value: &str) -> Result<MarketSort> {
    match value {
        "recent" => Ok(MarketSort::Recent),
        "price-low" => Ok(MarketSort::PriceLow),
        "price-high" => Ok(MarketSort::PriceHigh),
        other => Err(usage(&format!("unknown sort {other:?}"))),
    }
}

fn parse_auction_sort(value: &str) -> Result<AuctionSort> {
    match value {
        "ending-soon" => Ok(AuctionSort::EndingSoon),
        "newly-listed" => Ok(AuctionSort::NewlyListed),
        "price-high" => Ok(AuctionSort::HighestBid),
        "price-low" => Ok(AuctionSort::LowestBid),
        other => Err(usage(&format!("unknown sort {other:?}"))),
    }
}

/// One-line summary of a record.
pub fn describe(record: &NftRecord) -> String {
    let sale = match &record.sale {
        SaleState::Unlisted => "not for sale".to_string(),
        SaleState::Listed {
            listing_id, price, ..
        } => format!("listing {listing_id} at {} ETH", format_ether(*price)),
        SaleState::OnAuction {
            auction_id,
            end_time,
            settlement_due,
            ..
        } => {
            let price = record.sale.effective_price().unwrap_or_default();
            if *settlement_due {
                format!(
                    "auction {auction_id} closed at {} ETH, awaiting settlement",
                    format_ether(price)
                )
            } else {
                format!("auction {auction_id} at {} ETH, ends {end_time}", format_ether(price))
            }
        }
        SaleState::Sold { price: Some(price) } => format!("sold for {} ETH", format_ether(*price)),
        SaleState::Sold { price: None } => "sold".to_string(),
    };

    format!(
        "#{} {} [{}] owner {} - {}",
        record.token_id,
        record.name,
        record.category,
        addr_hex(record.owner),
        sale
    )
}
