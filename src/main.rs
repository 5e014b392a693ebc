use std::env;
use std::sync::Arc;

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::TransactionReceipt;
use ethers::utils::format_ether;
use eyre::{eyre, Result};
use tracing::info;

use nft_market_reader::catalog::{unix_now, Catalog, ReconcileContext};
use nft_market_reader::cli::{describe, Command, USAGE};
use nft_market_reader::config::Config;
use nft_market_reader::contracts::{ChainSource, MarketSource};
use nft_market_reader::metadata::GatewayClient;
use nft_market_reader::models::{addr_hex, NftRecord, Snapshot};
use nft_market_reader::services::data_loader::chain_data::{load_catalog, load_detail, LoadReport};
use nft_market_reader::services::listener::watching::watch_market;
use nft_market_reader::services::logging::logger;
use nft_market_reader::services::store::SnapshotStore;
use nft_market_reader::services::trading::{signed_client, Trader};

#[tokio::main]
async fn main() -> Result<()> {
    let command = match Command::parse(env::args().skip(1)) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let config = Config::load()?;
    logger::init(config.log_file.as_deref())?;

    let (nft_address, market_address) = config.addresses()?;
    info!(
        rpc = %config.rpc_url,
        nft = %addr_hex(nft_address),
        market = %addr_hex(market_address),
        "configuration loaded"
    );

    let provider =
        Provider::<Http>::try_from(config.rpc_url.as_str())?.interval(config.poll_interval());

    if command.needs_signer() {
        return run_write(command, &config, provider).await;
    }

    let client: Arc<_> = Arc::new(provider.clone());
    let source = ChainSource::new(client, nft_address, market_address);
    let fetcher = GatewayClient::new(&config.ipfs_gateway, config.request_timeout())?;
    let ctx = ReconcileContext::new(nft_address, market_address, &config.ipfs_gateway);
    let concurrency = config.concurrency;

    match command {
        Command::Catalog => {
            let (catalog, report) = load_catalog(&source, &fetcher, &ctx, concurrency).await?;
            print_report(&report);
            print_records("Catalog", catalog.items().iter());

            let block = provider.get_block_number().await?.as_u64();
            let store = SnapshotStore::connect(&config).await?;
            store
                .save(&Snapshot {
                    block: Some(block),
                    taken_at: unix_now(),
                    items: catalog.into_items(),
                })
                .await?;
        }
        Command::Home => {
            let catalog = load(&source, &fetcher, &ctx, concurrency).await?;
            let home = catalog.home(4);
            if let Some(featured) = home.featured {
                println!("Featured: {}", describe(featured));
            }
            print_records("Trending", home.trending.into_iter());
            print_records("Live auctions", home.live_auctions.into_iter());
        }
        Command::Market(filter) => {
            let catalog = load(&source, &fetcher, &ctx, concurrency).await?;
            print_records("Marketplace", catalog.marketplace(&filter).into_iter());
        }
        Command::Auctions { query, sort } => {
            let catalog = load(&source, &fetcher, &ctx, concurrency).await?;
            let stats = catalog.auction_stats();
            println!(
                "{} live auctions, volume {} ETH, average {} ETH",
                stats.count,
                format_ether(stats.total_volume),
                stats
                    .average
                    .map(format_ether)
                    .unwrap_or_else(|| "-".to_string())
            );
            print_records("Auctions", catalog.auctions(&query, sort).into_iter());
            print_records("Awaiting settlement", catalog.pending_settlement().into_iter());
        }
        Command::Mine(account) => {
            let catalog = load(&source, &fetcher, &ctx, concurrency).await?;
            print_records("Owned", catalog.owned_by(account).into_iter());
            print_records("Created", catalog.created_by(account).into_iter());
            print_records("On auction", catalog.on_auction_by(account).into_iter());
        }
        Command::Detail(token_id) => {
            let detail = load_detail(&source, &fetcher, &ctx, token_id, concurrency).await?;
            println!("{}", describe(&detail.record));
            println!("  uri: {}", detail.record.token_uri);
            println!("  creator: {}", detail.record.creator);
            if let Some(image) = &detail.record.image {
                println!("  image: {image}");
            }
            if !detail.record.description.is_empty() {
                println!("  {}", detail.record.description);
            }
            for attribute in &detail.record.attributes {
                println!("  {}: {}", attribute.trait_type, attribute.value);
            }
            if let Some(royalty) = detail.royalty {
                println!(
                    "  royalty: {} ETH to {}",
                    format_ether(royalty.amount),
                    addr_hex(royalty.receiver)
                );
            }
            for sale in &detail.history {
                println!(
                    "  sold {} -> {} for {} ETH at {}",
                    addr_hex(sale.seller),
                    addr_hex(sale.buyer),
                    format_ether(sale.price),
                    sale.timestamp
                );
            }
        }
        Command::MintStatus(account) => {
            let status = source.mint_status(account).await?;
            println!(
                "fee {} ETH, cooldown {}s, last mint {}, can mint: {}",
                format_ether(status.fee),
                status.cooldown,
                status.last_mint_time,
                status.can_mint
            );
            if !status.can_mint {
                println!("next mint possible at {}", status.next_mint_at());
            }
        }
        Command::Watch => {
            let store = SnapshotStore::connect(&config).await?;
            watch_market(
                &provider,
                &source,
                &fetcher,
                &ctx,
                &store,
                concurrency,
                config.poll_interval(),
            )
            .await?;
        }
        write => return Err(eyre!("{write:?} needs a signer")),
    }

    Ok(())
}

async fn load(
    source: &ChainSource<Provider<Http>>,
    fetcher: &GatewayClient,
    ctx: &ReconcileContext,
    concurrency: usize,
) -> Result<Catalog> {
    let (catalog, report) = load_catalog(source, fetcher, ctx, concurrency).await?;
    print_report(&report);
    Ok(catalog)
}

async fn run_write(command: Command, config: &Config, provider: Provider<Http>) -> Result<()> {
    let key = config
        .private_key
        .as_deref()
        .ok_or_else(|| eyre!("MARKET_PRIVATE_KEY is required for write commands"))?;
    let (nft_address, market_address) = config.addresses()?;

    let client = signed_client(provider, key).await?;
    let account = client.address();
    let trader = Trader::new(client, account, nft_address, market_address);

    let receipt: TransactionReceipt = match command {
        Command::Mint(uri) => trader.mint(&uri).await?,
        Command::List { token_id, price } => trader.list_item(token_id, price).await?,
        Command::Buy(listing_id) => trader.buy_item(listing_id).await?,
        Command::Cancel(listing_id) => trader.cancel_listing(listing_id).await?,
        Command::Reprice { listing_id, price } => trader.update_price(listing_id, price).await?,
        Command::Auction {
            token_id,
            start_price,
            duration_secs,
        } => {
            trader
                .create_auction(token_id, start_price, duration_secs)
                .await?
        }
        Command::Bid { auction_id, amount } => trader.bid(auction_id, amount).await?,
        Command::Settle(auction_id) => trader.end_auction(auction_id).await?,
        other => return Err(eyre!("{other:?} is not a write command")),
    };

    println!(
        "confirmed {:?} in block {}",
        receipt.transaction_hash,
        receipt
            .block_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
    Ok(())
}

fn print_report(report: &LoadReport) {
    for failure in &report.failures {
        eprintln!("token {} skipped: {}", failure.token_id, failure.reason);
    }
}

fn print_records<'a>(title: &str, records: impl Iterator<Item = &'a NftRecord>) {
    println!("{title}:");
    let mut empty = true;
    for record in records {
        println!("  {}", describe(record));
        empty = false;
    }
    if empty {
        println!("  (none)");
    }
}
