use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

pub const UNTITLED: &str = "Untitled NFT";
pub const UNCATEGORIZED: &str = "uncategorized";

/// JSON document served at a token URI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(alias = "trait")]
    pub trait_type: String,
    pub value: serde_json::Value,
}

/// A minted token as read from the token contract.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub token_id: u64,
    pub owner: Address,
    pub token_uri: String,
    pub metadata: TokenMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: u64, // index in getAllListings
    pub seller: Address,
    pub price: U256,
    pub nft: Address,
    pub token_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub auction_id: u64,
    pub seller: Address,
    pub nft: Address,
    pub token_id: u64,
    pub start_price: U256,
    pub highest_bid: U256,
    pub highest_bidder: Address,
    pub end_time: u64,
    pub ended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub seller: Address,
    pub buyer: Address,
    pub nft: Address,
    pub token_id: u64,
    pub price: U256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Royalty {
    pub receiver: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintStatus {
    pub fee: U256,
    pub cooldown: u64,
    pub last_mint_time: u64,
    pub can_mint: bool,
}

impl MintStatus {
    /// Unix time at which the cooldown for this account is over.
    pub fn next_mint_at(&self) -> u64 {
        self.last_mint_time.saturating_add(self.cooldown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SaleState {
    Unlisted,
    Listed {
        listing_id: u64,
        seller: Address,
        price: U256,
    },
    OnAuction {
        auction_id: u64,
        seller: Address,
        start_price: U256,
        highest_bid: U256,
        highest_bidder: Option<Address>,
        end_time: u64,
        settlement_due: bool,
    },
    Sold {
        price: Option<U256>,
    },
}

impl SaleState {
    pub fn is_auction(&self) -> bool {
        matches!(self, SaleState::OnAuction { .. })
    }

    pub fn is_listed(&self) -> bool {
        matches!(self, SaleState::Listed { .. })
    }

    /// Highest bid when there is one, otherwise the asking price.
    pub fn effective_price(&self) -> Option<U256> {
        match self {
            SaleState::Listed { price, .. } => Some(*price),
            SaleState::OnAuction {
                start_price,
                highest_bid,
                ..
            } => {
                if highest_bid.is_zero() {
                    Some(*start_price)
                } else {
                    Some(*highest_bid)
                }
            }
            SaleState::Unlisted | SaleState::Sold { .. } => None,
        }
    }

    pub fn seller(&self) -> Option<Address> {
        match self {
            SaleState::Listed { seller, .. } | SaleState::OnAuction { seller, .. } => {
                Some(*seller)
            }
            _ => None,
        }
    }
}

/// Reconciled read model for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftRecord {
    pub token_id: u64,
    pub owner: Address,
    pub token_uri: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub category: String,
    pub creator: String,
    pub attributes: Vec<Attribute>,
    pub sale: SaleState,
}

impl NftRecord {
    pub fn is_owned_by(&self, account: Address) -> bool {
        self.owner == account
    }

    /// Creator from metadata is free text; match it against an address case-insensitively.
    pub fn is_created_by(&self, account: Address) -> bool {
        self.creator.eq_ignore_ascii_case(&addr_hex(account))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftDetail {
    pub record: NftRecord,
    pub royalty: Option<Royalty>,
    pub history: Vec<Sale>,
}

/// Persisted catalog snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub block: Option<u64>,
    pub taken_at: u64,
    pub items: Vec<NftRecord>,
}

pub fn addr_hex(address: Address) -> String {
    format!("0x{}", hex::encode(address.as_fixed_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_tolerates_missing_and_unknown_fields() {
        let json = r#"{
            "name": "Cosmic Dreams #001",
            "image": "ipfs://QmImage",
            "external_url": "https://example.org",
            "attributes": [{"trait_type": "Rarity", "value": "Legendary"}, {"trait": "Level", "value": 3}]
        }"#;

        let metadata: TokenMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.name.as_deref(), Some("Cosmic Dreams #001"));
        assert_eq!(metadata.description, None);
        assert_eq!(metadata.attributes.len(), 2);
        assert_eq!(metadata.attributes[1].trait_type, "Level");
    }

    #[test]
    fn effective_price_prefers_highest_bid() {
        let auction = SaleState::OnAuction {
            auction_id: 0,
            seller: Address::repeat_byte(1),
            start_price: U256::from(100),
            highest_bid: U256::zero(),
            highest_bidder: None,
            end_time: 10,
            settlement_due: false,
        };
        assert_eq!(auction.effective_price(), Some(U256::from(100)));

        let bid = SaleState::OnAuction {
            auction_id: 0,
            seller: Address::repeat_byte(1),
            start_price: U256::from(100),
            highest_bid: U256::from(250),
            highest_bidder: Some(Address::repeat_byte(2)),
            end_time: 10,
            settlement_due: false,
        };
        assert_eq!(bid.effective_price(), Some(U256::from(250)));
        assert_eq!(SaleState::Unlisted.effective_price(), None);
    }

    #[test]
    fn created_by_ignores_case() {
        let creator = Address::repeat_byte(0xab);
        let record = NftRecord {
            token_id: 1,
            owner: creator,
            token_uri: String::new(),
            name: UNTITLED.into(),
            description: String::new(),
            image: None,
            category: UNCATEGORIZED.into(),
            creator: addr_hex(creator).to_uppercase().replace("0X", "0x"),
            attributes: Vec::new(),
            sale: SaleState::Unlisted,
        };
        assert!(record.is_created_by(creator));
        assert!(!record.is_created_by(Address::repeat_byte(0xcd)));
    }
}
