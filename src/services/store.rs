//! Snapshot persistence for the reconciled catalog.

use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, FindOneOptions, FindOptions};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::models::{NftRecord, Snapshot};

pub enum SnapshotStore {
    Mongo(MongoStore),
    File(FileStore),
}

impl SnapshotStore {
    /// MongoDB when `mongo_uri` is configured, a JSON file otherwise.
    pub async fn connect(config: &Config) -> Result<Self> {
        match config.mongo_uri.as_deref() {
            Some(uri) => Ok(SnapshotStore::Mongo(
                MongoStore::connect(uri, &config.database).await?,
            )),
            None => Ok(SnapshotStore::File(FileStore::new(&config.snapshot_path))),
        }
    }

    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        match self {
            SnapshotStore::Mongo(store) => store.save(snapshot).await,
            SnapshotStore::File(store) => store.save(snapshot).await,
        }
    }

    pub async fn load(&self) -> Result<Option<Snapshot>> {
        match self {
            SnapshotStore::Mongo(store) => store.load().await,
            SnapshotStore::File(store) => store.load().await,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    block: Option<u64>,
    taken_at: u64,
    count: u64,
}

pub struct MongoStore {
    nfts: Collection<NftRecord>,
    snapshots: Collection<SnapshotMeta>,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let mut client_options = ClientOptions::parse(uri).await?;
        client_options.app_name = Some("nft-market-reader".to_string());
        let client = Client::with_options(client_options)?;
        let db = client.database(database);

        info!(database, "connected to mongodb");

        Ok(Self {
            nfts: db.collection::<NftRecord>("nfts"),
            snapshots: db.collection::<SnapshotMeta>("snapshots"),
        })
    }

    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.nfts.drop(None).await?;
        if !snapshot.items.is_empty() {
            self.nfts.insert_many(&snapshot.items, None).await?;
        }

        self.snapshots.delete_many(doc! {}, None).await?;
        self.snapshots
            .insert_one(
                SnapshotMeta {
                    block: snapshot.block,
                    taken_at: snapshot.taken_at,
                    count: snapshot.items.len() as u64,
                },
                None,
            )
            .await?;

        debug!(items = snapshot.items.len(), "snapshot stored in mongodb");
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let latest = FindOneOptions::builder()
            .sort(doc! {"taken_at": -1})
            .build();
        let Some(meta) = self.snapshots.find_one(doc! {}, latest).await? else {
            return Ok(None);
        };

        let by_token = FindOptions::builder().sort(doc! {"token_id": 1}).build();
        let items: Vec<NftRecord> = self.nfts.find(doc! {}, by_token).await?.try_collect().await?;

        Ok(Some(Snapshot {
            block: meta.block,
            taken_at: meta.taken_at,
            items,
        }))
    }
}

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Written to a sibling temp file first, then renamed over the old snapshot.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), items = snapshot.items.len(), "snapshot written");
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<Snapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
