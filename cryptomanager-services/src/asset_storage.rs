//! Asset Storage Service
//!
//! SQLite-based storage for per-exchange asset observations and the
//! canonical assets calculated from them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use cryptomanager_core::{Asset, AssetType, CoreError, ExchangeAsset, TickerType};

use crate::asset_analyzer::{AggregateStore, RawObservationSource};

/// Default page size for asset listings
const DEFAULT_PAGE_SIZE: usize = 20;

/// Asset storage service using SQLite
pub struct AssetStorage {
    conn: Mutex<Connection>,
}

impl AssetStorage {
    /// Create a new AssetStorage instance
    ///
    /// Creates the database file and tables if they don't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, AssetStorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AssetStorageError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;

        Ok(storage)
    }

    /// Create an in-memory AssetStorage (useful for testing)
    pub fn new_in_memory() -> Result<Self, AssetStorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;

        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), AssetStorageError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_assets (
                exchange TEXT NOT NULL,
                asset TEXT NOT NULL,
                asset_type TEXT NOT NULL,
                value TEXT,
                volume TEXT NOT NULL,
                change_percentage TEXT,
                ticker_type TEXT NOT NULL,
                update_time INTEGER NOT NULL,
                PRIMARY KEY (exchange, asset)
            );

            CREATE INDEX IF NOT EXISTS idx_exchange_assets_asset
            ON exchange_assets(asset);

            CREATE TABLE IF NOT EXISTS assets (
                id TEXT PRIMARY KEY,
                asset_type TEXT NOT NULL,
                value TEXT,
                volume TEXT NOT NULL,
                change_percentage TEXT,
                update_time INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    /// Insert or update per-exchange observations, keyed by (exchange, asset)
    pub fn upsert_exchange_assets(
        &self,
        observations: &[ExchangeAsset],
    ) -> Result<usize, AssetStorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO exchange_assets
                    (exchange, asset, asset_type, value, volume, change_percentage, ticker_type, update_time)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(exchange, asset) DO UPDATE SET
                    asset_type = excluded.asset_type,
                    value = excluded.value,
                    volume = excluded.volume,
                    change_percentage = excluded.change_percentage,
                    ticker_type = excluded.ticker_type,
                    update_time = excluded.update_time
                "#,
            )?;

            for o in observations {
                stmt.execute(params![
                    o.exchange,
                    o.asset,
                    o.asset_type.as_str(),
                    o.value.map(|v| v.to_string()),
                    o.volume.to_string(),
                    o.change_percentage.map(|v| v.to_string()),
                    o.ticker_type.as_str(),
                    o.update_time.timestamp_millis(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(observations.len())
    }

    /// All distinct asset ids with at least one exchange observation, sorted
    pub fn distinct_asset_ids(&self) -> Result<Vec<String>, AssetStorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT asset FROM exchange_assets ORDER BY asset")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Exchange observations for the given assets
    pub fn exchange_assets_for(
        &self,
        asset_ids: &HashSet<String>,
    ) -> Result<Vec<ExchangeAsset>, AssetStorageError> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; asset_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT exchange, asset, asset_type, value, volume, change_percentage, ticker_type, update_time
            FROM exchange_assets
            WHERE asset IN ({})
            ORDER BY asset, exchange
            "#,
            placeholders
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(asset_ids.iter()), |row| {
                Ok(RawExchangeAssetRow {
                    exchange: row.get(0)?,
                    asset: row.get(1)?,
                    asset_type: row.get(2)?,
                    value: row.get(3)?,
                    volume: row.get(4)?,
                    change_percentage: row.get(5)?,
                    ticker_type: row.get(6)?,
                    update_time: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawExchangeAssetRow::parse).collect()
    }

    /// Insert or update canonical assets in a single transaction
    pub fn upsert_assets(&self, assets: &[Asset]) -> Result<usize, AssetStorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO assets (id, asset_type, value, volume, change_percentage, update_time)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    asset_type = excluded.asset_type,
                    value = excluded.value,
                    volume = excluded.volume,
                    change_percentage = excluded.change_percentage,
                    update_time = excluded.update_time
                "#,
            )?;

            for asset in assets {
                stmt.execute(params![
                    asset.id,
                    asset.asset_type.as_str(),
                    asset.value.map(|v| v.to_string()),
                    asset.volume.to_string(),
                    asset.change_percentage.map(|v| v.to_string()),
                    asset.update_time.timestamp_millis(),
                ])?;
            }
        }

        tx.commit()?;
        debug!("Upserted {} assets", assets.len());
        Ok(assets.len())
    }

    /// Get a single canonical asset
    pub fn get_asset(&self, id: &str) -> Result<Option<Asset>, AssetStorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, asset_type, value, volume, change_percentage, update_time FROM assets WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], RawAssetRow::from_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?.parse()?)),
            None => Ok(None),
        }
    }

    /// Page through canonical assets
    pub fn query_assets(&self, query: &AssetQuery) -> Result<AssetPage, AssetStorageError> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                r#"
                SELECT id, asset_type, value, volume, change_percentage, update_time
                FROM assets
                WHERE (?1 IS NULL OR asset_type = ?1)
                  AND (?2 IS NULL OR instr(id, ?2) > 0)
                "#,
            )?;
            let rows = stmt
                .query_map(
                    params![query.asset_type.map(|t| t.as_str()), query.query.as_deref()],
                    RawAssetRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut assets = rows
            .into_iter()
            .map(RawAssetRow::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if query.min_usd_volume > Decimal::ZERO {
            assets.retain(|a| a.volume_usd().is_some_and(|v| v > query.min_usd_volume));
        }

        assets.sort_by(|a, b| {
            let (a_key, b_key) = (query.order_by.key(a), query.order_by.key(b));
            match (a_key, b_key) {
                (Some(a_key), Some(b_key)) => match query.direction {
                    OrderDirection::Ascending => a_key.cmp(&b_key),
                    OrderDirection::Descending => b_key.cmp(&a_key),
                },
                // Assets without a key always go last
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| a.id.cmp(&b.id))
        });

        let page = query.page.max(1);
        let page_size = if query.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.page_size
        };
        let total = assets.len();
        let items = assets
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(AssetPage {
            page,
            page_size,
            total,
            items,
        })
    }
}

#[async_trait]
impl RawObservationSource for AssetStorage {
    async fn distinct_asset_ids(&self) -> Result<Vec<String>, AssetStorageError> {
        AssetStorage::distinct_asset_ids(self)
    }

    async fn observations_for(
        &self,
        asset_ids: &HashSet<String>,
    ) -> Result<Vec<ExchangeAsset>, AssetStorageError> {
        self.exchange_assets_for(asset_ids)
    }
}

#[async_trait]
impl AggregateStore for AssetStorage {
    async fn upsert_batch(&self, assets: &[Asset]) -> Result<(), AssetStorageError> {
        self.upsert_assets(assets).map(|_| ())
    }
}

impl std::fmt::Debug for AssetStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStorage").finish_non_exhaustive()
    }
}

/// Field to order asset listings by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssetOrderBy {
    Volume,
    #[default]
    VolumeUsd,
    ChangePercentage,
}

impl AssetOrderBy {
    fn key(&self, asset: &Asset) -> Option<Decimal> {
        match self {
            AssetOrderBy::Volume => Some(asset.volume),
            AssetOrderBy::VolumeUsd => asset.volume_usd(),
            AssetOrderBy::ChangePercentage => asset.change_percentage,
        }
    }
}

impl FromStr for AssetOrderBy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "volume" => Ok(AssetOrderBy::Volume),
            "volumeusd" | "volume_usd" => Ok(AssetOrderBy::VolumeUsd),
            "changepercentage" | "change_percentage" => Ok(AssetOrderBy::ChangePercentage),
            _ => Err(CoreError::parse(format!("Unknown order field: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    #[default]
    Descending,
}

/// Filter, ordering and paging for asset listings
#[derive(Debug, Clone, PartialEq)]
pub struct AssetQuery {
    /// Substring the asset id must contain
    pub query: Option<String>,
    pub asset_type: Option<AssetType>,
    pub order_by: AssetOrderBy,
    pub direction: OrderDirection,
    /// Minimum traded volume in the reference currency
    pub min_usd_volume: Decimal,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
}

impl Default for AssetQuery {
    fn default() -> Self {
        Self {
            query: None,
            asset_type: None,
            order_by: AssetOrderBy::default(),
            direction: OrderDirection::default(),
            min_usd_volume: Decimal::ZERO,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of canonical assets
#[derive(Debug, Clone, PartialEq)]
pub struct AssetPage {
    pub page: usize,
    pub page_size: usize,
    /// Number of assets matching the filter, over all pages
    pub total: usize,
    pub items: Vec<Asset>,
}

struct RawExchangeAssetRow {
    exchange: String,
    asset: String,
    asset_type: String,
    value: Option<String>,
    volume: String,
    change_percentage: Option<String>,
    ticker_type: String,
    update_time: i64,
}

impl RawExchangeAssetRow {
    fn parse(self) -> Result<ExchangeAsset, AssetStorageError> {
        Ok(ExchangeAsset {
            asset_type: AssetType::from_str(&self.asset_type)?,
            value: parse_optional_decimal(self.value.as_deref())?,
            volume: parse_decimal(&self.volume)?,
            change_percentage: parse_optional_decimal(self.change_percentage.as_deref())?,
            ticker_type: TickerType::from_str(&self.ticker_type)?,
            update_time: parse_timestamp(self.update_time)?,
            exchange: self.exchange,
            asset: self.asset,
        })
    }
}

struct RawAssetRow {
    id: String,
    asset_type: String,
    value: Option<String>,
    volume: String,
    change_percentage: Option<String>,
    update_time: i64,
}

impl RawAssetRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            asset_type: row.get(1)?,
            value: row.get(2)?,
            volume: row.get(3)?,
            change_percentage: row.get(4)?,
            update_time: row.get(5)?,
        })
    }

    fn parse(self) -> Result<Asset, AssetStorageError> {
        Ok(Asset {
            asset_type: AssetType::from_str(&self.asset_type)?,
            value: parse_optional_decimal(self.value.as_deref())?,
            volume: parse_decimal(&self.volume)?,
            change_percentage: parse_optional_decimal(self.change_percentage.as_deref())?,
            update_time: parse_timestamp(self.update_time)?,
            id: self.id,
        })
    }
}

fn parse_decimal(value: &str) -> Result<Decimal, AssetStorageError> {
    Decimal::from_str(value)
        .map_err(|e| AssetStorageError::Parse(format!("Invalid decimal '{}': {}", value, e)))
}

fn parse_optional_decimal(value: Option<&str>) -> Result<Option<Decimal>, AssetStorageError> {
    value.map(parse_decimal).transpose()
}

fn parse_timestamp(millis: i64) -> Result<DateTime<Utc>, AssetStorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AssetStorageError::Parse(format!("Invalid timestamp: {}", millis)))
}

/// Errors that can occur during asset storage operations
#[derive(Debug, thiserror::Error)]
pub enum AssetStorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn exchange_asset(exchange: &str, asset: &str, value: Option<Decimal>) -> ExchangeAsset {
        ExchangeAsset {
            exchange: exchange.to_string(),
            asset: asset.to_string(),
            asset_type: AssetType::Crypto,
            value,
            volume: dec!(10),
            change_percentage: Some(dec!(1.25)),
            ticker_type: TickerType::Day24H,
            update_time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    fn asset(id: &str, value: Option<Decimal>, volume: Decimal, change: Option<Decimal>) -> Asset {
        Asset {
            id: id.to_string(),
            asset_type: AssetType::Crypto,
            value,
            volume,
            change_percentage: change,
            update_time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_exchange_assets_round_trip() {
        let storage = AssetStorage::new_in_memory().unwrap();
        let observations = vec![
            exchange_asset("Binance", "ETH", Some(dec!(2000.12345678))),
            exchange_asset("Kraken", "ETH", None),
            exchange_asset("Binance", "BTC", Some(dec!(40000))),
        ];
        storage.upsert_exchange_assets(&observations).unwrap();

        assert_eq!(storage.distinct_asset_ids().unwrap(), vec!["BTC", "ETH"]);

        let ids: HashSet<String> = ["ETH".to_string()].into_iter().collect();
        let loaded = storage.exchange_assets_for(&ids).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], observations[0]);
        assert_eq!(loaded[1].value, None);
    }

    #[test]
    fn test_exchange_asset_upsert_replaces_row() {
        let storage = AssetStorage::new_in_memory().unwrap();
        storage
            .upsert_exchange_assets(&[exchange_asset("Binance", "ETH", Some(dec!(1)))])
            .unwrap();
        storage
            .upsert_exchange_assets(&[exchange_asset("Binance", "ETH", Some(dec!(2)))])
            .unwrap();

        let ids: HashSet<String> = ["ETH".to_string()].into_iter().collect();
        let loaded = storage.exchange_assets_for(&ids).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].value, Some(dec!(2)));
    }

    #[test]
    fn test_upsert_assets_overwrites() {
        let storage = AssetStorage::new_in_memory().unwrap();
        storage
            .upsert_assets(&[asset("ETH", Some(dec!(100)), dec!(5), None)])
            .unwrap();
        storage
            .upsert_assets(&[asset("ETH", None, dec!(0), None)])
            .unwrap();

        let stored = storage.get_asset("ETH").unwrap().unwrap();
        assert_eq!(stored.value, None);
        assert!(storage.get_asset("BTC").unwrap().is_none());
    }

    #[test]
    fn test_query_assets_orders_by_usd_volume() {
        let storage = AssetStorage::new_in_memory().unwrap();
        storage
            .upsert_assets(&[
                asset("ETH", Some(dec!(2000)), dec!(10), Some(dec!(1))),
                asset("BTC", Some(dec!(40000)), dec!(1), Some(dec!(-2))),
                asset("XYZ", None, dec!(0), None),
                asset("DOGE", Some(dec!(0.1)), dec!(1000), Some(dec!(5))),
            ])
            .unwrap();

        let page = storage.query_assets(&AssetQuery::default()).unwrap();
        let ids: Vec<&str> = page.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["BTC", "ETH", "DOGE", "XYZ"]);
        assert_eq!(page.total, 4);

        let ascending = storage
            .query_assets(&AssetQuery {
                order_by: AssetOrderBy::ChangePercentage,
                direction: OrderDirection::Ascending,
                ..AssetQuery::default()
            })
            .unwrap();
        let ids: Vec<&str> = ascending.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["BTC", "ETH", "DOGE", "XYZ"]);
    }

    #[test]
    fn test_query_assets_filters_and_pages() {
        let storage = AssetStorage::new_in_memory().unwrap();
        storage
            .upsert_assets(&[
                asset("ETH", Some(dec!(2000)), dec!(10), None),
                asset("ETHFI", Some(dec!(2)), dec!(10), None),
                asset("BTC", Some(dec!(40000)), dec!(1), None),
            ])
            .unwrap();

        let filtered = storage
            .query_assets(&AssetQuery {
                query: Some("ETH".to_string()),
                ..AssetQuery::default()
            })
            .unwrap();
        assert_eq!(filtered.total, 2);

        let rich = storage
            .query_assets(&AssetQuery {
                min_usd_volume: dec!(100),
                ..AssetQuery::default()
            })
            .unwrap();
        assert_eq!(rich.total, 2);

        let second_page = storage
            .query_assets(&AssetQuery {
                page: 2,
                page_size: 2,
                ..AssetQuery::default()
            })
            .unwrap();
        assert_eq!(second_page.total, 3);
        assert_eq!(second_page.items.len(), 1);
        assert_eq!(second_page.items[0].id, "ETHFI");

        let far_page = storage
            .query_assets(&AssetQuery {
                page: usize::MAX,
                ..AssetQuery::default()
            })
            .unwrap();
        assert_eq!(far_page.total, 3);
        assert!(far_page.items.is_empty());
    }

    #[test]
    fn test_order_by_parsing() {
        assert_eq!("VolumeUsd".parse::<AssetOrderBy>().unwrap(), AssetOrderBy::VolumeUsd);
        assert_eq!(
            "change_percentage".parse::<AssetOrderBy>().unwrap(),
            AssetOrderBy::ChangePercentage
        );
        assert!("price".parse::<AssetOrderBy>().is_err());
    }
}
