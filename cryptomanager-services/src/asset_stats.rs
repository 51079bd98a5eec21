//! Asset Stats Calculator
//!
//! Reconciles the per-exchange statistics of an asset into one canonical
//! record. Exchanges whose price deviates too far from the consensus are
//! ignored, and the remaining readings are averaged weighted by volume.
//!
//! All arithmetic is checked. A reading whose value times volume doesn't fit
//! a `Decimal` is treated as invalid, and a ratio that can't be represented
//! counts as deviating.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use tracing::warn;

use cryptomanager_core::{Asset, ExchangeAsset, TickerType};

/// Default maximum relative deviation from the consensus price (20%)
pub const DEFAULT_MAX_DEVIATION: Decimal = Decimal::from_parts(20, 0, 0, false, 2);

/// Configuration for the asset stats calculation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetStatsConfig {
    /// Maximum relative deviation a price may have from the consensus
    pub max_deviation: Decimal,
}

impl Default for AssetStatsConfig {
    fn default() -> Self {
        Self {
            max_deviation: DEFAULT_MAX_DEVIATION,
        }
    }
}

/// Calculates canonical asset records from per-exchange observations
#[derive(Debug, Clone, Default)]
pub struct AssetStatsCalculator {
    config: AssetStatsConfig,
}

impl AssetStatsCalculator {
    pub fn new(config: AssetStatsConfig) -> Self {
        Self { config }
    }

    /// Calculate one canonical asset per distinct asset id
    ///
    /// Output order follows the first occurrence of each asset in `observations`.
    pub fn calculate(&self, observations: &[ExchangeAsset], now: DateTime<Utc>) -> Vec<Asset> {
        let mut groups: IndexMap<&str, Vec<&ExchangeAsset>> = IndexMap::new();
        for observation in observations {
            groups
                .entry(observation.asset.as_str())
                .or_default()
                .push(observation);
        }

        groups
            .into_iter()
            .filter_map(|(asset, group)| self.calculate_asset(asset, &group, now))
            .collect()
    }

    /// Canonical record for one asset, `None` for an empty group
    fn calculate_asset(
        &self,
        asset: &str,
        group: &[&ExchangeAsset],
        now: DateTime<Utc>,
    ) -> Option<Asset> {
        let asset_type = group.first()?.asset_type;
        let consensus = self.consensus(group);

        if consensus.is_empty() {
            // No price could be agreed on; keep the asset known but unpriced
            return Some(Asset::unpriced(asset, asset_type, now));
        }

        // Value and volume use every surviving ticker, change percentage
        // prefers 24h tickers
        let day_tickers: Vec<&ExchangeAsset> = consensus
            .iter()
            .copied()
            .filter(|o| o.ticker_type == TickerType::Day24H)
            .collect();
        let change_set = if day_tickers.is_empty() {
            &consensus
        } else {
            &day_tickers
        };

        let value = weighted_average(&consensus, |o| o.value);
        let volume = total_volume(&consensus);
        let (Some(value), Some(volume)) = (value, volume) else {
            warn!(asset, "Asset readings overflow when combined, storing unpriced");
            return Some(Asset::unpriced(asset, asset_type, now));
        };

        Some(Asset {
            id: asset.to_string(),
            asset_type,
            value: Some(value),
            volume,
            change_percentage: weighted_average(change_set, |o| o.change_percentage),
            update_time: now,
        })
    }

    /// Valid observations that agree on a price
    fn consensus<'a>(&self, group: &[&'a ExchangeAsset]) -> Vec<&'a ExchangeAsset> {
        let mut valid: Vec<&ExchangeAsset> = group
            .iter()
            .copied()
            .filter(|o| o.is_valid() && price(o).checked_mul(o.volume).is_some())
            .collect();

        match valid.len() {
            0 | 1 => {}
            2 => {
                // With two readings there's no majority; both go if they disagree
                let ratio = price(valid[0]).checked_div(price(valid[1]));
                if self.deviates(ratio) {
                    valid.clear();
                }
            }
            _ => match weighted_average(&valid, |o| o.value) {
                Some(average) => {
                    valid.retain(|o| !self.deviates(price(o).checked_div(average)));
                }
                None => valid.clear(),
            },
        }

        valid
    }

    fn deviates(&self, ratio: Option<Decimal>) -> bool {
        match ratio {
            Some(ratio) => (Decimal::ONE - ratio).abs() > self.config.max_deviation,
            None => true,
        }
    }
}

fn price(observation: &ExchangeAsset) -> Decimal {
    observation.value.unwrap_or(Decimal::ZERO)
}

fn total_volume(observations: &[&ExchangeAsset]) -> Option<Decimal> {
    observations
        .iter()
        .try_fold(Decimal::ZERO, |sum, o| sum.checked_add(o.volume))
}

/// Volume weighted average of a field
///
/// Every observation's volume counts towards the weight; observations
/// without the field add nothing to the weighted sum. `None` when no
/// observation has the field, the weight is zero, or the sums overflow.
fn weighted_average<F>(observations: &[&ExchangeAsset], field: F) -> Option<Decimal>
where
    F: Fn(&ExchangeAsset) -> Option<Decimal>,
{
    let mut weighted_sum = Decimal::ZERO;
    let mut total_volume = Decimal::ZERO;
    let mut any_value = false;
    for &observation in observations {
        if let Some(value) = field(observation) {
            weighted_sum = weighted_sum.checked_add(value.checked_mul(observation.volume)?)?;
            any_value = true;
        }
        total_volume = total_volume.checked_add(observation.volume)?;
    }

    if !any_value || total_volume.is_zero() {
        None
    } else {
        weighted_sum.checked_div(total_volume)
    }
}
