//! Cost ledger
//!
//! Increment-only accounting of units and cost per provider per period.
//! Each `(provider, period_key)` record sits behind its own mutex. Records are
//! only ever added to; a restored snapshot merges by taking the larger value
//! of each counter so totals never go backwards.

use crate::config::LedgerPeriod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Accumulated usage of one provider in one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub provider_name: String,
    pub period_key: String,
    pub total_units: u64,
    pub total_cost: f64,
    #[serde(default)]
    pub requests: u64,
}

/// Ledger contents for one period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerReport {
    pub period_key: String,
    pub records: Vec<LedgerRecord>,
    pub total_units: u64,
    pub total_cost: f64,
}

/// All-time totals for one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderTotals {
    pub provider_name: String,
    pub total_units: u64,
    pub total_cost: f64,
    pub requests: u64,
}

type RecordKey = (String, String);

/// Per-provider, per-period cost accounting
#[derive(Debug)]
pub struct CostLedger {
    period: LedgerPeriod,
    records: RwLock<HashMap<RecordKey, Arc<Mutex<LedgerRecord>>>>,
}

impl CostLedger {
    pub fn new(period: LedgerPeriod) -> Self {
        Self {
            period,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn period(&self) -> LedgerPeriod {
        self.period
    }

    /// Period key for a timestamp: `YYYY-MM-DD` (daily) or `YYYY-MM` (monthly)
    pub fn period_key(&self, at: DateTime<Utc>) -> String {
        match self.period {
            LedgerPeriod::Daily => at.format("%Y-%m-%d").to_string(),
            LedgerPeriod::Monthly => at.format("%Y-%m").to_string(),
        }
    }

    /// Key of the period containing now
    pub fn current_period(&self) -> String {
        self.period_key(Utc::now())
    }

    fn record_entry(&self, key: RecordKey) -> Arc<Mutex<LedgerRecord>> {
        if let Some(existing) = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(existing);
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(records.entry(key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(LedgerRecord {
                provider_name: key.0,
                period_key: key.1,
                total_units: 0,
                total_cost: 0.0,
                requests: 0,
            }))
        }))
    }

    /// Account one answered request in the current period
    pub fn record(&self, provider: &str, units: u64, cost_per_unit: f64) {
        self.record_at(provider, units, cost_per_unit, Utc::now());
    }

    /// Account one answered request in the period containing `at`
    pub fn record_at(&self, provider: &str, units: u64, cost_per_unit: f64, at: DateTime<Utc>) {
        let cost = units as f64 * cost_per_unit;
        if !cost.is_finite() || cost < 0.0 {
            tracing::warn!(
                provider = %provider,
                units = units,
                cost_per_unit = cost_per_unit,
                "Refusing to record invalid cost in ledger"
            );
            return;
        }

        let key = (provider.to_string(), self.period_key(at));
        let entry = self.record_entry(key);
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        record.total_units = record.total_units.saturating_add(units);
        record.total_cost += cost;
        record.requests = record.requests.saturating_add(1);

        tracing::debug!(
            provider = %provider,
            period = %record.period_key,
            units = units,
            cost = cost,
            total_cost = record.total_cost,
            "Ledger updated"
        );
    }

    /// Copy of every record, sorted by period then provider
    pub fn records(&self) -> Vec<LedgerRecord> {
        let mut records: Vec<LedgerRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|r| r.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        records.sort_by(|a, b| {
            (&a.period_key, &a.provider_name).cmp(&(&b.period_key, &b.provider_name))
        });
        records
    }

    /// Records and totals for one period
    pub fn report(&self, period_key: &str) -> LedgerReport {
        let records: Vec<LedgerRecord> = self
            .records()
            .into_iter()
            .filter(|r| r.period_key == period_key)
            .collect();

        LedgerReport {
            period_key: period_key.to_string(),
            total_units: records.iter().map(|r| r.total_units).sum(),
            total_cost: records.iter().map(|r| r.total_cost).sum(),
            records,
        }
    }

    /// Totals per provider across all periods, sorted by provider name
    pub fn totals_by_provider(&self) -> Vec<ProviderTotals> {
        let mut totals: BTreeMap<String, ProviderTotals> = BTreeMap::new();
        for record in self.records() {
            let entry = totals
                .entry(record.provider_name.clone())
                .or_insert_with(|| ProviderTotals {
                    provider_name: record.provider_name.clone(),
                    total_units: 0,
                    total_cost: 0.0,
                    requests: 0,
                });
            entry.total_units += record.total_units;
            entry.total_cost += record.total_cost;
            entry.requests += record.requests;
        }
        totals.into_values().collect()
    }

    /// Merge persisted records, keeping the larger value of each counter
    pub fn restore(&self, records: &[LedgerRecord]) {
        for persisted in records {
            let entry = self.record_entry((
                persisted.provider_name.clone(),
                persisted.period_key.clone(),
            ));
            let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
            record.total_units = record.total_units.max(persisted.total_units);
            if persisted.total_cost.is_finite() {
                record.total_cost = record.total_cost.max(persisted.total_cost);
            }
            record.requests = record.requests.max(persisted.requests);
        }
        tracing::info!(records = records.len(), "Cost ledger restored");
    }
}
