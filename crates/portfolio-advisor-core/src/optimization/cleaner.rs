use rust_decimal::prelude::*;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::optimization::frontier::WeightVector;
use crate::types::InstrumentId;

/// Default number of decimal places kept in a recommendation.
pub const DEFAULT_PRECISION: u32 = 4;

/// Turns raw solver weights into a presentable allocation.
///
/// Weights are rounded half-to-even in decimal arithmetic and anything that
/// rounds to zero or below is dropped. The remaining weights are not
/// renormalized, so their sum may miss 1 by a few units in the last place;
/// see [`Recommendation::residual`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightCleaner {
    precision: u32,
}

impl Default for WeightCleaner {
    fn default() -> Self {
        WeightCleaner {
            precision: DEFAULT_PRECISION,
        }
    }
}

impl WeightCleaner {
    pub fn new(precision: u32) -> Self {
        WeightCleaner { precision }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn clean(&self, raw: &WeightVector) -> Recommendation {
        let mut entries: Vec<(InstrumentId, Decimal)> = raw
            .iter()
            .filter_map(|(id, w)| {
                let rounded = round_weight(w, self.precision);
                (rounded > Decimal::ZERO).then(|| (id.clone(), rounded))
            })
            .collect();
        entries.sort_by(|(id_a, w_a), (id_b, w_b)| w_b.cmp(w_a).then_with(|| id_a.cmp(id_b)));
        Recommendation {
            entries,
            precision: self.precision,
        }
    }
}

fn round_weight(w: f64, precision: u32) -> Decimal {
    Decimal::from_f64(w)
        .unwrap_or(Decimal::ZERO)
        .round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven)
}

/// Final allocation handed back to callers: instrument → rounded weight,
/// ordered by descending weight (ties by identifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    entries: Vec<(InstrumentId, Decimal)>,
    precision: u32,
}

impl Recommendation {
    pub fn get(&self, id: &str) -> Option<Decimal> {
        self.entries.iter().find(|(i, _)| i == id).map(|(_, w)| *w)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstrumentId, Decimal)> + '_ {
        self.entries.iter().map(|(id, w)| (id, *w))
    }

    pub fn instruments(&self) -> Vec<&InstrumentId> {
        self.entries.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Sum of the rounded weights.
    pub fn total(&self) -> Decimal {
        self.entries.iter().map(|(_, w)| *w).sum()
    }

    /// `1 − total()`: what rounding and dropped dust left unallocated.
    pub fn residual(&self) -> Decimal {
        Decimal::ONE - self.total()
    }

    pub fn to_map(&self) -> BTreeMap<InstrumentId, f64> {
        self.entries
            .iter()
            .map(|(id, w)| (id.clone(), w.to_f64().unwrap_or(0.0)))
            .collect()
    }
}

impl Serialize for Recommendation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, w) in &self.entries {
            map.serialize_entry(id, &w.to_f64().unwrap_or(0.0))?;
        }
        map.end()
    }
}
