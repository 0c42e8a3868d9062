//! Exposed assets and the depth-damage curves used to value flood losses.
use crate::id::define_id_type;
use crate::input::is_sorted_and_unique;
use crate::units::{Dimensionless, Metres, Money};
use anyhow::{Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::sync::Arc;
use strum::{AsRefStr, EnumCount, EnumIter};

define_id_type! {CurveID}

/// A map of depth-damage curves, keyed by curve ID
pub type DamageCurveMap = IndexMap<CurveID, Arc<DepthDamageCurve>>;

/// The class of an exposed asset
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    AsRefStr,
    EnumIter,
    EnumCount,
    DeserializeLabeledStringEnum,
    SerializeLabeledStringEnum,
)]
#[strum(serialize_all = "snake_case")]
pub enum AssetClass {
    /// Housing
    #[string = "residential"]
    Residential,
    /// Shops, offices and services
    #[string = "commercial"]
    Commercial,
    /// Factories and warehouses
    #[string = "industrial"]
    Industrial,
    /// Roads, utilities and public buildings
    #[string = "infrastructure"]
    Infrastructure,
    /// Farmland and agricultural buildings
    #[string = "agricultural"]
    Agricultural,
}

/// A piecewise-linear function from flood depth to the fraction of asset value lost.
///
/// Depths below the first point are outside the curve's domain and incur no damage. Depths above
/// the last point are capped at the last point's fraction.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthDamageCurve {
    points: Vec<(Metres, Dimensionless)>,
}

impl DepthDamageCurve {
    /// Create a new curve from `(depth, fraction)` points.
    ///
    /// Depths must be non-negative and strictly increasing; fractions must lie in [0, 1] and be
    /// non-decreasing.
    pub fn new(points: Vec<(Metres, Dimensionless)>) -> Result<Self> {
        ensure!(!points.is_empty(), "Depth-damage curve has no points");

        let depths = points.iter().map(|(depth, _)| *depth).collect_vec();
        ensure!(
            depths.iter().all(|depth| depth.is_finite() && *depth >= Metres(0.0)),
            "Depth-damage curve depths must be finite and non-negative"
        );
        ensure!(
            is_sorted_and_unique(&depths),
            "Depth-damage curve depths must be strictly increasing"
        );
        ensure!(
            points
                .iter()
                .all(|(_, fraction)| (0.0..=1.0).contains(&fraction.value())),
            "Depth-damage curve fractions must be between 0 and 1"
        );
        ensure!(
            points
                .iter()
                .tuple_windows()
                .all(|((_, f1), (_, f2))| f1 <= f2),
            "Depth-damage curve fractions must be non-decreasing"
        );

        Ok(Self { points })
    }

    /// The smallest depth for which the curve is defined
    pub fn domain_min(&self) -> Metres {
        self.points[0].0
    }

    /// The fraction of value lost at the given flood depth
    pub fn damage_fraction(&self, depth: Metres) -> Dimensionless {
        if depth.value().is_nan() || depth < self.domain_min() {
            return Dimensionless(0.0);
        }

        // Find the first point at or beyond this depth
        let Some(upper) = self.points.iter().position(|(d, _)| *d >= depth) else {
            // Beyond the last point, so cap
            return self.points.last().map_or(Dimensionless(0.0), |(_, fraction)| *fraction);
        };
        if upper == 0 {
            return self.points[0].1;
        }

        let (d0, f0) = self.points[upper - 1];
        let (d1, f1) = self.points[upper];
        let weight = (depth - d0).value() / (d1 - d0).value();
        f0 + (f1 - f0) * Dimensionless(weight)
    }
}

/// An asset exposed to flooding in a grid cell
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    /// The asset's class
    pub class: AssetClass,
    /// The cost of replacing the asset
    pub value: Money,
    /// The curve used to value flood damage to this asset
    pub curve: Arc<DepthDamageCurve>,
}

impl Asset {
    /// The monetary damage to this asset at the given flood depth
    pub fn damage(&self, depth: Metres) -> Money {
        self.value * self.curve.damage_fraction(depth)
    }
}
