//! Index formula registry
//!
//! The set of indices the pipeline can compute is closed: every formula id
//! maps to one pure function of aligned Sentinel-2 bands. Ids coming from
//! configuration are validated once with [`Formula::parse_all`], so an
//! unknown id fails before any raster is read.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sda_core::raster::Raster;
use sda_core::{Error, Result};

use super::indices::{evi, nbr, ndmi, ndvi, ndwi, savi, EviParams, SaviParams};

/// Sentinel-2 band labels used by the registry
pub mod bands {
    pub const BLUE: &str = "B02";
    pub const GREEN: &str = "B03";
    pub const RED: &str = "B04";
    pub const NIR: &str = "B08";
    pub const SWIR1: &str = "B11";
    pub const SWIR2: &str = "B12";
}

/// A registered index formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formula {
    Ndvi,
    Nbr,
    Ndwi,
    Ndmi,
    Savi,
    Evi,
}

impl Formula {
    /// Every registered formula
    pub const ALL: [Formula; 6] = [
        Formula::Ndvi,
        Formula::Nbr,
        Formula::Ndwi,
        Formula::Ndmi,
        Formula::Savi,
        Formula::Evi,
    ];

    /// Stable id stored in the provenance tables
    pub fn id(self) -> &'static str {
        match self {
            Formula::Ndvi => "ndvi",
            Formula::Nbr => "nbr",
            Formula::Ndwi => "ndwi",
            Formula::Ndmi => "ndmi",
            Formula::Savi => "savi",
            Formula::Evi => "evi",
        }
    }

    /// Band labels the formula reads, in argument order
    pub fn required_bands(self) -> &'static [&'static str] {
        use bands::*;
        match self {
            Formula::Ndvi | Formula::Savi => &[NIR, RED],
            Formula::Nbr => &[NIR, SWIR2],
            Formula::Ndwi => &[GREEN, NIR],
            Formula::Ndmi => &[NIR, SWIR1],
            Formula::Evi => &[NIR, RED, BLUE],
        }
    }

    /// Validate a list of configured ids against the registry
    pub fn parse_all<S: AsRef<str>>(ids: &[S]) -> Result<Vec<Formula>> {
        let mut formulas = Vec::with_capacity(ids.len());
        for id in ids {
            let formula: Formula = id.as_ref().parse()?;
            if !formulas.contains(&formula) {
                formulas.push(formula);
            }
        }
        Ok(formulas)
    }
}

impl FromStr for Formula {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Formula::ALL
            .iter()
            .copied()
            .find(|f| f.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::UnknownFormula(s.to_string()))
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Bands of one scene keyed by label, all on one grid
#[derive(Debug, Clone, Default)]
pub struct BandSet {
    bands: BTreeMap<String, Raster<f64>>,
}

impl BandSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a band, rejecting it when its grid differs from the bands
    /// already present.
    pub fn insert(&mut self, label: impl Into<String>, raster: Raster<f64>) -> Result<()> {
        let label = label.into();
        if let Some((first_label, first)) = self.bands.iter().next() {
            first.check_same_grid(&raster, first_label, &label)?;
        }
        self.bands.insert(label, raster);
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&Raster<f64>> {
        self.bands.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.bands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    fn require(&self, formula: Formula, label: &str) -> Result<&Raster<f64>> {
        self.get(label).ok_or_else(|| Error::MissingBand {
            formula: formula.id().to_string(),
            band: label.to_string(),
        })
    }
}

/// Value range of an index raster over its valid cells
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    /// `None` when every cell is nodata
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Sentinel written to nodata cells (NaN for every formula)
    pub nodata: f64,
}

/// A computed index raster with its value range
#[derive(Debug, Clone)]
pub struct IndexOutput {
    pub formula: Formula,
    pub raster: Raster<f64>,
    pub range: ValueRange,
}

/// Compute `formula` from the bands it requires.
///
/// Pure: identical inputs give bit-identical output.
pub fn compute(formula: Formula, bands: &BandSet) -> Result<IndexOutput> {
    let required = formula.required_bands();
    let inputs = required
        .iter()
        .map(|label| bands.require(formula, label))
        .collect::<Result<Vec<_>>>()?;

    let raster = match formula {
        Formula::Ndvi => ndvi(inputs[0], inputs[1])?,
        Formula::Nbr => nbr(inputs[0], inputs[1])?,
        Formula::Ndwi => ndwi(inputs[0], inputs[1])?,
        Formula::Ndmi => ndmi(inputs[0], inputs[1])?,
        Formula::Savi => savi(inputs[0], inputs[1], &SaviParams::default())?,
        Formula::Evi => evi(inputs[0], inputs[1], inputs[2], &EviParams::default())?,
    };

    let stats = raster.statistics();
    let range = ValueRange {
        min: stats.min,
        max: stats.max,
        nodata: f64::NAN,
    };

    Ok(IndexOutput {
        formula,
        raster,
        range,
    })
}

/// Look up `id` in the registry and compute it.
pub fn compute_by_id(id: &str, bands: &BandSet) -> Result<IndexOutput> {
    compute(id.parse()?, bands)
}
