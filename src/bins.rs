//! Bin grids: supported energy ranges, field-of-view rings and time slices.

use serde::Serialize;
use tracing::warn;

use crate::error::AnalysisError;

/// Energy ranges (MeV) with calibrated instrument responses.
pub const SUPPORTED_ENERGY_BINS: [(u32, u32); 13] = [
    (30, 50),
    (50, 100),
    (100, 300),
    (100, 1000),
    (100, 10000),
    (100, 50000),
    (300, 1000),
    (400, 1000),
    (1000, 3000),
    (1000, 10000),
    (1000, 50000),
    (3000, 10000),
    (10000, 50000),
];

pub fn is_supported_energy_bin(emin: f64, emax: f64) -> bool {
    SUPPORTED_ENERGY_BINS
        .iter()
        .any(|&(lo, hi)| f64::from(lo) == emin && f64::from(hi) == emax)
}

/// One configured energy bin with its position in `energybins`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyBin {
    pub index: usize,
    pub emin: f64,
    pub emax: f64,
}

/// Configured energy bins that have a calibration; the others are logged and
/// dropped. Indices keep counting the dropped entries.
pub fn supported_energy_bins(configured: &[Vec<f64>]) -> Vec<EnergyBin> {
    configured
        .iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let (emin, emax) = match row.as_slice() {
                [emin, emax] => (*emin, *emax),
                _ => return None,
            };
            if is_supported_energy_bin(emin, emax) {
                Some(EnergyBin { index, emin, emax })
            } else {
                warn!(emin, emax, "energy bin has no calibration, skipping");
                None
            }
        })
        .collect()
}

/// A ring of the field of view, in degrees off-axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FovBin {
    pub index: usize,
    pub inner: f64,
    pub outer: f64,
    pub center: f64,
}

/// Splits `[min, max]` into `count` rings of equal width. The last ring
/// ends exactly at `max`.
pub fn fov_bins(min: f64, max: f64, count: usize) -> Vec<FovBin> {
    if count == 0 {
        return Vec::new();
    }
    let width = (max - min) / count as f64;
    (0..count)
        .map(|index| {
            let outer = if index + 1 == count {
                max
            } else {
                min + width * (index + 1) as f64
            };
            let inner = if index == 0 {
                min
            } else {
                min + width * index as f64
            };
            FovBin {
                index,
                inner,
                outer,
                center: outer - width / 2.0,
            }
        })
        .collect()
}

/// Position of the (fov, energy) cell in the background coefficient lists.
pub fn bkg_coeff_index(fov_index: usize, energy_index: usize, energy_count: usize) -> usize {
    fov_index * energy_count + energy_index
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeBin {
    pub tmin: f64,
    pub tmax: f64,
}

/// `[t, t + size)` slices from `tmin`, cut at `min(tmax, data_end)`. A slice
/// shortened by the cut is logged. Non-finite bounds and a size that is not
/// a positive finite number are rejected.
pub fn time_bins(
    tmin: f64,
    tmax: f64,
    size: f64,
    data_end: Option<f64>,
) -> Result<Vec<TimeBin>, AnalysisError> {
    if !tmin.is_finite() || !tmax.is_finite() {
        return Err(AnalysisError::UnsupportedTimeWindow(format!(
            "time bounds must be finite, got {tmin}..{tmax}"
        )));
    }
    if !size.is_finite() || size <= 0.0 {
        return Err(AnalysisError::UnsupportedTimeWindow(format!(
            "bin size must be a positive number of seconds, got {size}"
        )));
    }
    let end = match data_end {
        Some(data_end) if data_end.is_finite() => tmax.min(data_end),
        _ => tmax,
    };
    if end <= tmin {
        return Ok(Vec::new());
    }
    if end < tmax {
        warn!(tmax, data_end = end, "requested interval extends past available data");
    }

    let mut bins = Vec::new();
    let mut index = 0usize;
    loop {
        let start = tmin + size * index as f64;
        if start >= end {
            break;
        }
        let stop = start + size;
        if stop > end {
            warn!(tmin = start, tmax = stop, clipped = end, "time bin clipped");
            bins.push(TimeBin { tmin: start, tmax: end });
            break;
        }
        bins.push(TimeBin { tmin: start, tmax: stop });
        index += 1;
    }
    Ok(bins)
}
