use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub glon: f64,
    pub glat: f64,
}

impl SkyPosition {
    pub fn new(glon: f64, glat: f64) -> Self {
        Self { glon, glat }
    }

    /// Great-circle distance in degrees (haversine).
    pub fn angular_distance(&self, other: &SkyPosition) -> f64 {
        let lon1 = self.glon.to_radians();
        let lat1 = self.glat.to_radians();
        let lon2 = other.glon.to_radians();
        let lat2 = other.glat.to_radians();

        let d_lon = lon2 - lon1;
        let d_lat = lat2 - lat1;
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectrumType {
    PowerLaw,
    PLExpCutoff,
    PLSuperExpCutoff,
    LogParabola,
}

impl SpectrumType {
    pub fn code(self) -> u8 {
        match self {
            SpectrumType::PowerLaw => 0,
            SpectrumType::PLExpCutoff => 1,
            SpectrumType::PLSuperExpCutoff => 2,
            SpectrumType::LogParabola => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SpectrumType::PowerLaw),
            1 => Some(SpectrumType::PLExpCutoff),
            2 => Some(SpectrumType::PLSuperExpCutoff),
            3 => Some(SpectrumType::LogParabola),
            _ => None,
        }
    }

    /// Parameter names in legacy column order: flux, index, par2, par3.
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            SpectrumType::PowerLaw => &["flux", "index"],
            SpectrumType::PLExpCutoff => &["flux", "index", "cutoffEnergy"],
            SpectrumType::PLSuperExpCutoff => &["flux", "index1", "cutoffEnergy", "index2"],
            SpectrumType::LogParabola => &["flux", "index", "pivotEnergy", "curvature"],
        }
    }

    pub fn index_name(self) -> &'static str {
        match self {
            SpectrumType::PLSuperExpCutoff => "index1",
            _ => "index",
        }
    }

    pub fn par2_name(self) -> Option<&'static str> {
        self.parameter_names().get(2).copied()
    }

    pub fn par3_name(self) -> Option<&'static str> {
        self.parameter_names().get(3).copied()
    }
}

impl fmt::Display for SpectrumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectrumType::PowerLaw => write!(f, "PowerLaw"),
            SpectrumType::PLExpCutoff => write!(f, "PLExpCutoff"),
            SpectrumType::PLSuperExpCutoff => write!(f, "PLSuperExpCutoff"),
            SpectrumType::LogParabola => write!(f, "LogParabola"),
        }
    }
}

impl FromStr for SpectrumType {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return SpectrumType::from_code(code).ok_or_else(|| {
                AnalysisError::SourceParamNotFound(format!("unknown spectrum type code {code}"))
            });
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "powerlaw" => Ok(SpectrumType::PowerLaw),
            "plexpcutoff" => Ok(SpectrumType::PLExpCutoff),
            "plsuperexpcutoff" => Ok(SpectrumType::PLSuperExpCutoff),
            "logparabola" => Ok(SpectrumType::LogParabola),
            _ => Err(AnalysisError::SourceParamNotFound(format!(
                "unknown spectrum type {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub free: bool,
    pub scale: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Parameter {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            free: false,
            scale: 1.0,
            min: None,
            max: None,
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// `value * scale`
    pub fn physical(&self) -> f64 {
        self.value * self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub kind: SpectrumType,
    pub parameters: Vec<Parameter>,
}

impl Spectrum {
    /// Every parameter of `kind` at zero and fixed.
    pub fn new(kind: SpectrumType) -> Self {
        Self {
            kind,
            parameters: kind
                .parameter_names()
                .iter()
                .map(|name| Parameter::new(name, 0.0))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters.iter_mut().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> f64 {
        self.get(name).map(Parameter::physical).unwrap_or(0.0)
    }

    pub fn is_free(&self, name: &str) -> bool {
        self.get(name).is_some_and(|p| p.free)
    }

    pub fn set_value(&mut self, name: &str, value: f64) {
        if let Some(param) = self.get_mut(name) {
            param.value = value;
            param.scale = 1.0;
        }
    }

    pub fn flux(&self) -> f64 {
        self.value("flux")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialModel {
    pub position: SkyPosition,
    pub free: bool,
    pub location_limit: f64,
    /// Degrees from the catalog reference point; refreshed by the catalog.
    pub dist: f64,
}

/// Fit results for one source, as reported by `AG_multi`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiOutput {
    pub name: String,
    pub sqrtts: f64,
    pub flux: f64,
    pub flux_err: f64,
    pub flux_ul: f64,
    /// Fitted position; `l` is -1 when the position was not fitted.
    pub l: f64,
    pub b: f64,
    pub l_peak: f64,
    pub b_peak: f64,
    pub index: f64,
    pub index_err: f64,
    pub galcoeff: Vec<f64>,
    pub isocoeff: Vec<f64>,
    pub exposure: f64,
    pub counts: f64,
    pub tstart_tt: f64,
    pub tstop_tt: f64,
    pub emin: f64,
    pub emax: f64,
    pub dist: f64,
}

impl MultiOutput {
    /// Galactic longitude is never negative, so `l < 0` marks "not fitted".
    pub fn has_fitted_position(&self) -> bool {
        self.l >= 0.0
    }

    pub fn fitted_position(&self) -> Option<SkyPosition> {
        self.has_fitted_position()
            .then(|| SkyPosition::new(self.l, self.b))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub source_type: String,
    pub spatial: SpatialModel,
    pub spectrum: Spectrum,
    pub multi: Option<MultiOutput>,
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Source {}

impl Source {
    pub fn point(name: &str, position: SkyPosition, spectrum: Spectrum) -> Self {
        Self {
            name: name.to_string(),
            source_type: "PointSource".to_string(),
            spatial: SpatialModel {
                position,
                free: false,
                location_limit: 0.0,
                dist: 0.0,
            },
            spectrum,
            multi: None,
        }
    }

    pub fn is_fit_complete(&self) -> bool {
        self.multi.is_some()
    }

    /// Fitted position when available, otherwise the model position.
    pub fn effective_position(&self) -> SkyPosition {
        self.multi
            .as_ref()
            .and_then(MultiOutput::fitted_position)
            .unwrap_or(self.spatial.position)
    }

    pub fn refresh_distance(&mut self, reference: &SkyPosition) {
        self.spatial.dist = self.spatial.position.angular_distance(reference);
        let fitted = self.effective_position();
        if let Some(multi) = self.multi.as_mut() {
            multi.dist = fitted.angular_distance(reference);
        }
    }

    /// Flux used by selections: fit result when present.
    pub fn selection_flux(&self) -> f64 {
        self.multi
            .as_ref()
            .map(|multi| multi.flux)
            .unwrap_or_else(|| self.spectrum.flux())
    }

    pub fn selection_dist(&self) -> f64 {
        self.multi
            .as_ref()
            .map(|multi| multi.dist)
            .unwrap_or(self.spatial.dist)
    }

    pub fn has_parameter(&self, param: &str) -> bool {
        param == "pos" || self.spectrum.get(param).is_some()
    }

    pub fn is_free(&self, param: &str) -> bool {
        if param == "pos" {
            self.spatial.free
        } else {
            self.spectrum.is_free(param)
        }
    }

    /// Returns true when the flag changed.
    pub fn set_free(&mut self, param: &str, free: bool) -> bool {
        if param == "pos" {
            let changed = self.spatial.free != free;
            self.spatial.free = free;
            return changed;
        }
        match self.spectrum.get_mut(param) {
            Some(parameter) if parameter.free != free => {
                parameter.free = free;
                true
            }
            _ => false,
        }
    }

    /// Names of every parameter currently free, position as `pos`.
    pub fn free_parameters(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .spectrum
            .parameters
            .iter()
            .filter(|p| p.free)
            .map(|p| p.name.clone())
            .collect();
        if self.spatial.free {
            names.push("pos".to_string());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angular_distance_matches_known_separations() {
        let origin = SkyPosition::new(0.0, 0.0);
        assert!((origin.angular_distance(&SkyPosition::new(10.0, 0.0)) - 10.0).abs() < 1e-9);
        assert!((origin.angular_distance(&SkyPosition::new(0.0, 90.0)) - 90.0).abs() < 1e-9);
        let wrap = SkyPosition::new(359.0, 0.0).angular_distance(&SkyPosition::new(1.0, 0.0));
        assert!((wrap - 2.0).abs() < 1e-9);
    }

    #[test]
    fn spectrum_parameter_sets() {
        let spectrum = Spectrum::new(SpectrumType::PLSuperExpCutoff);
        let names: Vec<_> = spectrum.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["flux", "index1", "cutoffEnergy", "index2"]);
        assert_eq!(SpectrumType::LogParabola.par3_name(), Some("curvature"));
        assert_eq!(SpectrumType::PowerLaw.par2_name(), None);
    }

    #[test]
    fn set_free_reports_changes_only() {
        let mut source = Source::point(
            "A",
            SkyPosition::new(1.0, 1.0),
            Spectrum::new(SpectrumType::PowerLaw),
        );
        assert!(source.set_free("flux", true));
        assert!(!source.set_free("flux", true));
        assert!(!source.set_free("curvature", true));
        assert_eq!(source.free_parameters(), vec!["flux".to_string()]);
    }
}
