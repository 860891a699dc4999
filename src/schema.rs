//! Option tables plus the completion and validation rules for each analysis
//! class.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use clap::ValueEnum;
use directories::BaseDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::options::{OptionSet, OptionSpec, OptionValue, ValueKind};

/// Coefficient value telling the fitter to leave the background free.
pub const FREE_COEFF: f64 = -1.0;

/// Upper bound on `fovbinnumber`.
pub const MAX_FOV_BINS: i64 = 100;

const PATH_OPTIONS: &[&str] = &[
    "outdir",
    "evtfile",
    "logfile",
    "datapath",
    "modelfile",
    "diffusefile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisClass {
    Mle,
    AperturePhotometry,
}

impl AnalysisClass {
    pub fn schema(self) -> Arc<dyn ConfigSchema> {
        match self {
            AnalysisClass::Mle => Arc::new(MleSchema::new()),
            AnalysisClass::AperturePhotometry => Arc::new(AperturePhotometrySchema::new()),
        }
    }
}

impl fmt::Display for AnalysisClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisClass::Mle => write!(f, "mle"),
            AnalysisClass::AperturePhotometry => write!(f, "aperture-photometry"),
        }
    }
}

impl FromStr for AnalysisClass {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mle" => Ok(AnalysisClass::Mle),
            "ap" | "aperture-photometry" => Ok(AnalysisClass::AperturePhotometry),
            other => Err(AnalysisError::ConfigParse(format!(
                "unknown analysis class: {other}"
            ))),
        }
    }
}

/// Per-class option table, completion and cross-field validation.
pub trait ConfigSchema: Send + Sync + fmt::Debug {
    fn class(&self) -> AnalysisClass;

    fn specs(&self) -> &[OptionSpec];

    fn spec(&self, name: &str) -> Option<&OptionSpec> {
        self.specs().iter().find(|spec| spec.name == name)
    }

    /// Recomputes derived values after `touched` options changed.
    fn complete(&self, options: &mut OptionSet, touched: &[String]);

    /// Returns every violated constraint; empty means valid.
    fn validate(&self, options: &OptionSet) -> Vec<String>;
}

fn common_specs() -> Vec<OptionSpec> {
    vec![
        OptionSpec::new("input", "evtfile", ValueKind::Str, OptionValue::Null).nullable(),
        OptionSpec::new("input", "logfile", ValueKind::Str, OptionValue::Null).nullable(),
        OptionSpec::new("input", "userestapi", ValueKind::Bool, false).fixed(),
        OptionSpec::new("input", "datapath", ValueKind::Str, OptionValue::Null)
            .nullable()
            .fixed(),
        OptionSpec::new("output", "outdir", ValueKind::Str, "./agile-output"),
        OptionSpec::new("output", "filenameprefix", ValueKind::Str, "analysis_product"),
        OptionSpec::new("output", "sourcename", ValueKind::Str, OptionValue::Null).nullable(),
        OptionSpec::new("output", "username", ValueKind::Str, "user").fixed(),
        OptionSpec::new("output", "verboselvl", ValueKind::Int, 1).fixed(),
        OptionSpec::new("selection", "emin", ValueKind::Number, 100),
        OptionSpec::new("selection", "emax", ValueKind::Number, 10000),
        OptionSpec::new("selection", "glon", ValueKind::Number, 0),
        OptionSpec::new("selection", "glat", ValueKind::Number, 0),
        OptionSpec::new("selection", "tmin", ValueKind::Number, OptionValue::Null).nullable(),
        OptionSpec::new("selection", "tmax", ValueKind::Number, OptionValue::Null).nullable(),
        OptionSpec::new("selection", "timetype", ValueKind::Str, "TT"),
        OptionSpec::new("selection", "fovradmin", ValueKind::Number, 0),
        OptionSpec::new("selection", "fovradmax", ValueKind::Number, 60),
        OptionSpec::new("selection", "albedorad", ValueKind::Number, 80),
        OptionSpec::new("selection", "dq", ValueKind::Int, 0),
        OptionSpec::new("selection", "phasecode", ValueKind::Int, OptionValue::Null).nullable(),
        OptionSpec::new("selection", "filtercode", ValueKind::Int, 5),
    ]
}

fn mle_specs() -> Vec<OptionSpec> {
    let mut specs = common_specs();
    specs.extend([
        OptionSpec::new("maps", "mapsize", ValueKind::Number, 40),
        OptionSpec::new("maps", "binsize", ValueKind::Number, 0.25),
        OptionSpec::new("maps", "useEDPmatrixforEXP", ValueKind::Bool, false),
        OptionSpec::new("maps", "expstep", ValueKind::Number, OptionValue::Null).nullable(),
        OptionSpec::new("maps", "spectralindex", ValueKind::Number, 2.1),
        OptionSpec::new("maps", "timestep", ValueKind::Number, 160),
        OptionSpec::new("maps", "projtype", ValueKind::Str, "WCS"),
        OptionSpec::new("maps", "proj", ValueKind::Str, "ARC"),
        OptionSpec::new("maps", "energybins", ValueKind::Number, vec![vec![100, 10000]]).matrix(),
        OptionSpec::new("maps", "fovbinnumber", ValueKind::Int, 1),
        OptionSpec::new("maps", "offaxisangle", ValueKind::Number, 30),
        OptionSpec::new("model", "modelfile", ValueKind::Str, OptionValue::Null).nullable(),
        OptionSpec::new("model", "diffusefile", ValueKind::Str, OptionValue::Null).nullable(),
        OptionSpec::new("model", "galmode", ValueKind::Int, 1),
        OptionSpec::new("model", "isomode", ValueKind::Int, 1),
        OptionSpec::new("model", "galcoeff", ValueKind::Number, vec![FREE_COEFF]).list(),
        OptionSpec::new("model", "isocoeff", ValueKind::Number, vec![FREE_COEFF]).list(),
        OptionSpec::new("model", "galmode2", ValueKind::Int, 0),
        OptionSpec::new("model", "galmode2fit", ValueKind::Int, 0),
        OptionSpec::new("model", "isomode2", ValueKind::Int, 0),
        OptionSpec::new("model", "isomode2fit", ValueKind::Int, 0),
        OptionSpec::new("model", "emin_sources", ValueKind::Number, 100),
        OptionSpec::new("model", "emax_sources", ValueKind::Number, 10000),
        OptionSpec::new("mle", "ranal", ValueKind::Number, 10),
        OptionSpec::new("mle", "ulcl", ValueKind::Float, 2.0),
        OptionSpec::new("mle", "loccl", ValueKind::Int, 95),
        OptionSpec::new("mle", "expratioevaluation", ValueKind::Bool, true),
        OptionSpec::new("mle", "expratio_minthr", ValueKind::Number, 0),
        OptionSpec::new("mle", "expratio_maxthr", ValueKind::Number, 15),
        OptionSpec::new("mle", "expratio_size", ValueKind::Number, 10),
        OptionSpec::new("mle", "minimizertype", ValueKind::Str, "Minuit"),
        OptionSpec::new("mle", "minimizeralg", ValueKind::Str, "Migrad"),
        OptionSpec::new("mle", "minimizerdefstrategy", ValueKind::Int, 2),
        OptionSpec::new("mle", "mindefaulttolerance", ValueKind::Number, 0.01),
        OptionSpec::new("mle", "integratortype", ValueKind::Int, 1),
        OptionSpec::new("mle", "contourpoints", ValueKind::Int, 40),
        OptionSpec::new("mle", "edpcorrection", ValueKind::Float, 0.75),
        OptionSpec::new("mle", "fluxcorrection", ValueKind::Int, 0),
        OptionSpec::new("hidden", "bkgcoeffcount", ValueKind::Int, 1).hidden(),
    ]);
    specs
}

fn ap_specs() -> Vec<OptionSpec> {
    let mut specs = common_specs();
    specs.extend([
        OptionSpec::new("ap", "radius", ValueKind::Number, 2),
        OptionSpec::new("ap", "timeslot", ValueKind::Number, 3600),
    ]);
    specs
}

#[derive(Debug)]
pub struct MleSchema {
    specs: Vec<OptionSpec>,
}

impl MleSchema {
    pub fn new() -> Self {
        Self { specs: mle_specs() }
    }
}

impl Default for MleSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSchema for MleSchema {
    fn class(&self) -> AnalysisClass {
        AnalysisClass::Mle
    }

    fn specs(&self) -> &[OptionSpec] {
        &self.specs
    }

    fn complete(&self, options: &mut OptionSet, touched: &[String]) {
        expand_touched_paths(options, touched);

        let is_touched = |name: &str| touched.iter().any(|t| t == name);
        let Some(count) = bkg_coeff_count(options) else {
            return;
        };

        let grid_touched = is_touched("energybins") || is_touched("fovbinnumber");
        if grid_touched {
            options.put("bkgcoeffcount", OptionValue::Int(count as i64));
        }

        for coeff in ["galcoeff", "isocoeff"] {
            let Some(values) = options.get(coeff).and_then(OptionValue::as_f64_list) else {
                continue;
            };
            let resize = if is_touched(coeff) {
                values.len() == 1 && count != 1
            } else {
                grid_touched && values.len() != count
            };
            if resize {
                options.put(coeff, resize_coefficients(&values, count).into());
            }
        }
    }

    fn validate(&self, options: &OptionSet) -> Vec<String> {
        let mut errors = validate_common(options);

        if let Some(rows) = options.get("energybins").and_then(OptionValue::as_f64_matrix) {
            if rows.is_empty() {
                errors.push("energybins must contain at least one bin".to_string());
            }
            for row in &rows {
                match row.as_slice() {
                    [lo, hi] if lo < hi => {}
                    [lo, hi] => errors.push(format!("energy bin [{lo}, {hi}] has emin >= emax")),
                    _ => errors.push(format!(
                        "energy bin {row:?} must have exactly two values"
                    )),
                }
            }
        }

        let fovbins = options.i64("fovbinnumber").unwrap_or(0);
        if !(1..=MAX_FOV_BINS).contains(&fovbins) {
            errors.push(format!(
                "fovbinnumber must be in 1..={MAX_FOV_BINS}, got {fovbins}"
            ));
        }

        let expected = options.i64("bkgcoeffcount").unwrap_or(0);
        for coeff in ["galcoeff", "isocoeff"] {
            let values = options
                .get(coeff)
                .and_then(OptionValue::as_f64_list)
                .unwrap_or_default();
            if values.len() as i64 != expected {
                errors.push(format!(
                    "{coeff} has {} values, expected {expected} (energybins x fovbinnumber)",
                    values.len()
                ));
            }
            if values.iter().any(|v| *v != FREE_COEFF && *v < 0.0) {
                errors.push(format!("{coeff} values must be -1 (free) or >= 0"));
            }
        }

        if let Some(proj) = options.str("proj") {
            if !matches!(proj, "ARC" | "AIT") {
                errors.push(format!("proj must be ARC or AIT, got {proj}"));
            }
        }
        if let Some(loccl) = options.i64("loccl") {
            if ![0, 68, 95, 99].contains(&loccl) {
                errors.push(format!("loccl must be one of 0, 68, 95, 99, got {loccl}"));
            }
        }
        if options.f64("ulcl").is_some_and(|v| v <= 0.0) {
            errors.push("ulcl must be > 0".to_string());
        }
        for mode in ["galmode", "isomode"] {
            if let Some(value) = options.i64(mode) {
                if !(0..=3).contains(&value) {
                    errors.push(format!("{mode} must be in 0..=3, got {value}"));
                }
            }
        }
        for positive in ["binsize", "mapsize"] {
            if options.f64(positive).is_some_and(|v| v <= 0.0) {
                errors.push(format!("{positive} must be > 0"));
            }
        }
        errors
    }
}

#[derive(Debug)]
pub struct AperturePhotometrySchema {
    specs: Vec<OptionSpec>,
}

impl AperturePhotometrySchema {
    pub fn new() -> Self {
        Self { specs: ap_specs() }
    }
}

impl Default for AperturePhotometrySchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSchema for AperturePhotometrySchema {
    fn class(&self) -> AnalysisClass {
        AnalysisClass::AperturePhotometry
    }

    fn specs(&self) -> &[OptionSpec] {
        &self.specs
    }

    fn complete(&self, options: &mut OptionSet, touched: &[String]) {
        expand_touched_paths(options, touched);
    }

    fn validate(&self, options: &OptionSet) -> Vec<String> {
        let mut errors = validate_common(options);
        for positive in ["radius", "timeslot"] {
            if options.f64(positive).is_some_and(|v| v <= 0.0) {
                errors.push(format!("{positive} must be > 0"));
            }
        }
        errors
    }
}

fn validate_common(options: &OptionSet) -> Vec<String> {
    let mut errors = Vec::new();

    if let (Some(emin), Some(emax)) = (options.f64("emin"), options.f64("emax")) {
        if emin >= emax {
            errors.push(format!("emin ({emin}) must be lower than emax ({emax})"));
        }
    }
    if let (Some(tmin), Some(tmax)) = (options.f64("tmin"), options.f64("tmax")) {
        if tmin >= tmax {
            errors.push(format!("tmin ({tmin}) must be lower than tmax ({tmax})"));
        }
    }
    if let Some(timetype) = options.str("timetype") {
        if !matches!(timetype, "TT" | "MJD") {
            errors.push(format!("timetype must be TT or MJD, got {timetype}"));
        }
    }
    if let (Some(min), Some(max)) = (options.f64("fovradmin"), options.f64("fovradmax")) {
        if min < 0.0 || min >= max {
            errors.push(format!(
                "fovradmin ({min}) must be >= 0 and lower than fovradmax ({max})"
            ));
        }
    }
    if let Some(glat) = options.f64("glat") {
        if !(-90.0..=90.0).contains(&glat) {
            errors.push(format!("glat must be in [-90, 90], got {glat}"));
        }
    }
    if let Some(glon) = options.f64("glon") {
        if !(0.0..360.0).contains(&glon) {
            errors.push(format!("glon must be in [0, 360), got {glon}"));
        }
    }
    errors
}

fn bkg_coeff_count(options: &OptionSet) -> Option<usize> {
    let bins = options.get("energybins")?.as_list()?.len();
    let fov = options.i64("fovbinnumber")?;
    if !(1..=MAX_FOV_BINS).contains(&fov) {
        return None;
    }
    bins.checked_mul(usize::try_from(fov).ok()?)
}

fn resize_coefficients(values: &[f64], count: usize) -> Vec<f64> {
    if values.len() == 1 {
        return vec![values[0]; count];
    }
    let mut resized = values.to_vec();
    resized.resize(count, FREE_COEFF);
    resized
}

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("env var pattern is valid")
});

fn expand_touched_paths(options: &mut OptionSet, touched: &[String]) {
    for name in PATH_OPTIONS {
        if !touched.iter().any(|t| t == name) {
            continue;
        }
        if let Some(raw) = options.str(name).map(str::to_string) {
            let expanded = expand_path(&raw);
            if expanded != raw {
                options.put(name, OptionValue::Str(expanded));
            }
        }
    }
}

/// Expands a leading `~` and `$VAR` / `${VAR}` references. Unset variables
/// are left as written.
pub fn expand_path(raw: &str) -> String {
    let with_home = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => BaseDirs::new()
            .map(|dirs| format!("{}{rest}", dirs.home_dir().display()))
            .unwrap_or_else(|| raw.to_string()),
        _ => raw.to_string(),
    };
    ENV_VAR
        .replace_all(&with_home, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
