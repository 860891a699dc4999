//! Adapters for the AGILE science tools.

use crate::config::ConfigStore;
use crate::error::AnalysisError;
use crate::options::OptionValue;
use crate::tool::{Product, ScienceTool, ToolCommand, ToolParams};

pub const COUNTS_PRODUCT: &str = "cts";
pub const EXPOSURE_PRODUCT: &str = "exp";
pub const GAS_PRODUCT: &str = "gas";
pub const INTENSITY_PRODUCT: &str = "int";
pub const MAPLIST_INPUT: &str = "maplist";
pub const SOURCELIST_INPUT: &str = "sourcelist";
pub const LOG_PRODUCT: &str = "log";
pub const AP_PRODUCT: &str = "ap";

pub const FIT_RESULT_EXTENSION: &str = "source";

/// Tool argument rendering: booleans as 0/1.
fn render(value: &OptionValue) -> String {
    match value {
        OptionValue::Bool(flag) => u8::from(*flag).to_string(),
        other => other.to_string(),
    }
}

trait CommandExt: Sized {
    fn option(self, config: &ConfigStore, arg: &str, option: &str) -> Result<Self, AnalysisError>;
    fn option_if_set(self, config: &ConfigStore, arg: &str, option: &str) -> Self;
}

impl CommandExt for ToolCommand {
    fn option(self, config: &ConfigStore, arg: &str, option: &str) -> Result<Self, AnalysisError> {
        Ok(self.arg(arg, render(config.get(option)?)))
    }

    fn option_if_set(self, config: &ConfigStore, arg: &str, option: &str) -> Self {
        match config.get(option) {
            Ok(value) if !value.is_null() => self.arg(arg, render(value)),
            _ => self,
        }
    }
}

/// Time, energy, off-axis and quality cuts shared by the event tools.
fn with_selection(
    cmd: ToolCommand,
    config: &ConfigStore,
    params: &ToolParams,
) -> Result<ToolCommand, AnalysisError> {
    let (emin, emax) = match params.energy {
        Some(range) => range,
        None => (config.get_f64("emin")?, config.get_f64("emax")?),
    };
    let (fovmin, fovmax) = match params.fov {
        Some(bin) => (bin.inner, bin.outer),
        None => (config.get_f64("fovradmin")?, config.get_f64("fovradmax")?),
    };
    Ok(cmd
        .option(config, "tmin", "tmin")?
        .option(config, "tmax", "tmax")?
        .arg("emin", emin)
        .arg("emax", emax)
        .arg("fovradmin", fovmin)
        .arg("fovradmax", fovmax)
        .option(config, "la", "glon")?
        .option(config, "ba", "glat")?
        .option(config, "albrad", "albedorad")?
        .option(config, "dq", "dq")?
        .option(config, "filtercode", "filtercode")?
        .option_if_set(config, "phasecode", "phasecode"))
}

fn with_geometry(cmd: ToolCommand, config: &ConfigStore) -> Result<ToolCommand, AnalysisError> {
    cmd.option(config, "mres", "binsize")?
        .option(config, "mdim", "mapsize")?
        .option(config, "proj", "proj")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CtsMapGen;

impl ScienceTool for CtsMapGen {
    fn name(&self) -> &'static str {
        "AG_ctsmapgen"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &["evtfile", "tmin", "tmax"]
    }

    fn build(&self, config: &ConfigStore, params: &ToolParams) -> Result<ToolCommand, AnalysisError> {
        let outfile = params.output(".cts.gz");
        let cmd = ToolCommand::new(self.name())
            .cwd(&params.workdir)
            .arg("outfile", &outfile)
            .option(config, "evtfile", "evtfile")?;
        let cmd = with_geometry(cmd, config)?;
        Ok(with_selection(cmd, config, params)?
            .product(Product::required(COUNTS_PRODUCT, outfile)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpMapGen;

impl ScienceTool for ExpMapGen {
    fn name(&self) -> &'static str {
        "AG_expmapgen"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &["logfile", "tmin", "tmax"]
    }

    fn build(&self, config: &ConfigStore, params: &ToolParams) -> Result<ToolCommand, AnalysisError> {
        let outfile = params.output(".exp.gz");
        let cmd = ToolCommand::new(self.name())
            .cwd(&params.workdir)
            .arg("outfile", &outfile)
            .option(config, "logfile", "logfile")?
            .option(config, "timestep", "timestep")?
            .option(config, "index", "spectralindex")?
            .option(config, "useEDPmatrixforEXP", "useEDPmatrixforEXP")?
            .option(config, "offaxisangle", "offaxisangle")?
            .option(config, "projtype", "projtype")?
            .option_if_set(config, "expstep", "expstep");
        let cmd = with_geometry(cmd, config)?;
        Ok(with_selection(cmd, config, params)?
            .product(Product::required(EXPOSURE_PRODUCT, outfile)))
    }
}

/// `AG_gasmapgen`: diffuse-emission template for an exposure map. Without
/// `diffusefile` the tool falls back to its bundled Galactic model.
#[derive(Debug, Clone, Copy, Default)]
pub struct GasMapGen;

impl ScienceTool for GasMapGen {
    fn name(&self) -> &'static str {
        "AG_gasmapgen"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &[]
    }

    fn build(&self, config: &ConfigStore, params: &ToolParams) -> Result<ToolCommand, AnalysisError> {
        let expfile = params.input(self.name(), EXPOSURE_PRODUCT)?;
        let outfile = params.output(".gas.gz");
        Ok(ToolCommand::new(self.name())
            .cwd(&params.workdir)
            .arg("expfile", expfile)
            .arg("outfile", &outfile)
            .option_if_set(config, "diffusefile", "diffusefile")
            .product(Product::required(GAS_PRODUCT, outfile)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntMapGen;

impl ScienceTool for IntMapGen {
    fn name(&self) -> &'static str {
        "AG_intmapgen"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &[]
    }

    fn build(&self, _config: &ConfigStore, params: &ToolParams) -> Result<ToolCommand, AnalysisError> {
        let ctsfile = params.input(self.name(), COUNTS_PRODUCT)?;
        let expfile = params.input(self.name(), EXPOSURE_PRODUCT)?;
        let outfile = params.output(".int.gz");
        Ok(ToolCommand::new(self.name())
            .cwd(&params.workdir)
            .arg("outfile", &outfile)
            .arg("expfile", expfile)
            .arg("ctsfile", ctsfile)
            .product(Product::required(INTENSITY_PRODUCT, outfile)))
    }
}

/// `AG_multi`: joint likelihood fit of every listed source. Writes one
/// `<prefix>_<name>.source` result per source.
#[derive(Debug, Clone, Default)]
pub struct MultiFit {
    pub sources: Vec<String>,
}

impl MultiFit {
    pub fn new(sources: Vec<String>) -> Self {
        Self { sources }
    }
}

impl ScienceTool for MultiFit {
    fn name(&self) -> &'static str {
        "AG_multi"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &["filenameprefix"]
    }

    fn build(&self, config: &ConfigStore, params: &ToolParams) -> Result<ToolCommand, AnalysisError> {
        let maplist = params.input(self.name(), MAPLIST_INPUT)?;
        let sourcelist = params.input(self.name(), SOURCELIST_INPUT)?;
        let mut cmd = ToolCommand::new(self.name())
            .cwd(&params.workdir)
            .arg("maplist", maplist)
            .arg("sourcelist", sourcelist)
            .arg("outfile", params.output(""));
        for (arg, option) in [
            ("ranal", "ranal"),
            ("galmode", "galmode"),
            ("isomode", "isomode"),
            ("galmode2", "galmode2"),
            ("galmode2fit", "galmode2fit"),
            ("isomode2", "isomode2"),
            ("isomode2fit", "isomode2fit"),
            ("ulcl", "ulcl"),
            ("loccl", "loccl"),
            ("emin_sources", "emin_sources"),
            ("emax_sources", "emax_sources"),
            ("expratioevaluation", "expratioevaluation"),
            ("expratio_minthr", "expratio_minthr"),
            ("expratio_maxthr", "expratio_maxthr"),
            ("expratio_size", "expratio_size"),
            ("minimizertype", "minimizertype"),
            ("minimizeralg", "minimizeralg"),
            ("minimizerdefstrategy", "minimizerdefstrategy"),
            ("mindefaulttolerance", "mindefaulttolerance"),
            ("integratortype", "integratortype"),
            ("contourpoints", "contourpoints"),
            ("edpcorrection", "edpcorrection"),
            ("fluxcorrection", "fluxcorrection"),
        ] {
            cmd = cmd.option(config, arg, option)?;
        }
        for name in &self.sources {
            let path = params.output(&format!("_{name}.{FIT_RESULT_EXTENSION}"));
            cmd = cmd.product(Product::required(name.clone(), path));
        }
        Ok(cmd.product(Product::optional(LOG_PRODUCT, params.output(".log"))))
    }
}

/// `AG_ap`: aperture photometry light curve around the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApTool;

impl ScienceTool for ApTool {
    fn name(&self) -> &'static str {
        "AG_ap"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &["evtfile", "logfile", "tmin", "tmax"]
    }

    fn build(&self, config: &ConfigStore, params: &ToolParams) -> Result<ToolCommand, AnalysisError> {
        let outfile = params.output(".ap");
        let cmd = ToolCommand::new(self.name())
            .cwd(&params.workdir)
            .arg("outfile", &outfile)
            .option(config, "evtfile", "evtfile")?
            .option(config, "logfile", "logfile")?
            .option(config, "radius", "radius")?
            .option(config, "timeslot", "timeslot")?;
        Ok(with_selection(cmd, config, params)?.product(Product::required(AP_PRODUCT, outfile)))
    }
}

#[cfg(test)]
mod tests {
    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::bins::FovBin;
    use crate::schema::AnalysisClass;
    use crate::tool::{ProductKind, configure};

    fn config() -> ConfigStore {
        let mut config = ConfigStore::with_defaults(AnalysisClass::Mle).unwrap();
        config
            .set([
                ("evtfile", OptionValue::from("/data/EVT.index")),
                ("logfile", OptionValue::from("/data/LOG.index")),
                ("tmin", OptionValue::from(433857532.0)),
                ("tmax", OptionValue::from(434289532.0)),
            ])
            .unwrap();
        config
    }

    #[test]
    fn counts_map_uses_bin_values_over_config() {
        let mut params = ToolParams::new(Utf8Path::new("/work/maps/1"), "run_k0");
        params.energy = Some((100.0, 300.0));
        params.fov = Some(FovBin {
            index: 0,
            inner: 0.0,
            outer: 30.0,
            center: 15.0,
        });
        let tool = configure(&CtsMapGen, &config(), &params).unwrap();
        let args = &tool.command().args;
        assert!(args.contains(&"emax=300".to_string()));
        assert!(args.contains(&"fovradmax=30".to_string()));
        assert!(args.contains(&"evtfile=/data/EVT.index".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("phasecode=")));
        assert_eq!(
            tool.product(COUNTS_PRODUCT),
            Some(Utf8Path::new("/work/maps/1/run_k0.cts.gz"))
        );
    }

    #[test]
    fn gas_map_needs_the_exposure_map() {
        let params = ToolParams::new(Utf8Path::new("/work"), "p");
        let err = configure(&GasMapGen, &config(), &params).unwrap_err();
        assert!(matches!(err, AnalysisError::ScienceToolInputArgMissing { .. }));
    }

    #[test]
    fn gas_map_takes_the_diffuse_model_not_the_source_model() {
        let mut params = ToolParams::new(Utf8Path::new("/work"), "p");
        params
            .inputs
            .insert(EXPOSURE_PRODUCT.to_string(), Utf8PathBuf::from("/work/p.exp.gz"));
        let mut config = config();
        config.set_option("modelfile", "/models/sources.txt").unwrap();
        let tool = configure(&GasMapGen, &config, &params).unwrap();
        assert!(!tool.command().args.iter().any(|a| a.starts_with("diffusefile=")));

        config.set_option("diffusefile", "/models/gal_bkg.fits").unwrap();
        let tool = configure(&GasMapGen, &config, &params).unwrap();
        assert!(tool
            .command()
            .args
            .contains(&"diffusefile=/models/gal_bkg.fits".to_string()));
    }

    #[test]
    fn multi_fit_declares_one_result_per_source() {
        let mut params = ToolParams::new(Utf8Path::new("/work/mle/1"), "run");
        params
            .inputs
            .insert(MAPLIST_INPUT.to_string(), Utf8PathBuf::from("/work/maps/1/run.maplist4"));
        params
            .inputs
            .insert(SOURCELIST_INPUT.to_string(), Utf8PathBuf::from("/work/mle/1/run_sources.txt"));
        let tool = MultiFit::new(vec!["A".to_string(), "B".to_string()]);
        let configured = configure(&tool, &config(), &params).unwrap();
        let products = &configured.command().products;
        assert_eq!(products.len(), 3);
        assert_eq!(products[1].path, Utf8PathBuf::from("/work/mle/1/run_B.source"));
        assert_eq!(products[2].kind, ProductKind::Optional);
        assert!(configured
            .command()
            .args
            .contains(&"expratioevaluation=1".to_string()));
    }
}
