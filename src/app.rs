use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::{
    AP_PRODUCT, ApTool, COUNTS_PRODUCT, CtsMapGen, EXPOSURE_PRODUCT, ExpMapGen,
    FIT_RESULT_EXTENSION, GAS_PRODUCT, GasMapGen, INTENSITY_PRODUCT, IntMapGen, MAPLIST_INPUT,
    MultiFit, SOURCELIST_INPUT,
};
use crate::bins::{self, TimeBin};
use crate::catalog::SourceCatalog;
use crate::config::ConfigStore;
use crate::error::AnalysisError;
use crate::evt_index::DataIndex;
use crate::formats::fit_result;
use crate::lightcurve::{LcRow, write_light_curve};
use crate::manifest::{MANIFEST_EXTENSION, ManifestRow, ProductManifest};
use crate::notify::OutputPathTracker;
use crate::options::OptionValue;
use crate::schema::FREE_COEFF;
use crate::selection::{Predicate, Selection};
use crate::source::{MultiOutput, SkyPosition, Source};
use crate::store::Store;
use crate::timeconv::{SECONDS_PER_DAY, TimeType};
use crate::tool::{ConfiguredTool, ScienceTool, ToolParams, ToolRunner, configure};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Makes observation data for a TT interval available locally.
pub trait DataDownloader {
    fn ensure_data(&self, tmin: f64, tmax: f64) -> Result<(), AnalysisError>;
}

/// Downloader for installations without archive access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineDownloader;

impl DataDownloader for OfflineDownloader {
    fn ensure_data(&self, tmin: f64, tmax: f64) -> Result<(), AnalysisError> {
        Err(AnalysisError::RemoteDataUnavailable(format!(
            "no archive access configured for TT {tmin}..{tmax}; set userestapi to false and point evtfile/logfile at local indexes"
        )))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BkgResult {
    pub galcoeff: Vec<f64>,
    pub isocoeff: Vec<f64>,
    pub manifest: Utf8PathBuf,
}

fn phase(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

fn done(sink: &dyn ProgressSink, message: String, started: Instant) {
    sink.event(ProgressEvent {
        message,
        elapsed: Some(started.elapsed()),
    });
}

/// One analysis session: the live configuration, the source catalog and
/// the collaborators that run tools and fetch data.
pub struct Analysis<R: ToolRunner, D: DataDownloader> {
    config: ConfigStore,
    catalog: SourceCatalog,
    runner: R,
    downloader: D,
    paths: Arc<OutputPathTracker>,
    last_manifest: Option<Utf8PathBuf>,
}

impl<R: ToolRunner, D: DataDownloader> Analysis<R, D> {
    pub fn new(mut config: ConfigStore, runner: R, downloader: D) -> Result<Self, AnalysisError> {
        let catalog = SourceCatalog::from_config(&config)?;
        let paths = Arc::new(OutputPathTracker::new(
            config.get_str("outdir")?,
            config.get_str("filenameprefix")?,
        ));
        for option in OutputPathTracker::OPTIONS {
            config.subscribe(option, paths.clone())?;
        }
        paths.ensure_outdir();
        Ok(Self {
            config,
            catalog,
            runner,
            downloader,
            paths,
            last_manifest: None,
        })
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut SourceCatalog {
        &mut self.catalog
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    /// Current output root, following `outdir` updates.
    pub fn output_root(&self) -> Utf8PathBuf {
        self.paths.outdir()
    }

    pub fn last_manifest(&self) -> Option<&Utf8Path> {
        self.last_manifest.as_deref()
    }

    /// Loads sources within `range` degrees of the configured center.
    pub fn load_sources(
        &mut self,
        path: &Utf8Path,
        range: (f64, f64),
    ) -> Result<Vec<Source>, AnalysisError> {
        self.catalog.load(path, &self.config, range)
    }

    /// Generates counts, exposure, gas and intensity maps for every FOV ring
    /// and supported energy bin, and returns the map list.
    pub fn generate_maps(
        &mut self,
        config: Option<ConfigStore>,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, AnalysisError> {
        let mut config = config.unwrap_or_else(|| self.config.snapshot());
        let manifest = self.maps(&mut config, sink)?;
        self.last_manifest = Some(manifest.clone());
        Ok(manifest)
    }

    fn maps(
        &self,
        config: &mut ConfigStore,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, AnalysisError> {
        let started = Instant::now();
        convert_to_tt(config)?;
        if config.get_bool("userestapi")? {
            let (tmin, tmax) = required_window(config, "generate_maps")?;
            phase(sink, format!("phase=Download; ensuring data for TT {tmin}..{tmax}"));
            self.downloader.ensure_data(tmin, tmax)?;
        }

        let outdir = Utf8PathBuf::from(config.get_str("outdir")?);
        let dir = Store::allocate_numbered_dir(&Store::new(outdir).maps_root())?;
        let prefix = config.get_str("filenameprefix")?.to_string();

        let configured_bins = config.get_f64_matrix("energybins")?;
        let energy_bins = bins::supported_energy_bins(&configured_bins);
        let fov_count = usize::try_from(config.get_i64("fovbinnumber")?).unwrap_or(1);
        let fov_bins = bins::fov_bins(
            config.get_f64("fovradmin")?,
            config.get_f64("fovradmax")?,
            fov_count,
        );
        let galcoeff = config.get_f64_list("galcoeff")?;
        let isocoeff = config.get_f64_list("isocoeff")?;
        let label = [
            config.get("tmin")?.to_string(),
            config.get("tmax")?.to_string(),
        ];
        let (glon, glat) = (config.get_f64("glon")?, config.get_f64("glat")?);

        let mut manifest =
            ProductManifest::new(dir.join(format!("{prefix}.{MANIFEST_EXTENSION}")));
        for fov in &fov_bins {
            for energy in &energy_bins {
                let bin_prefix = format!(
                    "{prefix}_{}_{}_{}_{}_{glon}_{glat}_{}",
                    label[0], label[1], energy.emin, energy.emax, fov.index
                );
                phase(
                    sink,
                    format!(
                        "phase=Maps; fov {} energy {}-{} MeV",
                        fov.index, energy.emin, energy.emax
                    ),
                );
                let mut params = ToolParams::new(&dir, bin_prefix);
                params.energy = Some((energy.emin, energy.emax));
                params.fov = Some(*fov);

                let counts = self.run(&CtsMapGen, config, &params, COUNTS_PRODUCT)?;
                let exposure = self.run(&ExpMapGen, config, &params, EXPOSURE_PRODUCT)?;
                params
                    .inputs
                    .insert(EXPOSURE_PRODUCT.to_string(), exposure.clone());
                let gas = self.run(&GasMapGen, config, &params, GAS_PRODUCT)?;
                params.inputs.insert(COUNTS_PRODUCT.to_string(), counts.clone());
                self.run(&IntMapGen, config, &params, INTENSITY_PRODUCT)?;

                let cell = bins::bkg_coeff_index(fov.index, energy.index, configured_bins.len());
                manifest.append(ManifestRow {
                    counts,
                    exposure,
                    gas,
                    bin_center: fov.center,
                    gal_coeff: galcoeff.get(cell).copied().unwrap_or(FREE_COEFF),
                    iso_coeff: isocoeff.get(cell).copied().unwrap_or(FREE_COEFF),
                });
            }
        }
        if manifest.rows().is_empty() {
            warn!(dir = %dir, "no supported energy bin configured, map list is empty");
        }
        manifest.write()?;
        info!(path = %manifest.path(), rows = manifest.rows().len(), "map list written");
        done(
            sink,
            format!("phase=Maps; wrote {}", manifest.path()),
            started,
        );
        Ok(manifest.path().to_path_buf())
    }

    fn run(
        &self,
        tool: &dyn ScienceTool,
        config: &ConfigStore,
        params: &ToolParams,
        product: &str,
    ) -> Result<Utf8PathBuf, AnalysisError> {
        let configured: ConfiguredTool = configure(tool, config, params)?;
        configured.invoke(&self.runner)?;
        configured
            .product(product)
            .map(Utf8Path::to_path_buf)
            .ok_or_else(|| AnalysisError::ScienceToolProductNotFound {
                tool: tool.name().to_string(),
                path: params.output(product),
            })
    }

    /// Fits every catalog source against a map list. Returns the
    /// per-source result files; with `update_catalog` they are also merged
    /// into the catalog.
    pub fn mle(
        &mut self,
        manifest: Option<&Utf8Path>,
        config: Option<ConfigStore>,
        update_catalog: bool,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Utf8PathBuf>, AnalysisError> {
        let manifest = manifest
            .map(Utf8Path::to_path_buf)
            .or_else(|| self.last_manifest.clone())
            .ok_or(AnalysisError::MaplistIsNone)?;
        let config = config.unwrap_or_else(|| self.config.snapshot());
        let results = self.fit(&manifest, &config, sink)?;
        if update_catalog {
            for path in &results {
                let output = fit_result::read(path)?;
                self.catalog.ingest_fit_result(output)?;
            }
        }
        Ok(results)
    }

    fn fit(
        &self,
        manifest: &Utf8Path,
        config: &ConfigStore,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Utf8PathBuf>, AnalysisError> {
        if self.catalog.is_empty() {
            return Err(AnalysisError::SourcesLibraryIsEmpty);
        }
        let started = Instant::now();
        let outdir = Utf8PathBuf::from(config.get_str("outdir")?);
        let dir = Store::allocate_numbered_dir(&Store::new(outdir).mle_root())?;
        let prefix = config.get_str("filenameprefix")?.to_string();

        let sourcelist = self
            .catalog
            .write_to_file(&dir.join(format!("{prefix}_sources")), "txt")?;
        let names: Vec<String> = self
            .catalog
            .sources()
            .iter()
            .map(|source| source.name.clone())
            .collect();
        phase(
            sink,
            format!("phase=Mle; fitting {} sources in {dir}", names.len()),
        );

        let mut params = ToolParams::new(&dir, prefix);
        params
            .inputs
            .insert(MAPLIST_INPUT.to_string(), manifest.to_path_buf());
        params.inputs.insert(SOURCELIST_INPUT.to_string(), sourcelist);
        let products = configure(&MultiFit::new(names), config, &params)?.invoke(&self.runner)?;
        let results: Vec<Utf8PathBuf> = products
            .into_iter()
            .filter(|path| path.extension() == Some(FIT_RESULT_EXTENSION))
            .collect();
        done(
            sink,
            format!("phase=Mle; {} fit results", results.len()),
            started,
        );
        Ok(results)
    }

    /// Estimates the background coefficients around `source` from data
    /// preceding the analysis interval. The catalog is left as it was.
    pub fn calc_bkg(
        &mut self,
        source: &str,
        galcoeff: Option<Vec<f64>>,
        past_days: f64,
        exclude_tmin_tmax: bool,
        sink: &dyn ProgressSink,
    ) -> Result<BkgResult, AnalysisError> {
        if !past_days.is_finite() || past_days < 0.0 {
            return Err(AnalysisError::UnsupportedTimeWindow(format!(
                "past_days must be a non-negative number of days, got {past_days}"
            )));
        }
        if past_days == 0.0 && exclude_tmin_tmax {
            return Err(AnalysisError::UnsupportedTimeWindow(
                "excluding tmin..tmax with no past days leaves an empty window".to_string(),
            ));
        }
        // The catalog's own backup slot belongs to the caller.
        let saved = self.catalog.sources().to_vec();
        let result = self.bkg_fit(source, galcoeff, past_days, exclude_tmin_tmax, sink);
        self.catalog.replace_sources(saved);
        result
    }

    fn bkg_fit(
        &mut self,
        source: &str,
        galcoeff: Option<Vec<f64>>,
        past_days: f64,
        exclude_tmin_tmax: bool,
        sink: &dyn ProgressSink,
    ) -> Result<BkgResult, AnalysisError> {
        let started = Instant::now();
        let mut snapshot = self.config.snapshot();
        convert_to_tt(&mut snapshot)?;
        let (tmin, tmax) = required_window(&snapshot, "calc_bkg")?;
        let window_start = tmin - past_days * SECONDS_PER_DAY;
        let window_stop = if exclude_tmin_tmax { tmin } else { tmax };

        let count = usize::try_from(snapshot.get_i64("bkgcoeffcount")?).unwrap_or(1);
        let outdir = Store::new(snapshot.get_str("outdir")?).calc_bkg_dir();
        let galcoeff = galcoeff.unwrap_or_else(|| vec![FREE_COEFF; count]);
        snapshot.set([
            ("outdir", OptionValue::from(outdir.as_str())),
            ("filenameprefix", OptionValue::from("calcbkg")),
            ("tmin", OptionValue::from(window_start)),
            ("tmax", OptionValue::from(window_stop)),
            ("timetype", OptionValue::from("TT")),
            ("galcoeff", OptionValue::from(galcoeff)),
            ("isocoeff", OptionValue::from(vec![FREE_COEFF; count])),
        ])?;
        phase(
            sink,
            format!("phase=Bkg; {source} over TT {window_start}..{window_stop}"),
        );

        if self.catalog.get(source).is_none() {
            return Err(AnalysisError::SourceNotFound(source.to_string()));
        }
        self.catalog.fix_all();
        self.catalog.free(&by_name(source), "flux", true)?;

        let manifest = self.maps(&mut snapshot, sink)?;
        let results = self.fit(&manifest, &snapshot, sink)?;
        let output = target_result(&results, &snapshot, source)?;
        done(sink, format!("phase=Bkg; {source} done"), started);
        Ok(BkgResult {
            galcoeff: output.galcoeff,
            isocoeff: output.isocoeff,
            manifest,
        })
    }

    /// Fits `source` in consecutive time bins and writes the light curve.
    pub fn light_curve_mle(
        &self,
        source: &str,
        tmin: f64,
        tmax: f64,
        timetype: TimeType,
        binsize: f64,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, AnalysisError> {
        if self.catalog.get(source).is_none() {
            return Err(AnalysisError::SourceNotFound(source.to_string()));
        }
        let started = Instant::now();
        let (tmin, tmax) = (timetype.to_tt(tmin), timetype.to_tt(tmax));
        let time_bins = bins::time_bins(tmin, tmax, binsize, self.data_end())?;
        if time_bins.is_empty() {
            return Err(AnalysisError::UnsupportedTimeWindow(format!(
                "no light-curve bin fits TT {tmin}..{tmax} with bin size {binsize}"
            )));
        }

        let store = Store::new(self.paths.outdir());
        let prefix = self.paths.prefix();
        let mut rows = Vec::with_capacity(time_bins.len());
        for (index, bin) in time_bins.iter().enumerate() {
            phase(
                sink,
                format!(
                    "phase=LightCurve; bin {}/{} TT {}..{}",
                    index + 1,
                    time_bins.len(),
                    bin.tmin,
                    bin.tmax
                ),
            );
            rows.push(self.light_curve_point(&store, index, *bin, source, sink)?);
        }

        let path = store
            .light_curve_root()
            .join(format!("{prefix}_{source}.lc"));
        write_light_curve(&path, &rows)?;
        done(sink, format!("phase=LightCurve; wrote {path}"), started);
        Ok(path)
    }

    fn light_curve_point(
        &self,
        store: &Store,
        index: usize,
        bin: TimeBin,
        source: &str,
        sink: &dyn ProgressSink,
    ) -> Result<LcRow, AnalysisError> {
        let mut snapshot = self.config.snapshot();
        snapshot.set([
            (
                "outdir",
                OptionValue::from(store.light_curve_bin_dir(index).as_str()),
            ),
            ("tmin", OptionValue::from(bin.tmin)),
            ("tmax", OptionValue::from(bin.tmax)),
            ("timetype", OptionValue::from("TT")),
        ])?;
        let manifest = self.maps(&mut snapshot, sink)?;
        let results = self.fit(&manifest, &snapshot, sink)?;
        let output = target_result(&results, &snapshot, source)?;
        Ok(LcRow::from_fit(bin, &output))
    }

    /// End of the EVT index coverage, when the index can be read.
    fn data_end(&self) -> Option<f64> {
        let evtfile = self.config.get_str("evtfile").ok()?;
        match DataIndex::read(Utf8Path::new(evtfile)) {
            Ok(index) => index.coverage().map(|(_, end)| end),
            Err(err) => {
                warn!(evtfile, error = %err, "EVT index unreadable, not bounding light curve");
                None
            }
        }
    }

    /// Runs `AG_ap` over the configured interval and returns its output.
    pub fn aperture_photometry(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, AnalysisError> {
        let started = Instant::now();
        let mut config = self.config.snapshot();
        convert_to_tt(&mut config)?;
        let outdir = Utf8PathBuf::from(config.get_str("outdir")?);
        let dir = Store::allocate_numbered_dir(&Store::new(outdir).ap_root())?;
        let params = ToolParams::new(&dir, config.get_str("filenameprefix")?);
        phase(sink, format!("phase=Ap; running in {dir}"));
        let path = self.run(&ApTool, &config, &params, AP_PRODUCT)?;
        done(sink, format!("phase=Ap; wrote {path}"), started);
        Ok(path)
    }

    /// Moves the catalog reference to a new center.
    pub fn set_center(&mut self, glon: f64, glat: f64) -> Result<(), AnalysisError> {
        self.config
            .set([("glon", OptionValue::from(glon)), ("glat", OptionValue::from(glat))])?;
        self.catalog.set_reference(SkyPosition::new(glon, glat));
        Ok(())
    }
}

/// Rewrites an MJD interval as TT on `config`.
fn convert_to_tt(config: &mut ConfigStore) -> Result<(), AnalysisError> {
    let timetype: TimeType = config.get_str("timetype")?.parse()?;
    if timetype == TimeType::Tt {
        return Ok(());
    }
    let mut updates = vec![("timetype", OptionValue::from("TT"))];
    for name in ["tmin", "tmax"] {
        if let Some(value) = config.get_opt_f64(name)? {
            updates.push((name, OptionValue::from(timetype.to_tt(value))));
        }
    }
    config.set(updates)
}

fn required_window(config: &ConfigStore, operation: &str) -> Result<(f64, f64), AnalysisError> {
    match (config.get_opt_f64("tmin")?, config.get_opt_f64("tmax")?) {
        (Some(tmin), Some(tmax)) => Ok((tmin, tmax)),
        (tmin, tmax) => Err(AnalysisError::ScienceToolInputArgMissing {
            tool: operation.to_string(),
            missing: [("tmin", tmin), ("tmax", tmax)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(name, _)| name.to_string())
                .collect(),
        }),
    }
}

fn by_name(name: &str) -> Selection {
    let target = name.to_string();
    Selection::from(Predicate::new(&["name"], move |fields| fields.name == target))
}

/// Reads the fit result of `source` among `AG_multi` products.
fn target_result(
    results: &[Utf8PathBuf],
    config: &ConfigStore,
    source: &str,
) -> Result<MultiOutput, AnalysisError> {
    let file_name = format!(
        "{}_{source}.{FIT_RESULT_EXTENSION}",
        config.get_str("filenameprefix")?
    );
    let path = results
        .iter()
        .find(|path| path.file_name() == Some(file_name.as_str()))
        .ok_or_else(|| AnalysisError::ScienceToolProductNotFound {
            tool: "AG_multi".to_string(),
            path: Utf8PathBuf::from(file_name.clone()),
        })?;
    fit_result::read(path)
}
