use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use agile_pipeline::app::{
    Analysis, DataDownloader, OfflineDownloader, ProgressEvent, ProgressSink,
};
use agile_pipeline::config::ConfigStore;
use agile_pipeline::error::AnalysisError;
use agile_pipeline::lightcurve::LC_HEADER;
use agile_pipeline::manifest::ProductManifest;
use agile_pipeline::options::OptionValue;
use agile_pipeline::schema::AnalysisClass;
use agile_pipeline::selection::Selection;
use agile_pipeline::timeconv::TimeType;
use agile_pipeline::tool::{ToolCommand, ToolExit, ToolRunner};

const SOURCES: &str = "\
2.5e-07 78.2375 2.12298 1.75 0 2 2AGLJ2021+4029 0 0 0 0 0.5 5 0 0 0 0
4.1e-07 80 1 1.9 37 2 2AGLJ2032+4135 0 1 3000 0 0.5 5 20 10000 0 0
";

const TARGET: &str = "2AGLJ2021+4029";

/// Writes every declared product; fit results carry canned values.
#[derive(Default)]
struct MockRunner {
    calls: Mutex<Vec<String>>,
    fail: Option<&'static str>,
    nan_flux: bool,
}

impl MockRunner {
    fn failing(program: &'static str) -> Self {
        Self {
            fail: Some(program),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn fit_result(&self, name: &str) -> String {
        let flux = if self.nan_flux { "nan" } else { "3e-07" };
        format!(
            "! AG_multi mock\nname {name}\nsqrtts 5.5\nflux {flux}\nflux_err 1e-08\nflux_ul 4e-07\n\
             l -1\nb -1\nindex 2.1\ngalcoeff 0.7\nisocoeff 12.5\nexposure 1e8\ncounts 42\n"
        )
    }
}

impl ToolRunner for MockRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolExit, AnalysisError> {
        self.calls.lock().unwrap().push(command.program.clone());
        if self.fail == Some(command.program.as_str()) {
            return Ok(ToolExit {
                code: 2,
                stderr: "mock failure".to_string(),
            });
        }
        for product in &command.products {
            if let Some(parent) = product.path.parent() {
                std::fs::create_dir_all(parent.as_std_path()).unwrap();
            }
            let content = if product.path.extension() == Some("source") {
                self.fit_result(&product.key)
            } else {
                "mock".to_string()
            };
            std::fs::write(product.path.as_std_path(), content).unwrap();
        }
        Ok(ToolExit {
            code: 0,
            stderr: String::new(),
        })
    }
}

#[derive(Default)]
struct RecordingDownloader {
    requests: Mutex<Vec<(f64, f64)>>,
}

impl DataDownloader for RecordingDownloader {
    fn ensure_data(&self, tmin: f64, tmax: f64) -> Result<(), AnalysisError> {
        self.requests.lock().unwrap().push((tmin, tmax));
        Ok(())
    }
}

#[derive(Default)]
struct Phases {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for Phases {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn workspace() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn config(root: &Utf8Path) -> ConfigStore {
    let index = root.join("EVT.index");
    std::fs::write(index.as_std_path(), "/data/ag1.evt.gz 1000 1090 EVT\n").unwrap();
    let mut config = ConfigStore::with_defaults(AnalysisClass::Mle).unwrap();
    config
        .set([
            ("outdir", OptionValue::from(root.join("out").as_str())),
            ("filenameprefix", OptionValue::from("run")),
            ("evtfile", OptionValue::from(index.as_str())),
            ("logfile", OptionValue::from("/data/LOG.index")),
            ("tmin", OptionValue::from(1000.0)),
            ("tmax", OptionValue::from(1090.0)),
            ("glon", OptionValue::from(78.2375)),
            ("glat", OptionValue::from(2.12298)),
        ])
        .unwrap();
    config
}

fn analysis(root: &Utf8Path, runner: MockRunner) -> Analysis<MockRunner, OfflineDownloader> {
    let mut analysis = Analysis::new(config(root), runner, OfflineDownloader).unwrap();
    let sources = root.join("sources.txt");
    std::fs::write(sources.as_std_path(), SOURCES).unwrap();
    analysis.load_sources(&sources, (0.0, 10.0)).unwrap();
    analysis
}

fn free_flags(analysis: &Analysis<MockRunner, OfflineDownloader>) -> Vec<Vec<String>> {
    analysis
        .catalog()
        .sources()
        .iter()
        .map(|source| source.free_parameters())
        .collect()
}

#[test]
fn maps_cover_every_supported_cell() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::default());
    analysis
        .config_mut()
        .set([
            (
                "energybins",
                OptionValue::from(vec![vec![100, 300], vec![300, 1000], vec![123, 456]]),
            ),
            ("fovbinnumber", OptionValue::from(2)),
            (
                "galcoeff",
                OptionValue::from(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]),
            ),
        ])
        .unwrap();

    let phases = Phases::default();
    let path = analysis.generate_maps(None, &phases).unwrap();

    assert_eq!(path, root.join("out/maps/1/run.maplist4"));
    assert_eq!(analysis.last_manifest(), Some(path.as_path()));
    let manifest = ProductManifest::read(&path).unwrap();
    let coefficients: Vec<(f64, f64)> = manifest
        .rows()
        .iter()
        .map(|row| (row.gal_coeff, row.iso_coeff))
        .collect();
    assert_eq!(
        coefficients,
        vec![(0.1, -1.0), (0.2, -1.0), (0.4, -1.0), (0.5, -1.0)]
    );
    assert_eq!(manifest.rows()[0].bin_center, 15.0);
    assert_eq!(manifest.rows()[2].bin_center, 45.0);
    assert!(
        manifest.rows()[0]
            .counts
            .as_str()
            .ends_with("run_1000_1090_100_300_78.2375_2.12298_0.cts.gz")
    );

    let calls = analysis.runner().calls();
    assert_eq!(calls.len(), 16);
    assert_eq!(
        &calls[..4],
        ["AG_ctsmapgen", "AG_expmapgen", "AG_gasmapgen", "AG_intmapgen"]
    );
    assert!(
        phases
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.starts_with("phase=Maps"))
    );

    let second = analysis.generate_maps(None, &Phases::default()).unwrap();
    assert_eq!(second, root.join("out/maps/2/run.maplist4"));
}

#[test]
fn missing_event_file_stops_map_generation() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::default());
    analysis
        .config_mut()
        .set_option("evtfile", OptionValue::Null)
        .unwrap();
    let err = analysis.generate_maps(None, &Phases::default()).unwrap_err();
    assert_matches!(
        err,
        AnalysisError::ScienceToolInputArgMissing { tool, missing }
            if tool == "AG_ctsmapgen" && missing == vec!["evtfile".to_string()]
    );
    assert!(analysis.runner().calls().is_empty());
}

#[test]
fn tool_failure_aborts_the_call() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::failing("AG_gasmapgen"));
    let err = analysis.generate_maps(None, &Phases::default()).unwrap_err();
    assert_matches!(
        err,
        AnalysisError::ScienceToolErrorCodeReturned { code: 2, .. }
    );
    assert!(analysis.last_manifest().is_none());
}

#[test]
fn mle_fits_and_updates_catalog() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::default());
    analysis.generate_maps(None, &Phases::default()).unwrap();

    let results = analysis.mle(None, None, true, &Phases::default()).unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|path| path.extension() == Some("source")));
    assert!(root.join("out/mle/1/run_sources.txt").as_std_path().is_file());
    for source in analysis.catalog().sources() {
        let multi = source.multi.as_ref().unwrap();
        assert_eq!(multi.sqrtts, 5.5);
        assert_eq!(multi.galcoeff, vec![0.7]);
    }
}

#[test]
fn mle_needs_a_map_list_and_sources() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::default());
    assert_matches!(
        analysis.mle(None, None, false, &Phases::default()),
        Err(AnalysisError::MaplistIsNone)
    );

    let mut empty =
        Analysis::new(config(&root), MockRunner::default(), OfflineDownloader).unwrap();
    let manifest = root.join("given.maplist4");
    assert_matches!(
        empty.mle(Some(manifest.as_path()), None, false, &Phases::default()),
        Err(AnalysisError::SourcesLibraryIsEmpty)
    );
}

#[test]
fn calc_bkg_returns_coefficients_and_keeps_state() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::default());
    let before = free_flags(&analysis);
    assert!(!before.iter().all(Vec::is_empty));

    let result = analysis
        .calc_bkg(TARGET, None, 1.0, true, &Phases::default())
        .unwrap();

    assert_eq!(result.galcoeff, vec![0.7]);
    assert_eq!(result.isocoeff, vec![12.5]);
    assert_eq!(
        result.manifest,
        root.join("out/calcbkg/maps/1/calcbkg.maplist4")
    );
    assert_eq!(free_flags(&analysis), before);
    assert!(analysis.last_manifest().is_none());
    assert_eq!(analysis.config().get_f64("tmin").unwrap(), 1000.0);
    assert_eq!(analysis.config().get_str("filenameprefix").unwrap(), "run");

    let sourcelist = std::fs::read_to_string(
        root.join("out/calcbkg/mle/1/calcbkg_sources.txt").as_std_path(),
    )
    .unwrap();
    let fixflags: Vec<(String, String)> = sourcelist
        .lines()
        .filter(|line| !line.starts_with('!'))
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            (fields[6].to_string(), fields[4].to_string())
        })
        .collect();
    assert_eq!(
        fixflags,
        vec![
            (TARGET.to_string(), "1".to_string()),
            ("2AGLJ2032+4135".to_string(), "0".to_string()),
        ]
    );

    let maps = ProductManifest::read(&result.manifest).unwrap();
    assert!(
        maps.rows()[0]
            .counts
            .as_str()
            .contains("calcbkg_-85400_1000_")
    );
}

#[test]
fn calc_bkg_restores_catalog_on_error() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::failing("AG_multi"));
    let before = free_flags(&analysis);

    assert_matches!(
        analysis.calc_bkg(TARGET, None, 1.0, false, &Phases::default()),
        Err(AnalysisError::ScienceToolErrorCodeReturned { .. })
    );
    assert_eq!(free_flags(&analysis), before);

    assert_matches!(
        analysis.calc_bkg("NOPE", None, 1.0, false, &Phases::default()),
        Err(AnalysisError::SourceNotFound(_))
    );
    assert_eq!(free_flags(&analysis), before);

    assert_matches!(
        analysis.calc_bkg(TARGET, None, 0.0, true, &Phases::default()),
        Err(AnalysisError::UnsupportedTimeWindow(_))
    );
}

#[test]
fn calc_bkg_leaves_caller_backup_in_place() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::default());
    let original = free_flags(&analysis);

    analysis.catalog_mut().backup();
    analysis
        .catalog_mut()
        .free(&Selection::from("dist >= 0"), "index", true)
        .unwrap();
    let edited = free_flags(&analysis);
    assert_ne!(edited, original);

    analysis
        .calc_bkg(TARGET, None, 1.0, false, &Phases::default())
        .unwrap();
    assert_eq!(free_flags(&analysis), edited);

    analysis.catalog_mut().restore().unwrap();
    assert_eq!(free_flags(&analysis), original);
}

#[test]
fn calc_bkg_rejects_unusable_past_days() {
    let (_temp, root) = workspace();
    let mut analysis = analysis(&root, MockRunner::default());
    for past_days in [f64::NAN, f64::INFINITY, -1.0] {
        assert_matches!(
            analysis.calc_bkg(TARGET, None, past_days, false, &Phases::default()),
            Err(AnalysisError::UnsupportedTimeWindow(_))
        );
    }
    assert!(analysis.runner().calls().is_empty());
}

#[test]
fn light_curve_bins_stop_at_data_end() {
    let (_temp, root) = workspace();
    let analysis = analysis(&root, MockRunner::default());

    let path = analysis
        .light_curve_mle(TARGET, 1000.0, 1100.0, TimeType::Tt, 30.0, &Phases::default())
        .unwrap();

    assert_eq!(path, root.join("out/lc/run_2AGLJ2021+4029.lc"));
    let content = std::fs::read_to_string(path.as_std_path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], LC_HEADER);
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("1000 1030 "));
    assert!(lines[3].starts_with("1060 1090 "));
    for bin in 0..3 {
        let manifest = root.join(format!("out/lc/{bin}/maps/1/run.maplist4"));
        assert!(manifest.as_std_path().is_file());
    }
    assert_eq!(analysis.config().get_f64("tmax").unwrap(), 1090.0);
}

#[test]
fn light_curve_reports_nan_flux_as_zero() {
    let (_temp, root) = workspace();
    let runner = MockRunner {
        nan_flux: true,
        ..MockRunner::default()
    };
    let analysis = analysis(&root, runner);
    let path = analysis
        .light_curve_mle(TARGET, 1000.0, 1030.0, TimeType::Tt, 30.0, &Phases::default())
        .unwrap();
    let content = std::fs::read_to_string(path.as_std_path()).unwrap();
    let fields: Vec<&str> = content.lines().nth(1).unwrap().split(' ').collect();
    assert_eq!(&fields[5..8], ["0", "0", "0"]);
}

#[test]
fn light_curve_outside_coverage_is_rejected() {
    let (_temp, root) = workspace();
    let analysis = analysis(&root, MockRunner::default());
    assert_matches!(
        analysis.light_curve_mle(TARGET, 2000.0, 3000.0, TimeType::Tt, 30.0, &Phases::default()),
        Err(AnalysisError::UnsupportedTimeWindow(_))
    );
    assert_matches!(
        analysis.light_curve_mle("NOPE", 1000.0, 1090.0, TimeType::Tt, 30.0, &Phases::default()),
        Err(AnalysisError::SourceNotFound(_))
    );
}

#[test]
fn remote_data_is_requested_in_tt() {
    let (_temp, root) = workspace();
    let config = ConfigStore::from_json_str(
        &format!(
            r#"{{
                "input": {{"userestapi": true, "evtfile": "/data/EVT.index", "logfile": "/data/LOG.index"}},
                "output": {{"outdir": "{}"}},
                "selection": {{"tmin": 58000, "tmax": 58001, "timetype": "MJD"}}
            }}"#,
            root.join("out")
        ),
        AnalysisClass::Mle,
    )
    .unwrap();
    let mut analysis =
        Analysis::new(config, MockRunner::default(), RecordingDownloader::default()).unwrap();

    analysis.generate_maps(None, &Phases::default()).unwrap();

    assert_eq!(
        *analysis.downloader().requests.lock().unwrap(),
        vec![(431_568_000.0, 431_654_400.0)]
    );
    assert_eq!(analysis.config().get_str("timetype").unwrap(), "MJD");
}

#[test]
fn aperture_photometry_writes_ap_file() {
    let (_temp, root) = workspace();
    let mut config = ConfigStore::with_defaults(AnalysisClass::AperturePhotometry).unwrap();
    config
        .set([
            ("outdir", OptionValue::from(root.join("out").as_str())),
            ("evtfile", OptionValue::from("/data/EVT.index")),
            ("logfile", OptionValue::from("/data/LOG.index")),
            ("tmin", OptionValue::from(1000.0)),
            ("tmax", OptionValue::from(2000.0)),
        ])
        .unwrap();
    let analysis = Analysis::new(config, MockRunner::default(), OfflineDownloader).unwrap();

    let path = analysis.aperture_photometry(&Phases::default()).unwrap();

    assert_eq!(path, root.join("out/ap/1/analysis_product.ap"));
    assert_eq!(analysis.runner().calls(), vec!["AG_ap".to_string()]);
}

#[test]
fn light_curve_rejects_degenerate_bins() {
    let (_temp, root) = workspace();
    let analysis = analysis(&root, MockRunner::default());
    for binsize in [f64::NAN, f64::INFINITY, 0.0, -30.0] {
        assert_matches!(
            analysis.light_curve_mle(TARGET, 1000.0, 1090.0, TimeType::Tt, binsize, &Phases::default()),
            Err(AnalysisError::UnsupportedTimeWindow(_))
        );
    }
    assert_matches!(
        analysis.light_curve_mle(TARGET, f64::NAN, 1090.0, TimeType::Tt, 30.0, &Phases::default()),
        Err(AnalysisError::UnsupportedTimeWindow(_))
    );
    assert!(analysis.runner().calls().is_empty());
}
