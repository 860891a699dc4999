use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use agile_pipeline::app::{Analysis, OfflineDownloader, ProgressSink};
use agile_pipeline::catalog::SourceCatalog;
use agile_pipeline::config::ConfigStore;
use agile_pipeline::error::AnalysisError;
use agile_pipeline::output::{JsonOutput, OutputMode, ProductsResult, StderrProgress};
use agile_pipeline::schema::AnalysisClass;
use agile_pipeline::selection::Selection;
use agile_pipeline::timeconv::TimeType;
use agile_pipeline::tool::SystemToolRunner;

#[derive(Parser)]
#[command(name = "agan")]
#[command(about = "AGILE gamma-ray analysis pipeline: maps, likelihood fits, background and light curves")]
#[command(version, author)]
struct Cli {
    /// Sectioned JSON configuration; defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = AnalysisClass::Mle)]
    class: AnalysisClass,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Generate counts, exposure, gas and intensity maps")]
    Maps,
    #[command(about = "Run the maximum-likelihood fit")]
    Mle(MleArgs),
    #[command(about = "Estimate background coefficients around a source")]
    Bkg(BkgArgs),
    #[command(about = "Fit a source in time bins and write its light curve")]
    Lc(LcArgs),
    #[command(about = "Run aperture photometry")]
    Ap,
    #[command(about = "Inspect and convert source files")]
    Sources(SourcesArgs),
    #[command(about = "Show the completed configuration")]
    Config,
}

#[derive(Args, Clone)]
struct CatalogArgs {
    /// Source file (.txt, .xml or .multi).
    #[arg(long)]
    sources: Option<Utf8PathBuf>,

    /// Minimum distance from the center, in degrees.
    #[arg(long, default_value_t = 0.0)]
    range_min: f64,

    /// Maximum distance from the center, in degrees.
    #[arg(long, default_value_t = 180.0)]
    range_max: f64,
}

#[derive(Args)]
struct MleArgs {
    #[command(flatten)]
    catalog: CatalogArgs,

    /// Existing map list; maps are generated first when omitted.
    #[arg(long)]
    maplist: Option<Utf8PathBuf>,

    /// Do not merge the fit results into the catalog.
    #[arg(long)]
    no_update: bool,
}

#[derive(Args)]
struct BkgArgs {
    source: String,

    #[command(flatten)]
    catalog: CatalogArgs,

    #[arg(long, value_delimiter = ',')]
    galcoeff: Option<Vec<f64>>,

    #[arg(long, default_value_t = 7.0)]
    past_days: f64,

    /// Stop the window at tmin instead of tmax.
    #[arg(long)]
    exclude_tmin_tmax: bool,
}

#[derive(Args)]
struct LcArgs {
    source: String,

    #[command(flatten)]
    catalog: CatalogArgs,

    #[arg(long)]
    tmin: f64,

    #[arg(long)]
    tmax: f64,

    #[arg(long, default_value = "TT")]
    timetype: String,

    /// Bin width in seconds.
    #[arg(long, default_value_t = 86400.0)]
    binsize: f64,
}

#[derive(Args)]
struct SourcesArgs {
    #[command(subcommand)]
    command: SourcesCommand,
}

#[derive(Subcommand)]
enum SourcesCommand {
    #[command(about = "List the sources matching a selection")]
    Select {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Selection expression, e.g. "dist < 3 AND flux > 1e-7".
        #[arg(long = "where")]
        expression: Option<String>,
    },
    #[command(about = "Write the loaded sources in another format")]
    Convert {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// txt, xml or reg.
        #[arg(long)]
        format: String,

        /// Output path without extension.
        #[arg(long)]
        out: Utf8PathBuf,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<AnalysisError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AnalysisError) -> u8 {
    match error {
        AnalysisError::OptionNotFound(_)
        | AnalysisError::CannotUpdate(_)
        | AnalysisError::CannotSetHidden(_)
        | AnalysisError::OptionTypeError { .. }
        | AnalysisError::ConfigurationInvalid { .. }
        | AnalysisError::ConfigRead(_)
        | AnalysisError::ConfigParse(_) => 2,
        AnalysisError::ScienceToolInputArgMissing { .. }
        | AnalysisError::ScienceToolErrorCodeReturned { .. }
        | AnalysisError::ScienceToolProductNotFound { .. }
        | AnalysisError::MissingTool(_)
        | AnalysisError::RemoteDataUnavailable(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &StderrProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };

    let config = match &cli.config {
        Some(path) => ConfigStore::load(path, cli.class)?,
        None => ConfigStore::with_defaults(cli.class)?,
    };

    match cli.command {
        Commands::Config => JsonOutput::print_config(&config.to_json()).into_diagnostic(),
        Commands::Sources(args) => run_sources(args.command, &config),
        command => {
            let mut analysis = Analysis::new(config, SystemToolRunner::new(), OfflineDownloader)?;
            run_analysis(command, &mut analysis, sink)
        }
    }
}

fn run_analysis(
    command: Commands,
    analysis: &mut Analysis<SystemToolRunner, OfflineDownloader>,
    sink: &dyn ProgressSink,
) -> miette::Result<()> {
    match command {
        Commands::Maps => {
            let manifest = analysis.generate_maps(None, sink)?;
            print_products("generate_maps", vec![manifest])
        }
        Commands::Mle(args) => {
            load_catalog(analysis, &args.catalog)?;
            let manifest = match args.maplist {
                Some(path) => path,
                None => analysis.generate_maps(None, sink)?,
            };
            let results = analysis.mle(Some(manifest.as_path()), None, !args.no_update, sink)?;
            print_products("mle", results)
        }
        Commands::Bkg(args) => {
            load_catalog(analysis, &args.catalog)?;
            let result = analysis.calc_bkg(
                &args.source,
                args.galcoeff,
                args.past_days,
                args.exclude_tmin_tmax,
                sink,
            )?;
            JsonOutput::print_bkg(&result).into_diagnostic()
        }
        Commands::Lc(args) => {
            load_catalog(analysis, &args.catalog)?;
            let timetype: TimeType = args.timetype.parse()?;
            let path = analysis.light_curve_mle(
                &args.source,
                args.tmin,
                args.tmax,
                timetype,
                args.binsize,
                sink,
            )?;
            print_products("light_curve_mle", vec![path])
        }
        Commands::Ap => {
            let path = analysis.aperture_photometry(sink)?;
            print_products("aperture_photometry", vec![path])
        }
        Commands::Sources(_) | Commands::Config => Ok(()),
    }
}

fn run_sources(command: SourcesCommand, config: &ConfigStore) -> miette::Result<()> {
    let mut catalog = SourceCatalog::from_config(config)?;
    match command {
        SourcesCommand::Select {
            catalog: args,
            expression,
        } => {
            load_into(&mut catalog, config, &args)?;
            let selected = match expression {
                Some(expression) => catalog.select(&Selection::from(expression))?,
                None => catalog.sources().to_vec(),
            };
            JsonOutput::print_sources(selected).into_diagnostic()
        }
        SourcesCommand::Convert {
            catalog: args,
            format,
            out,
        } => {
            load_into(&mut catalog, config, &args)?;
            let path = catalog.write_to_file(&out, &format)?;
            print_products("convert", vec![path])
        }
    }
}

fn load_catalog(
    analysis: &mut Analysis<SystemToolRunner, OfflineDownloader>,
    args: &CatalogArgs,
) -> miette::Result<()> {
    if let Some(path) = &args.sources {
        analysis.load_sources(path, (args.range_min, args.range_max))?;
    }
    Ok(())
}

fn load_into(
    catalog: &mut SourceCatalog,
    config: &ConfigStore,
    args: &CatalogArgs,
) -> miette::Result<()> {
    let path: &Utf8Path = args
        .sources
        .as_deref()
        .ok_or_else(|| miette::Report::msg("--sources is required"))?;
    catalog.load(path, config, (args.range_min, args.range_max))?;
    Ok(())
}

fn print_products(operation: &str, products: Vec<Utf8PathBuf>) -> miette::Result<()> {
    JsonOutput::print_products(&ProductsResult::new(operation, products)).into_diagnostic()
}
