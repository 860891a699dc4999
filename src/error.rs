use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AnalysisError {
    #[error("option not found: {0}")]
    OptionNotFound(String),

    #[error("option {0} cannot be updated after the configuration is loaded")]
    CannotUpdate(String),

    #[error("option {0} is derived and cannot be set directly")]
    CannotSetHidden(String),

    #[error("option {option} expects {expected}, got {got}")]
    OptionTypeError {
        option: String,
        expected: String,
        got: String,
    },

    #[error("configuration is invalid:\n{}", .errors.join("\n"))]
    ConfigurationInvalid { errors: Vec<String> },

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to load sources from {path}: {message}")]
    SourcesFileLoadingError { path: Utf8PathBuf, message: String },

    #[error("source model format not supported: {0}")]
    SourceModelFormatNotSupported(String),

    #[error("selection parameter not supported: {0} (expected one of name, dist, flux, sqrtts)")]
    SelectionParamNotSupported(String),

    #[error("invalid selection expression: {0}")]
    SelectionSyntax(String),

    #[error("{0}")]
    SourceParamNotFound(String),

    #[error("source not found in catalog: {0}")]
    SourceNotFound(String),

    #[error("no catalog backup to restore")]
    CatalogBackupMissing,

    #[error("{tool}: required options not set: {}", .missing.join(", "))]
    ScienceToolInputArgMissing { tool: String, missing: Vec<String> },

    #[error("{tool} exited with code {code}: {message}")]
    ScienceToolErrorCodeReturned {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} did not produce required product {path}")]
    ScienceToolProductNotFound { tool: String, path: Utf8PathBuf },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("no map list available: run map generation first or pass a manifest")]
    MaplistIsNone,

    #[error("source catalog is empty")]
    SourcesLibraryIsEmpty,

    #[error("unsupported time window: {0}")]
    UnsupportedTimeWindow(String),

    #[error("invalid time type: {0} (expected TT or MJD)")]
    InvalidTimeType(String),

    #[error("malformed manifest {path}: {message}")]
    ManifestFormat { path: Utf8PathBuf, message: String },

    #[error("malformed fit result {path}: {message}")]
    FitResultFormat { path: Utf8PathBuf, message: String },

    #[error("remote data unavailable: {0}")]
    RemoteDataUnavailable(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
