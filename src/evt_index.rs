use camino::{Utf8Path, Utf8PathBuf};

use crate::error::AnalysisError;
use crate::formats::data_lines;
use crate::store::Store;

/// One data file listed in an EVT or LOG index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub path: Utf8PathBuf,
    pub tstart: f64,
    pub tstop: f64,
    pub kind: Option<String>,
}

/// Index file of `path tstart tstop [kind]` lines, times in TT.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataIndex {
    entries: Vec<IndexEntry>,
}

impl DataIndex {
    pub fn read(path: &Utf8Path) -> Result<Self, AnalysisError> {
        let content = Store::read_text(path)?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Utf8Path, content: &str) -> Result<Self, AnalysisError> {
        let mut entries = Vec::new();
        for (line_no, line) in data_lines(content) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (file, tstart, tstop, kind) = match fields.as_slice() {
                [file, tstart, tstop] => (file, tstart, tstop, None),
                [file, tstart, tstop, kind] => (file, tstart, tstop, Some(kind.to_string())),
                _ => {
                    return Err(AnalysisError::Filesystem(format!(
                        "{path}:{line_no}: expected `path tstart tstop [kind]`"
                    )));
                }
            };
            let time = |raw: &str| {
                raw.parse::<f64>().map_err(|_| {
                    AnalysisError::Filesystem(format!("{path}:{line_no}: invalid time {raw}"))
                })
            };
            entries.push(IndexEntry {
                path: Utf8PathBuf::from(*file),
                tstart: time(*tstart)?,
                tstop: time(*tstop)?,
                kind,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// `(earliest tstart, latest tstop)`, or `None` for an empty index.
    pub fn coverage(&self) -> Option<(f64, f64)> {
        let first = self.entries.first()?;
        Some(self.entries.iter().fold(
            (first.tstart, first.tstop),
            |(start, stop), entry| (start.min(entry.tstart), stop.max(entry.tstop)),
        ))
    }
}
