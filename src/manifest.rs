use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::AnalysisError;
use crate::store::Store;

pub const MANIFEST_EXTENSION: &str = "maplist4";

/// One map triple with the background coefficients it is fitted with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestRow {
    pub counts: Utf8PathBuf,
    pub exposure: Utf8PathBuf,
    pub gas: Utf8PathBuf,
    /// Off-axis center of the FOV ring, degrees.
    pub bin_center: f64,
    pub gal_coeff: f64,
    pub iso_coeff: f64,
}

/// Map list handed to `AG_multi`. Rows are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductManifest {
    path: Utf8PathBuf,
    rows: Vec<ManifestRow>,
}

impl ProductManifest {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }

    pub fn append(&mut self, row: ManifestRow) {
        self.rows.push(row);
    }

    pub fn to_text(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "{} {} {} {} {} {}\n",
                    row.counts, row.exposure, row.gas, row.bin_center, row.gal_coeff, row.iso_coeff
                )
            })
            .collect()
    }

    pub fn write(&self) -> Result<(), AnalysisError> {
        Store::write_text_atomic(&self.path, &self.to_text())
    }

    pub fn read(path: &Utf8Path) -> Result<Self, AnalysisError> {
        let content = Store::read_text(path)?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Utf8Path, content: &str) -> Result<Self, AnalysisError> {
        let format_error = |line_no: usize, message: String| AnalysisError::ManifestFormat {
            path: path.to_path_buf(),
            message: format!("line {line_no}: {message}"),
        };
        let mut manifest = Self::new(path);
        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [counts, exposure, gas, center, gal, iso] = fields.as_slice() else {
                return Err(format_error(
                    line_no,
                    format!("expected 6 fields, found {}", fields.len()),
                ));
            };
            let number = |raw: &str| {
                raw.parse::<f64>()
                    .map_err(|_| format_error(line_no, format!("not a number: {raw}")))
            };
            manifest.append(ManifestRow {
                counts: Utf8PathBuf::from(*counts),
                exposure: Utf8PathBuf::from(*exposure),
                gas: Utf8PathBuf::from(*gas),
                bin_center: number(*center)?,
                gal_coeff: number(*gal)?,
                iso_coeff: number(*iso)?,
            });
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn written_manifest_parses_back() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let mut manifest = ProductManifest::new(dir.join("run.maplist4"));
        manifest.append(ManifestRow {
            counts: dir.join("a.cts.gz"),
            exposure: dir.join("a.exp.gz"),
            gas: dir.join("a.gas.gz"),
            bin_center: 30.0,
            gal_coeff: -1.0,
            iso_coeff: 7.5,
        });
        manifest.write().unwrap();
        let text = Store::read_text(manifest.path()).unwrap();
        assert!(text.ends_with(" 30 -1 7.5\n"));
        assert_eq!(ProductManifest::read(manifest.path()).unwrap(), manifest);
    }

    #[test]
    fn short_rows_are_rejected() {
        let err = ProductManifest::parse(Utf8Path::new("m.maplist4"), "a b c 30 -1\n").unwrap_err();
        assert_matches!(err, AnalysisError::ManifestFormat { .. });
    }
}
