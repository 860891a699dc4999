use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::config::ConfigStore;
use crate::error::AnalysisError;
use crate::formats::{self, InputFormat, SourceFormat};
use crate::options::OptionValue;
use crate::selection::Selection;
use crate::source::{MultiOutput, SkyPosition, Source, Spectrum, SpectrumType};
use crate::store::Store;

/// Parameters `free` accepts. `pos` stands for the position.
pub const FREEABLE_PARAMETERS: [&str; 8] = [
    "flux",
    "index",
    "index1",
    "index2",
    "cutoffEnergy",
    "pivotEnergy",
    "curvature",
    "pos",
];

/// The mutable set of candidate sources of one analysis.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    sources: Vec<Source>,
    backup: Option<Vec<Source>>,
    reference: SkyPosition,
}

impl SourceCatalog {
    pub fn new(reference: SkyPosition) -> Self {
        Self {
            sources: Vec::new(),
            backup: None,
            reference,
        }
    }

    pub fn from_config(config: &ConfigStore) -> Result<Self, AnalysisError> {
        Ok(Self::new(reference_of(config)?))
    }

    pub fn reference(&self) -> SkyPosition {
        self.reference
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|source| source.name == name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Loads a source file and merges it into the catalog. Sources farther
    /// than `range` from the configured center are dropped; a name already
    /// present is replaced. Nothing is added when any line fails to parse.
    pub fn load(
        &mut self,
        path: &Utf8Path,
        config: &ConfigStore,
        range: (f64, f64),
    ) -> Result<Vec<Source>, AnalysisError> {
        let format = InputFormat::detect(path)?;
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
            AnalysisError::SourcesFileLoadingError {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        let parsed = match format {
            InputFormat::Legacy => formats::legacy::parse(path, &content)?,
            InputFormat::Xml => formats::xml::parse(path, &content)?,
            InputFormat::Multi => formats::multi::parse(path, &content)?,
        };

        self.set_reference(reference_of(config)?);
        let (min, max) = range;
        let total = parsed.len();
        let mut loaded = Vec::with_capacity(total);
        for mut source in parsed {
            source.refresh_distance(&self.reference);
            if (min..=max).contains(&source.spatial.dist) {
                loaded.push(source);
            }
        }
        for source in &loaded {
            self.insert(source.clone());
        }
        info!(
            path = %path,
            loaded = loaded.len(),
            skipped = total - loaded.len(),
            "sources loaded"
        );
        Ok(loaded)
    }

    fn insert(&mut self, source: Source) {
        match self.sources.iter_mut().find(|existing| **existing == source) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    pub fn select(&self, selection: &Selection) -> Result<Vec<Source>, AnalysisError> {
        let compiled = selection.compile()?;
        Ok(self
            .sources
            .iter()
            .filter(|source| compiled.matches(source))
            .cloned()
            .collect())
    }

    /// Sets the free flag of `param` on every selected source. Returns the
    /// sources whose flag actually changed.
    pub fn free(
        &mut self,
        selection: &Selection,
        param: &str,
        free: bool,
    ) -> Result<Vec<Source>, AnalysisError> {
        if !FREEABLE_PARAMETERS.contains(&param) {
            return Err(AnalysisError::SourceParamNotFound(format!(
                "cannot free or fix {param}: expected one of {}",
                FREEABLE_PARAMETERS.join(", ")
            )));
        }
        let compiled = selection.compile()?;
        let mut changed = Vec::new();
        for source in &mut self.sources {
            if !compiled.matches(source) || !source.has_parameter(param) {
                continue;
            }
            if source.set_free(param, free) {
                changed.push(source.clone());
            }
        }
        debug!(param, free, changed = changed.len(), "free flags updated");
        Ok(changed)
    }

    /// Fixes every free parameter of every source.
    pub fn fix_all(&mut self) {
        for source in &mut self.sources {
            for param in source.free_parameters() {
                source.set_free(&param, false);
            }
        }
    }

    /// Adds a point source built from `fields`. `glon`, `glat` and
    /// `spectrumType` are required; spectral values default to 0.
    pub fn add(
        &mut self,
        name: &str,
        fields: &BTreeMap<String, OptionValue>,
    ) -> Result<Source, AnalysisError> {
        if self.get(name).is_some() {
            return Err(AnalysisError::SourceParamNotFound(format!(
                "a source named {name} already exists"
            )));
        }
        let number = |key: &str| -> Result<Option<f64>, AnalysisError> {
            match fields.get(key) {
                None | Some(OptionValue::Null) => Ok(None),
                Some(value) => value.as_f64().map(Some).ok_or_else(|| {
                    AnalysisError::SourceParamNotFound(format!("{key} must be a number, got {value}"))
                }),
            }
        };
        let require = |key: &str| -> Result<f64, AnalysisError> {
            number(key)?.ok_or_else(|| {
                AnalysisError::SourceParamNotFound(format!("missing required field {key}"))
            })
        };

        let kind: SpectrumType = match fields.get("spectrumType") {
            Some(OptionValue::Str(text)) => text.parse()?,
            Some(OptionValue::Int(code)) => u8::try_from(*code)
                .ok()
                .and_then(SpectrumType::from_code)
                .ok_or_else(|| {
                    AnalysisError::SourceParamNotFound(format!("unknown spectrum type code {code}"))
                })?,
            _ => {
                return Err(AnalysisError::SourceParamNotFound(
                    "missing required field spectrumType".to_string(),
                ));
            }
        };
        let position = SkyPosition::new(require("glon")?, require("glat")?);

        for key in fields.keys() {
            let known = matches!(
                key.as_str(),
                "glon" | "glat" | "spectrumType" | "locationLimit"
            ) || kind.parameter_names().contains(&key.as_str());
            if !known {
                return Err(AnalysisError::SourceParamNotFound(format!(
                    "{key} is not a parameter of a {kind} source"
                )));
            }
        }

        let mut spectrum = Spectrum::new(kind);
        for &param in kind.parameter_names() {
            spectrum.set_value(param, number(param)?.unwrap_or(0.0));
        }
        let mut source = Source::point(name, position, spectrum);
        source.spatial.location_limit = number("locationLimit")?.unwrap_or(0.0);
        source.refresh_distance(&self.reference);
        self.sources.push(source.clone());
        info!(source = name, "source added");
        Ok(source)
    }

    pub fn delete(&mut self, selection: &Selection) -> Result<Vec<Source>, AnalysisError> {
        let compiled = selection.compile()?;
        let (removed, kept): (Vec<Source>, Vec<Source>) = self
            .sources
            .drain(..)
            .partition(|source| compiled.matches(source));
        self.sources = kept;
        info!(removed = removed.len(), "sources deleted");
        Ok(removed)
    }

    pub fn backup(&mut self) {
        self.backup = Some(self.sources.clone());
    }

    pub fn restore(&mut self) -> Result<(), AnalysisError> {
        let backup = self.backup.take().ok_or(AnalysisError::CatalogBackupMissing)?;
        self.sources = backup;
        Ok(())
    }

    /// Replaces the source list without touching the backup slot.
    pub(crate) fn replace_sources(&mut self, sources: Vec<Source>) {
        self.sources = sources;
    }

    pub fn update_position(
        &mut self,
        name: &str,
        glon: f64,
        glat: f64,
    ) -> Result<(), AnalysisError> {
        let reference = self.reference;
        let source = self
            .sources
            .iter_mut()
            .find(|source| source.name == name)
            .ok_or_else(|| AnalysisError::SourceNotFound(name.to_string()))?;
        source.spatial.position = SkyPosition::new(glon, glat);
        source.refresh_distance(&reference);
        Ok(())
    }

    pub fn set_reference(&mut self, reference: SkyPosition) {
        self.reference = reference;
        for source in &mut self.sources {
            source.refresh_distance(&reference);
        }
    }

    /// Attaches fit results to the source of the same name.
    pub fn ingest_fit_result(&mut self, output: MultiOutput) -> Result<(), AnalysisError> {
        let reference = self.reference;
        let source = self
            .sources
            .iter_mut()
            .find(|source| source.name == output.name)
            .ok_or_else(|| AnalysisError::SourceNotFound(output.name.clone()))?;
        source.multi = Some(output);
        source.refresh_distance(&reference);
        Ok(())
    }

    /// Writes the catalog to `<prefix>.<ext>` and returns that path.
    pub fn write_to_file(
        &self,
        prefix: &Utf8Path,
        format: &str,
    ) -> Result<Utf8PathBuf, AnalysisError> {
        let format: SourceFormat = format.parse()?;
        let path = Utf8PathBuf::from(format!("{prefix}.{}", format.extension()));
        let content = match format {
            SourceFormat::Txt => formats::legacy::write(&self.sources),
            SourceFormat::Xml => formats::xml::write(&self.sources),
            SourceFormat::Reg => formats::region::write(&self.sources),
        };
        Store::write_text_atomic(&path, &content)?;
        debug!(path = %path, %format, sources = self.sources.len(), "catalog written");
        Ok(path)
    }
}

fn reference_of(config: &ConfigStore) -> Result<SkyPosition, AnalysisError> {
    Ok(SkyPosition::new(
        config.get_f64("glon")?,
        config.get_f64("glat")?,
    ))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::selection::Predicate;

    fn catalog() -> SourceCatalog {
        let mut catalog = SourceCatalog::new(SkyPosition::new(80.0, 0.0));
        for (name, glon, flux) in [("A", 80.5, 1e-7), ("B", 83.0, 5e-7), ("C", 90.0, 2e-7)] {
            let mut fields = BTreeMap::new();
            fields.insert("glon".to_string(), OptionValue::Float(glon));
            fields.insert("glat".to_string(), OptionValue::Float(0.0));
            fields.insert("spectrumType".to_string(), OptionValue::from("PowerLaw"));
            fields.insert("flux".to_string(), OptionValue::Float(flux));
            catalog.add(name, &fields).unwrap();
        }
        catalog
    }

    #[test]
    fn add_requires_position_and_type() {
        let mut catalog = catalog();
        let mut fields = BTreeMap::new();
        fields.insert("glon".to_string(), OptionValue::Float(1.0));
        fields.insert("spectrumType".to_string(), OptionValue::Int(3));
        let err = catalog.add("D", &fields).unwrap_err();
        assert_matches!(err, AnalysisError::SourceParamNotFound(message) if message.contains("glat"));

        fields.insert("glat".to_string(), OptionValue::Float(1.0));
        let added = catalog.add("D", &fields).unwrap();
        assert_eq!(added.spectrum.kind, SpectrumType::LogParabola);
        assert_eq!(added.spectrum.value("curvature"), 0.0);

        let err = catalog.add("D", &fields).unwrap_err();
        assert_matches!(err, AnalysisError::SourceParamNotFound(_));
    }

    #[test]
    fn free_reports_only_changed_sources() {
        let mut catalog = catalog();
        let near = Selection::from("dist < 5");
        assert_eq!(catalog.free(&near, "flux", true).unwrap().len(), 2);
        assert!(catalog.free(&near, "flux", true).unwrap().is_empty());
        assert!(catalog.free(&near, "curvature", true).unwrap().is_empty());
        assert_matches!(
            catalog.free(&near, "ts", true),
            Err(AnalysisError::SourceParamNotFound(_))
        );
    }

    #[test]
    fn expression_and_predicate_agree() {
        let catalog = catalog();
        let by_text = catalog
            .select(&Selection::from("dist <= 5 AND flux > 2e-7"))
            .unwrap();
        let by_closure = catalog
            .select(&Selection::from(Predicate::new(&["dist", "flux"], |f| {
                f.dist <= 5.0 && f.flux > 2e-7
            })))
            .unwrap();
        assert_eq!(by_text, by_closure);
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].name, "B");
    }

    #[test]
    fn sqrtts_selection_skips_sources_without_fit() {
        let mut catalog = catalog();
        catalog
            .ingest_fit_result(MultiOutput {
                name: "C".to_string(),
                sqrtts: 9.0,
                flux: 3e-7,
                l: -1.0,
                b: -1.0,
                ..MultiOutput::default()
            })
            .unwrap();
        let selected = catalog.select(&Selection::from("sqrtts >= 0")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "C");
    }

    #[test]
    fn fitted_position_drives_distance() {
        let mut catalog = catalog();
        catalog
            .ingest_fit_result(MultiOutput {
                name: "C".to_string(),
                l: 80.0,
                b: 1.0,
                ..MultiOutput::default()
            })
            .unwrap();
        let source = catalog.get("C").unwrap();
        assert!((source.selection_dist() - 1.0).abs() < 1e-9);
        assert!((source.spatial.dist - 10.0).abs() < 1e-9);
        assert_matches!(
            catalog.ingest_fit_result(MultiOutput {
                name: "missing".to_string(),
                ..MultiOutput::default()
            }),
            Err(AnalysisError::SourceNotFound(_))
        );
    }

    #[test]
    fn delete_and_restore() {
        let mut catalog = catalog();
        assert_matches!(catalog.restore(), Err(AnalysisError::CatalogBackupMissing));
        catalog.backup();
        let removed = catalog.delete(&Selection::from("name != 'A'")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(catalog.len(), 1);
        catalog.restore().unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn update_position_recomputes_distance() {
        let mut catalog = catalog();
        catalog.update_position("A", 80.0, 2.0).unwrap();
        assert!((catalog.get("A").unwrap().spatial.dist - 2.0).abs() < 1e-9);
        assert_matches!(
            catalog.update_position("Z", 0.0, 0.0),
            Err(AnalysisError::SourceNotFound(_))
        );
    }
}
