//! Catalog text (`.multi`): `name glon glat flux index type par2 par3` per
//! line. Catalog entries load with every parameter fixed.

use camino::Utf8Path;

use crate::error::AnalysisError;
use crate::formats::data_lines;
use crate::source::{SkyPosition, Source, Spectrum, SpectrumType};

const COLUMNS: usize = 8;

pub fn parse(path: &Utf8Path, content: &str) -> Result<Vec<Source>, AnalysisError> {
    data_lines(content)
        .map(|(line_no, line)| {
            parse_line(line).map_err(|message| AnalysisError::SourcesFileLoadingError {
                path: path.to_path_buf(),
                message: format!("line {line_no}: {message}"),
            })
        })
        .collect()
}

fn parse_line(line: &str) -> Result<Source, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != COLUMNS {
        return Err(format!("expected {COLUMNS} fields, found {}", fields.len()));
    }
    let number = |index: usize| -> Result<f64, String> {
        fields[index]
            .parse::<f64>()
            .map_err(|_| format!("field {} is not a number: {}", index + 1, fields[index]))
    };
    let kind: SpectrumType = fields[5].parse().map_err(|err: AnalysisError| err.to_string())?;

    let mut spectrum = Spectrum::new(kind);
    spectrum.set_value("flux", number(3)?);
    spectrum.set_value(kind.index_name(), number(4)?);
    if let Some(par2) = kind.par2_name() {
        spectrum.set_value(par2, number(6)?);
    }
    if let Some(par3) = kind.par3_name() {
        spectrum.set_value(par3, number(7)?);
    }
    Ok(Source::point(
        fields[0],
        SkyPosition::new(number(1)?, number(2)?),
        spectrum,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_entries_are_fixed() {
        let content = "! name l b flux index type par2 par3\n\
                       2AGLJ2021+4029 78.2375 2.12298 119.3e-08 1.75 1 3307.63 0\n\
                       2AGLJ2032+4135 80.2 1.0 3.4e-07 2.1 PowerLaw 0 0\n";
        let sources = parse(Utf8Path::new("cat.multi"), content).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].spectrum.value("cutoffEnergy"), 3307.63);
        assert_eq!(sources[1].spectrum.kind, SpectrumType::PowerLaw);
        assert!(sources.iter().all(|s| s.free_parameters().is_empty()));
        assert!(sources.iter().all(|s| s.spatial.location_limit == 0.0));
    }
}
