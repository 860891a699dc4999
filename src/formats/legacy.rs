//! Legacy whitespace-separated source list consumed by `AG_multi`.
//!
//! One source per line, 17 columns:
//! `flux glon glat index fixflag 2 name loclimit type par2 par3
//! index_min index_max par2_min par2_max par3_min par3_max`.

use camino::Utf8Path;

use crate::error::AnalysisError;
use crate::fixflag;
use crate::formats::data_lines;
use crate::source::{SkyPosition, Source, Spectrum, SpectrumType};

const COLUMNS: usize = 17;
/// Constant sixth column.
const MIN_SQRTTS: &str = "2";

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

    let code: u8 = fields[8]
        .parse()
        .map_err(|_| format!("invalid spectrum type code {}", fields[8]))?;
    let kind = SpectrumType::from_code(code)
        .ok_or_else(|| format!("unknown spectrum type code {code}"))?;
    let flag: u32 = fields[4]
        .parse()
        .map_err(|_| format!("invalid fixflag {}", fields[4]))?;

    let mut spectrum = Spectrum::new(kind);
    spectrum.set_value("flux", number(0)?);
    let index_name = kind.index_name();
    spectrum.set_value(index_name, number(3)?);
    set_bounds(&mut spectrum, index_name, number(11)?, number(12)?);
    if let Some(par2) = kind.par2_name() {
        spectrum.set_value(par2, number(9)?);
        set_bounds(&mut spectrum, par2, number(13)?, number(14)?);
    }
    if let Some(par3) = kind.par3_name() {
        spectrum.set_value(par3, number(10)?);
        set_bounds(&mut spectrum, par3, number(15)?, number(16)?);
    }

    let mut source = Source::point(
        fields[6],
        SkyPosition::new(number(1)?, number(2)?),
        spectrum,
    );
    let decoded = fixflag::decode(kind, flag);
    decoded.flags.apply(&mut source);
    source.spatial.location_limit = decoded.location_limit.unwrap_or(number(7)?);
    Ok(source)
}

fn set_bounds(spectrum: &mut Spectrum, name: &str, min: f64, max: f64) {
    if let Some(param) = spectrum.get_mut(name) {
        param.min = Some(min);
        param.max = Some(max);
    }
}

pub fn write(sources: &[Source]) -> String {
    let mut out = String::from(
        "! flux glon glat index fixflag 2 name loclimit type par2 par3 \
         index_min index_max par2_min par2_max par3_min par3_max\n",
    );
    for source in sources {
        out.push_str(&write_line(source));
        out.push('\n');
    }
    out
}

fn write_line(source: &Source) -> String {
    let kind = source.spectrum.kind;
    let spectrum = &source.spectrum;
    let value = |name: Option<&str>| name.map_or(0.0, |name| spectrum.value(name));
    let bounds = |name: Option<&str>| {
        name.and_then(|name| spectrum.get(name))
            .map_or((0.0, 0.0), |p| (p.min.unwrap_or(0.0), p.max.unwrap_or(0.0)))
    };
    let index = Some(kind.index_name());
    let (index_min, index_max) = bounds(index);
    let (par2_min, par2_max) = bounds(kind.par2_name());
    let (par3_min, par3_max) = bounds(kind.par3_name());

    [
        spectrum.flux().to_string(),
        source.spatial.position.glon.to_string(),
        source.spatial.position.glat.to_string(),
        value(index).to_string(),
        fixflag::encode_source(source).to_string(),
        MIN_SQRTTS.to_string(),
        source.name.clone(),
        source.spatial.location_limit.to_string(),
        kind.code().to_string(),
        value(kind.par2_name()).to_string(),
        value(kind.par3_name()).to_string(),
        index_min.to_string(),
        index_max.to_string(),
        par2_min.to_string(),
        par2_max.to_string(),
        par3_min.to_string(),
        par3_max.to_string(),
    ]
    .join(" ")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE: &str = "\
! comment line
2.5e-07 78.2375 2.12298 1.75 1 2 2AGLJ2021+4029 0 0 0 0 0.5 5 0 0 0 0

4.1e-07 92.4 -1.2 1.9 32 2 CYGX3 0 3 500 0.1 0.5 5 100 1000 0 1
";

    #[test]
    fn parses_rows_and_flags() {
        let sources = parse(Utf8Path::new("in.txt"), SAMPLE).unwrap();
        assert_eq!(sources.len(), 2);

        let first = &sources[0];
        assert_eq!(first.name, "2AGLJ2021+4029");
        assert_eq!(first.spectrum.kind, SpectrumType::PowerLaw);
        assert!(first.spectrum.is_free("flux"));
        assert!(!first.spatial.free);
        assert_eq!(first.spectrum.get("index").unwrap().max, Some(5.0));

        let second = &sources[1];
        assert_eq!(second.spectrum.kind, SpectrumType::LogParabola);
        assert!(second.spatial.free);
        assert_eq!(second.spatial.location_limit, 2.0);
        assert!(second.free_parameters() == vec!["pos".to_string()]);
        assert_eq!(second.spectrum.value("pivotEnergy"), 500.0);
    }

    #[test]
    fn write_then_parse_preserves_sources() {
        let sources = parse(Utf8Path::new("in.txt"), SAMPLE).unwrap();
        let text = write(&sources);
        let reparsed = parse(Utf8Path::new("out.txt"), &text).unwrap();
        for (a, b) in sources.iter().zip(&reparsed) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.spatial, b.spatial);
            assert_eq!(a.spectrum, b.spectrum);
        }
        assert_eq!(write(&reparsed), text);
    }

    #[test]
    fn short_line_is_a_loading_error() {
        let err = parse(Utf8Path::new("bad.txt"), "1 2 3\n").unwrap_err();
        assert_matches!(
            err,
            AnalysisError::SourcesFileLoadingError { message, .. } if message.contains("line 1")
        );
    }
}
