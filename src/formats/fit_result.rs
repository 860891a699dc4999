//! `AG_multi` per-source result files (`<prefix>_<name>.source`).
//!
//! One `key value` pair per line. `galcoeff` and `isocoeff` hold
//! comma-separated lists; unknown keys are ignored.

use camino::Utf8Path;

use crate::error::AnalysisError;
use crate::formats::data_lines;
use crate::source::MultiOutput;
use crate::store::Store;

const REQUIRED: [&str; 3] = ["name", "sqrtts", "flux"];

pub fn read(path: &Utf8Path) -> Result<MultiOutput, AnalysisError> {
    let content = Store::read_text(path)?;
    parse(path, &content)
}

pub fn parse(path: &Utf8Path, content: &str) -> Result<MultiOutput, AnalysisError> {
    let format_error = |message: String| AnalysisError::FitResultFormat {
        path: path.to_path_buf(),
        message,
    };

    let mut output = MultiOutput {
        l: -1.0,
        b: -1.0,
        ..MultiOutput::default()
    };
    let mut seen: Vec<&str> = Vec::new();

    for (line_no, line) in data_lines(content) {
        let (key, raw) = line
            .split_once(char::is_whitespace)
            .map(|(key, raw)| (key, raw.trim()))
            .unwrap_or((line, ""));
        let number = || {
            raw.parse::<f64>()
                .map_err(|_| format_error(format!("line {line_no}: {key} is not a number: {raw}")))
        };
        let list = || {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| {
                    item.parse::<f64>().map_err(|_| {
                        format_error(format!("line {line_no}: {key} has a bad entry: {item}"))
                    })
                })
                .collect::<Result<Vec<f64>, _>>()
        };

        match key {
            "name" => output.name = raw.to_string(),
            "sqrtts" => output.sqrtts = number()?,
            "flux" => output.flux = number()?,
            "flux_err" => output.flux_err = number()?,
            "flux_ul" => output.flux_ul = number()?,
            "l" => output.l = number()?,
            "b" => output.b = number()?,
            "l_peak" => output.l_peak = number()?,
            "b_peak" => output.b_peak = number()?,
            "index" => output.index = number()?,
            "index_err" => output.index_err = number()?,
            "galcoeff" => output.galcoeff = list()?,
            "isocoeff" => output.isocoeff = list()?,
            "exposure" => output.exposure = number()?,
            "counts" => output.counts = number()?,
            "tstart_tt" => output.tstart_tt = number()?,
            "tstop_tt" => output.tstop_tt = number()?,
            "emin" => output.emin = number()?,
            "emax" => output.emax = number()?,
            _ => continue,
        }
        seen.push(key);
    }

    let missing: Vec<&str> = REQUIRED
        .into_iter()
        .filter(|key| !seen.contains(key))
        .collect();
    if !missing.is_empty() {
        return Err(format_error(format!("missing {}", missing.join(", "))));
    }
    if output.name.is_empty() {
        return Err(format_error("empty source name".to_string()));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_values_lists_and_nan() {
        let content = "! AG_multi\n\
                       name CYGX3\n\
                       sqrtts 12.5\n\
                       flux nan\n\
                       galcoeff 0.7, 0.8\n\
                       isocoeff 10.2\n\
                       l 79.85\n\
                       b 0.69\n\
                       unknown_key 1\n";
        let output = parse(Utf8Path::new("x.source"), content).unwrap();
        assert_eq!(output.name, "CYGX3");
        assert!(output.flux.is_nan());
        assert_eq!(output.galcoeff, vec![0.7, 0.8]);
        assert_eq!(output.isocoeff, vec![10.2]);
        assert!(output.has_fitted_position());
    }

    #[test]
    fn position_defaults_to_not_fitted() {
        let output =
            parse(Utf8Path::new("x.source"), "name A\nsqrtts 1\nflux 1e-7\n").unwrap();
        assert!(!output.has_fitted_position());
    }

    #[test]
    fn required_keys_are_enforced() {
        let err = parse(Utf8Path::new("x.source"), "name A\nflux 1\n").unwrap_err();
        assert_matches!(err, AnalysisError::FitResultFormat { message, .. } if message.contains("sqrtts"));
    }
}
