use camino::Utf8Path;
use serde::Serialize;
use tracing::warn;

use crate::bins::TimeBin;
use crate::error::AnalysisError;
use crate::source::MultiOutput;
use crate::store::Store;
use crate::timeconv::tt_to_mjd;

pub const LC_HEADER: &str = "tstart_tt tstop_tt tstart_mjd tstop_mjd sqrtts flux flux_err flux_ul \
galcoeff isocoeff l_peak b_peak exposure counts index index_err";

/// One light-curve point: the fit of the target over one time bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LcRow {
    pub tstart_tt: f64,
    pub tstop_tt: f64,
    pub tstart_mjd: f64,
    pub tstop_mjd: f64,
    pub sqrtts: f64,
    pub flux: f64,
    pub flux_err: f64,
    pub flux_ul: f64,
    pub galcoeff: Vec<f64>,
    pub isocoeff: Vec<f64>,
    pub l_peak: f64,
    pub b_peak: f64,
    pub exposure: f64,
    pub counts: f64,
    pub index: f64,
    pub index_err: f64,
}

impl LcRow {
    /// A NaN flux (failed fit) is reported as zero flux, error and upper
    /// limit.
    pub fn from_fit(bin: TimeBin, output: &MultiOutput) -> Self {
        let (flux, flux_err, flux_ul) = if output.flux.is_nan() {
            warn!(
                source = %output.name,
                tmin = bin.tmin,
                tmax = bin.tmax,
                "fit returned NaN flux, reporting zero"
            );
            (0.0, 0.0, 0.0)
        } else {
            (output.flux, output.flux_err, output.flux_ul)
        };
        Self {
            tstart_tt: bin.tmin,
            tstop_tt: bin.tmax,
            tstart_mjd: tt_to_mjd(bin.tmin),
            tstop_mjd: tt_to_mjd(bin.tmax),
            sqrtts: output.sqrtts,
            flux,
            flux_err,
            flux_ul,
            galcoeff: output.galcoeff.clone(),
            isocoeff: output.isocoeff.clone(),
            l_peak: output.l_peak,
            b_peak: output.b_peak,
            exposure: output.exposure,
            counts: output.counts,
            index: output.index,
            index_err: output.index_err,
        }
    }

    fn to_line(&self) -> String {
        let join = |values: &[f64]| {
            if values.is_empty() {
                return "nan".to_string();
            }
            values
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
            self.tstart_tt,
            self.tstop_tt,
            self.tstart_mjd,
            self.tstop_mjd,
            self.sqrtts,
            self.flux,
            self.flux_err,
            self.flux_ul,
            join(&self.galcoeff),
            join(&self.isocoeff),
            self.l_peak,
            self.b_peak,
            self.exposure,
            self.counts,
            self.index,
            self.index_err
        )
    }
}

pub fn write_light_curve(path: &Utf8Path, rows: &[LcRow]) -> Result<(), AnalysisError> {
    let mut content = String::from(LC_HEADER);
    content.push('\n');
    for row in rows {
        content.push_str(&row.to_line());
        content.push('\n');
    }
    Store::write_text_atomic(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_flux_fails_over_to_zero() {
        let output = MultiOutput {
            name: "CYGX3".to_string(),
            sqrtts: 0.5,
            flux: f64::NAN,
            flux_err: 1.0,
            flux_ul: 2.0,
            galcoeff: vec![0.7],
            ..MultiOutput::default()
        };
        let row = LcRow::from_fit(TimeBin { tmin: 0.0, tmax: 86400.0 }, &output);
        assert_eq!((row.flux, row.flux_err, row.flux_ul), (0.0, 0.0, 0.0));
        assert_eq!(row.tstop_mjd, 53006.0);
    }

    #[test]
    fn file_has_fixed_header_and_one_line_per_bin() {
        let temp = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(temp.path().join("x.lc")).unwrap();
        let output = MultiOutput {
            galcoeff: vec![0.7, 0.8],
            ..MultiOutput::default()
        };
        let rows = vec![
            LcRow::from_fit(TimeBin { tmin: 0.0, tmax: 30.0 }, &output),
            LcRow::from_fit(TimeBin { tmin: 30.0, tmax: 60.0 }, &output),
        ];
        write_light_curve(&path, &rows).unwrap();
        let content = Store::read_text(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], LC_HEADER);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].split(' ').count(), 16);
        assert!(lines[2].contains(" 0.7,0.8 "));
    }
}
