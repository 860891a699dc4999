//! Source file formats: the legacy 17-column text, the XML source library,
//! the 8-column catalog text, ds9 regions and `AG_multi` fit results.

pub mod fit_result;
pub mod legacy;
pub mod multi;
pub mod region;
pub mod xml;

use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;

use crate::error::AnalysisError;

/// Formats a catalog can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Txt,
    Xml,
    Reg,
}

impl SourceFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Txt => "txt",
            SourceFormat::Xml => "xml",
            SourceFormat::Reg => "reg",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SourceFormat {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "txt" => Ok(SourceFormat::Txt),
            "xml" => Ok(SourceFormat::Xml),
            "reg" | "reg-region" => Ok(SourceFormat::Reg),
            _ => Err(AnalysisError::SourceModelFormatNotSupported(value.to_string())),
        }
    }
}

/// Formats a catalog can be loaded from, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Legacy,
    Xml,
    Multi,
}

impl InputFormat {
    pub fn detect(path: &Utf8Path) -> Result<Self, AnalysisError> {
        match path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("txt") => Ok(InputFormat::Legacy),
            Some("xml") => Ok(InputFormat::Xml),
            Some("multi") => Ok(InputFormat::Multi),
            _ => Err(AnalysisError::SourceModelFormatNotSupported(path.to_string())),
        }
    }
}

/// Lines carrying data: not blank and not a `!` comment.
pub(crate) fn data_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('!'))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn output_format_aliases() {
        assert_eq!("reg-region".parse::<SourceFormat>().unwrap(), SourceFormat::Reg);
        assert_eq!("XML".parse::<SourceFormat>().unwrap(), SourceFormat::Xml);
        assert_matches!(
            "fits".parse::<SourceFormat>(),
            Err(AnalysisError::SourceModelFormatNotSupported(_))
        );
    }

    #[test]
    fn input_format_by_extension() {
        assert_eq!(InputFormat::detect(Utf8Path::new("a/b.multi")).unwrap(), InputFormat::Multi);
        assert_matches!(
            InputFormat::detect(Utf8Path::new("a/b.csv")),
            Err(AnalysisError::SourceModelFormatNotSupported(_))
        );
    }
}
