use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::app::{BkgResult, ProgressEvent, ProgressSink};
use crate::source::Source;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Files produced by one orchestration call.
#[derive(Debug, Clone, Serialize)]
pub struct ProductsResult {
    pub operation: String,
    pub products: Vec<Utf8PathBuf>,
}

impl ProductsResult {
    pub fn new(operation: &str, products: Vec<Utf8PathBuf>) -> Self {
        Self {
            operation: operation.to_string(),
            products,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourcesResult {
    pub count: usize,
    pub sources: Vec<Source>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_products(result: &ProductsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_bkg(result: &BkgResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_sources(sources: Vec<Source>) -> io::Result<()> {
        Self::print_json(&SourcesResult {
            count: sources.len(),
            sources,
        })
    }

    pub fn print_config(config: &serde_json::Value) -> io::Result<()> {
        Self::print_json(config)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr for interactive runs.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let mut stderr = io::stderr().lock();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(stderr, "{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => writeln!(stderr, "{}", event.message),
        };
    }
}
