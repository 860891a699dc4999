use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::bins::FovBin;
use crate::config::ConfigStore;
use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Required,
    Optional,
}

/// A file a tool is expected to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub key: String,
    pub path: Utf8PathBuf,
    pub kind: ProductKind,
}

impl Product {
    pub fn required(key: impl Into<String>, path: Utf8PathBuf) -> Self {
        Self {
            key: key.into(),
            path,
            kind: ProductKind::Required,
        }
    }

    pub fn optional(key: impl Into<String>, path: Utf8PathBuf) -> Self {
        Self {
            key: key.into(),
            path,
            kind: ProductKind::Optional,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub products: Vec<Product>,
    pub cwd: Option<Utf8PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            products: Vec::new(),
            cwd: None,
        }
    }

    /// Appends a `key=value` argument.
    pub fn arg(mut self, key: &str, value: impl ToString) -> Self {
        self.args.push(format!("{key}={}", value.to_string()));
        self
    }

    pub fn product(mut self, product: Product) -> Self {
        self.products.push(product);
        self
    }

    pub fn cwd(mut self, dir: &Utf8Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }
}

/// Per-invocation values that do not live in the configuration.
#[derive(Debug, Clone, Default)]
pub struct ToolParams {
    pub workdir: Utf8PathBuf,
    pub prefix: String,
    pub energy: Option<(f64, f64)>,
    pub fov: Option<FovBin>,
    /// Products of earlier tools, keyed by product key.
    pub inputs: BTreeMap<String, Utf8PathBuf>,
}

impl ToolParams {
    pub fn new(workdir: &Utf8Path, prefix: impl Into<String>) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// `<workdir>/<prefix><suffix>`
    pub fn output(&self, suffix: &str) -> Utf8PathBuf {
        self.workdir.join(format!("{}{suffix}", self.prefix))
    }

    pub fn input(&self, tool: &str, key: &str) -> Result<&Utf8Path, AnalysisError> {
        self.inputs
            .get(key)
            .map(Utf8PathBuf::as_path)
            .ok_or_else(|| AnalysisError::ScienceToolInputArgMissing {
                tool: tool.to_string(),
                missing: vec![key.to_string()],
            })
    }
}

/// One external science executable: which options it needs and how its
/// command line is built.
pub trait ScienceTool {
    fn name(&self) -> &'static str;

    /// Options that must be present and non-null before the tool can run.
    fn required_options(&self) -> &'static [&'static str];

    fn build(&self, config: &ConfigStore, params: &ToolParams)
        -> Result<ToolCommand, AnalysisError>;
}

pub fn all_required_options_set(tool: &dyn ScienceTool, config: &ConfigStore) -> bool {
    tool.required_options()
        .iter()
        .all(|name| config.is_set(name))
}

pub fn configure(
    tool: &dyn ScienceTool,
    config: &ConfigStore,
    params: &ToolParams,
) -> Result<ConfiguredTool, AnalysisError> {
    let missing: Vec<String> = tool
        .required_options()
        .iter()
        .filter(|name| !config.is_set(name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AnalysisError::ScienceToolInputArgMissing {
            tool: tool.name().to_string(),
            missing,
        });
    }
    Ok(ConfiguredTool {
        name: tool.name(),
        command: tool.build(config, params)?,
    })
}

#[derive(Debug, Clone)]
pub struct ConfiguredTool {
    name: &'static str,
    command: ToolCommand,
}

impl ConfiguredTool {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn command(&self) -> &ToolCommand {
        &self.command
    }

    pub fn product(&self, key: &str) -> Option<&Utf8Path> {
        self.command
            .products
            .iter()
            .find(|product| product.key == key)
            .map(|product| product.path.as_path())
    }

    /// Runs the tool and returns the products present on disk.
    pub fn invoke(&self, runner: &dyn ToolRunner) -> Result<Vec<Utf8PathBuf>, AnalysisError> {
        info!(tool = self.name, args = self.command.args.len(), "running science tool");
        let exit = runner.run(&self.command)?;
        if exit.code != 0 {
            return Err(AnalysisError::ScienceToolErrorCodeReturned {
                tool: self.name.to_string(),
                code: exit.code,
                message: exit.stderr,
            });
        }

        let mut produced = Vec::new();
        for product in &self.command.products {
            let exists = product.path.as_std_path().exists();
            match (product.kind, exists) {
                (_, true) => produced.push(product.path.clone()),
                (ProductKind::Required, false) => {
                    return Err(AnalysisError::ScienceToolProductNotFound {
                        tool: self.name.to_string(),
                        path: product.path.clone(),
                    });
                }
                (ProductKind::Optional, false) => {
                    debug!(tool = self.name, path = %product.path, "optional product not written");
                }
            }
        }
        Ok(produced)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExit {
    pub code: i32,
    pub stderr: String,
}

/// Executes a built command and blocks until it exits.
pub trait ToolRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolExit, AnalysisError>;
}

/// Runs tools found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolExit, AnalysisError> {
        let program = find_in_path(&command.program)
            .ok_or_else(|| AnalysisError::MissingTool(command.program.clone()))?;
        let mut cmd = Command::new(program);
        cmd.args(&command.args);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir.as_std_path());
        }
        let output = cmd
            .output()
            .map_err(|err| AnalysisError::Filesystem(format!("{}: {err}", command.program)))?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok(ToolExit {
            // Killed by a signal: no exit code.
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
