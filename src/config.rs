use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cli::Cli;
use crate::flow::DEFAULT_MAX_FLOWS;

fn empty_path_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<PathBuf>::deserialize(deserializer)?;
    Ok(opt.and_then(|path| {
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub flow: FlowConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load the file named by `--config` (or the defaults) and apply the
    /// remaining command-line flags on top.
    pub fn from_cli(args: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(args);
        Ok(config)
    }

    /// Command-line flags win over file values. Boolean flags can only
    /// switch their setting away from the default.
    pub fn apply_cli(&mut self, args: &Cli) {
        if let Some(value) = &args.trace {
            self.input.trace = if value.as_os_str() == "-" {
                None
            } else {
                Some(value.clone())
            };
        }
        if let Some(value) = args.max_flows {
            self.flow.max_flows = value;
        }
        if let Some(value) = &args.output_dir {
            self.output.directory = value.clone();
        }
        if let Some(value) = &args.export_json {
            self.output.export_json = Some(value.clone());
        }
        if let Some(value) = &args.export_csv {
            self.output.export_csv = Some(value.clone());
        }

        if args.all_flows {
            self.output.sf_only = false;
        }
        if args.no_series {
            self.output.series = false;
        }
        if args.echo {
            self.output.echo = true;
        }
        if args.quiet {
            self.output.quiet = true;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Trace file to read. `None` reads standard input.
    #[serde(deserialize_with = "empty_path_none")]
    pub trace: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Upper bound on distinct connections; one more is a fatal error.
    pub max_flows: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            max_flows: DEFAULT_MAX_FLOWS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the per-connection series files.
    pub directory: PathBuf,
    /// Write the series files at all.
    pub series: bool,
    /// Restrict the series files to SF connections that never reset.
    pub sf_only: bool,
    #[serde(deserialize_with = "empty_path_none")]
    pub export_json: Option<PathBuf>,
    #[serde(deserialize_with = "empty_path_none")]
    pub export_csv: Option<PathBuf>,
    /// Print every decoded event as it is ingested.
    pub echo: bool,
    pub quiet: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            directory: PathBuf::from("."),
            series: true,
            sf_only: true,
            export_json: None,
            export_csv: None,
            echo: false,
            quiet: false,
        }
    }
}
