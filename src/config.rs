//! Tool configuration and stack file loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use topology::{Properties, ResourceKind, Stack, StackContext, Value};

use crate::paths;

/// Stack file looked up in the working directory when `--file` is not given
pub const DEFAULT_STACK_FILE: &str = "stackplan.toml";

/// Stage used when neither the CLI, the stack file nor the config names one
pub const DEFAULT_STAGE: &str = "dev";

// ============================================================================
// Tool Config
// ============================================================================

/// User-level settings from `config.toml` in the config directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Stage used when the stack file does not set one
    #[serde(default)]
    pub default_stage: Option<String>,

    /// Default number of parallel jobs per wave
    #[serde(default)]
    pub jobs: Option<usize>,

    /// State directory override (`~` and env vars expanded)
    #[serde(default)]
    pub state_dir: Option<String>,

    /// Stack file used when `--file` is not given
    #[serde(default)]
    pub stack_file: Option<String>,
}

impl ToolConfig {
    /// Load `config.toml`, or defaults if it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_dir()?.join("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No tool config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded tool config from {}", path.display());
        Ok(config)
    }

    /// Resolve the stack file path
    pub fn stack_file(&self, cli: Option<&Path>) -> PathBuf {
        match (cli, &self.stack_file) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(configured)) => paths::expand(configured),
            (None, None) => PathBuf::from(DEFAULT_STACK_FILE),
        }
    }

    /// Resolve the state directory
    pub fn state_dir(&self, cli: Option<&Path>) -> Result<PathBuf> {
        match (cli, &self.state_dir) {
            (Some(path), _) => Ok(path.to_path_buf()),
            (None, Some(configured)) => Ok(paths::expand(configured)),
            (None, None) => paths::state_dir(),
        }
    }
}

// ============================================================================
// Stack File
// ============================================================================

/// `[stack]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSection {
    pub name: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// One `[[resources]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// `[provider]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// In-process provider that fabricates deterministic attributes
    #[default]
    Local,
    /// External driver speaking JSON over stdin/stdout
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// A declarative stack file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFile {
    pub stack: StackSection,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl StackFile {
    /// Load a stack file; `.json` is parsed as JSON, anything else as TOML
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read stack file: {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };
        let file: Self = parsed
            .map_err(|e| {
                topology::Error::InvalidDeclaration(format!("{}: {e}", path.display()))
            })
            .with_context(|| format!("Failed to parse stack file: {}", path.display()))?;

        log::debug!(
            "Loaded stack file {} ({} resources)",
            path.display(),
            file.resources.len()
        );
        Ok(file)
    }

    /// Stage after applying CLI and config overrides
    pub fn stage(&self, cli: Option<&str>, config: &ToolConfig) -> String {
        cli.map(str::to_string)
            .or_else(|| self.stack.stage.clone())
            .or_else(|| config.default_stage.clone())
            .unwrap_or_else(|| DEFAULT_STAGE.to_string())
    }

    pub fn context(&self, stage: &str) -> StackContext {
        let mut context = StackContext::new(&self.stack.name, stage);
        context.account = self.stack.account.clone();
        context.region = self.stack.region.clone();
        context.tags = self.stack.tags.clone();
        context
    }

    /// Declare every resource into a new stack.
    ///
    /// Fails on the first duplicate or invalid logical id.
    pub fn to_stack(&self, stage: &str) -> Result<Stack> {
        let mut stack = Stack::new(self.context(stage));

        for decl in &self.resources {
            let node = stack.declare(decl.kind, &decl.id, decl.properties.clone())?;
            for dep in &decl.depends_on {
                node.depends_on(dep.as_str());
            }
            for (key, value) in &decl.tags {
                node.tag(key.as_str(), value.as_str());
            }
        }

        for (name, value) in &self.outputs {
            stack.output(name.as_str(), value.clone());
        }

        Ok(stack)
    }
}
