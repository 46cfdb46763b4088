//! Batch manifests: the documents a `run` processes.
//!
//! A manifest is a JSON, YAML or TOML file with a `documents` list:
//!
//! ```yaml
//! name: quarterly-reports
//! documents:
//!   - id: q1-report
//!     name: Q1 report.pdf
//!     size_bytes: 482113
//!     work_ms: 300
//!   - id: scan-07
//!     name: scan-07.tiff
//!     failures: 2
//! ```

use batchflow_core::jobs::{JobDescriptor, PriorityKey};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported manifest extension '{0}' (expected json, yaml, yml or toml)")]
    UnsupportedFormat(String),

    #[error("failed to parse {format} manifest: {message}")]
    Parse { format: ManifestFormat, message: String },

    #[error("manifest contains no documents")]
    Empty,

    #[error("duplicate document id '{0}'")]
    DuplicateId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
    Toml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(ManifestError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "JSON"),
            Self::Yaml => write!(f, "YAML"),
            Self::Toml => write!(f, "TOML"),
        }
    }
}

/// One document to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Display name; defaults to the id
    #[serde(default)]
    pub name: Option<String>,
    /// Document kind; defaults to the name's extension
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    /// Simulated processing time per attempt
    #[serde(default = "default_work_ms")]
    pub work_ms: u64,
    /// Number of attempts that fail before one succeeds
    #[serde(default)]
    pub failures: u32,
    /// Failures are permanent rather than transient
    #[serde(default)]
    pub fatal: bool,
    /// Never finishes on its own
    #[serde(default)]
    pub hang: bool,
}

fn default_work_ms() -> u64 {
    100
}

impl Document {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn kind(&self) -> String {
        if let Some(kind) = &self.kind {
            return kind.to_ascii_lowercase();
        }
        Path::new(self.display_name())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn work(&self) -> Duration {
        Duration::from_millis(self.work_ms)
    }

    /// Build the job descriptor, keyed for the chosen ordering.
    pub fn descriptor(&self, ordering: Ordering) -> JobDescriptor<Document> {
        let priority = match ordering {
            Ordering::Fifo => PriorityKey::Unset,
            Ordering::SmallestFirst | Ordering::LargestFirst => PriorityKey::from(self.size_bytes),
            Ordering::ByKind => PriorityKey::from(self.kind()),
        };
        JobDescriptor::new(self.clone())
            .with_id(self.id.as_str())
            .with_priority(priority)
    }
}

/// Admission order for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Ordering {
    /// Manifest order
    Fifo,
    /// Smallest `size_bytes` first
    SmallestFirst,
    /// Largest `size_bytes` first
    LargestFirst,
    /// Grouped by document kind
    ByKind,
}

impl Ordering {
    pub fn policy(self) -> batchflow_core::jobs::OrderingPolicy {
        use batchflow_core::jobs::OrderingPolicy;
        match self {
            Self::Fifo => OrderingPolicy::Fifo,
            Self::SmallestFirst | Self::ByKind => OrderingPolicy::Ascending,
            Self::LargestFirst => OrderingPolicy::Descending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    pub documents: Vec<Document>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let format = ManifestFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, format)
    }

    pub fn parse(content: &str, format: ManifestFormat) -> Result<Self, ManifestError> {
        let parse_error = |message: String| ManifestError::Parse { format, message };
        let manifest: Manifest = match format {
            ManifestFormat::Json => {
                serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?
            }
            ManifestFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?
            }
            ManifestFormat::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.documents.is_empty() {
            return Err(ManifestError::Empty);
        }
        let mut seen = HashSet::new();
        for document in &self.documents {
            if !seen.insert(document.id.as_str()) {
                return Err(ManifestError::DuplicateId(document.id.clone()));
            }
        }
        Ok(())
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }
}
