//! Pipeline options: the ordered option map handed to a pipeline process,
//! the layered merge that produces it, and its rendering into `--key=value`
//! command-line flags.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ImpersonationChain;

pub const LABELS_KEY: &str = "labels";
pub const VERSION_LABEL_KEY: &str = "beamrun-version";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Rendered as a presence-only flag.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        OptionValue::List(value)
    }
}

/// How nested maps (in practice only `labels`) are passed on the command
/// line. The Python SDK takes one flag per entry, Java and Go take a JSON
/// object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapFormat {
    Repeated,
    Json,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineOptions(IndexMap<String, OptionValue>);

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    /// Key-by-key overwrite: entries of `other` replace entries of `self`.
    pub fn extend_from(&mut self, other: &PipelineOptions) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Adds `labels` to the existing `labels` map instead of replacing it.
    pub fn merge_labels(&mut self, labels: &IndexMap<String, String>) {
        match self.0.get_mut(LABELS_KEY) {
            Some(OptionValue::Map(existing)) => {
                for (key, value) in labels {
                    existing.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                warn!("replacing non-map labels option {other:?}");
                self.0
                    .insert(LABELS_KEY.to_string(), OptionValue::Map(labels.clone()));
            }
            None => {
                self.0
                    .insert(LABELS_KEY.to_string(), OptionValue::Map(labels.clone()));
            }
        }
    }

    pub fn stamp_version_label(&mut self) {
        let mut labels = IndexMap::new();
        labels.insert(VERSION_LABEL_KEY.to_string(), version_label_value());
        self.merge_labels(&labels);
    }

    /// Rewrites every key from camelCase to snake_case. Values are kept as
    /// they are. Two keys that normalise to the same name collapse into one,
    /// the later entry winning.
    pub fn to_snake_case(&self) -> PipelineOptions {
        let mut out = IndexMap::with_capacity(self.0.len());
        for (key, value) in self.0.iter() {
            out.insert(camel_to_snake(key), value.clone());
        }
        PipelineOptions(out)
    }

    pub fn to_args(&self, map_format: MapFormat) -> Vec<String> {
        let mut args = Vec::with_capacity(self.0.len());
        for (key, value) in self.0.iter() {
            match value {
                OptionValue::Null | OptionValue::Bool(true) => args.push(format!("--{key}")),
                OptionValue::Bool(false) => {}
                OptionValue::Int(value) => args.push(format!("--{key}={value}")),
                OptionValue::Float(value) => args.push(format!("--{key}={value}")),
                OptionValue::Text(value) => args.push(format!("--{key}={value}")),
                OptionValue::List(values) => {
                    args.extend(values.iter().map(|value| format!("--{key}={value}")));
                }
                OptionValue::Map(entries) => match map_format {
                    MapFormat::Repeated => {
                        args.extend(
                            entries
                                .iter()
                                .map(|(name, value)| format!("--{key}={name}={value}")),
                        );
                    }
                    MapFormat::Json => {
                        let encoded = serde_json::to_string(entries).unwrap_or_default();
                        args.push(format!("--{key}={encoded}"));
                    }
                },
            }
        }
        args
    }
}

impl FromIterator<(String, OptionValue)> for PipelineOptions {
    fn from_iter<I: IntoIterator<Item = (String, OptionValue)>>(iter: I) -> Self {
        PipelineOptions(iter.into_iter().collect())
    }
}

/// Keys the managed remote engine requires, injected between the defaults
/// and the user overrides.
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    pub job_name: String,
    pub service_account: Option<String>,
    pub impersonation_chain: Option<ImpersonationChain>,
    pub supports_impersonation: bool,
    pub project_id: Option<String>,
    pub region: Option<String>,
}

impl EngineOptions {
    fn apply(&self, options: &mut PipelineOptions, job_name_key: Option<&str>) {
        if let Some(key) = job_name_key {
            options.insert(key, self.job_name.clone());
        }
        if let Some(account) = self.service_account.as_deref() {
            options.insert("serviceAccount", account);
        }
        if self.supports_impersonation {
            if let Some(chain) = self.impersonation_chain.as_ref() {
                options.insert("impersonateServiceAccount", chain.joined());
            }
        }
        if let Some(project) = self.project_id.as_deref() {
            options.insert("project", project);
        }
        if let Some(region) = self.region.as_deref() {
            options.insert("region", region);
        }
        options.stamp_version_label();
    }
}

/// Builds the final option set. Order is fixed: defaults, then the engine
/// keys (when launching on the managed engine), then the user overrides.
pub fn merge(
    defaults: &PipelineOptions,
    engine: Option<&EngineOptions>,
    overrides: &PipelineOptions,
    job_name_key: Option<&str>,
) -> PipelineOptions {
    let mut merged = defaults.clone();
    if let Some(engine) = engine {
        engine.apply(&mut merged, job_name_key);
    }
    merged.extend_from(overrides);
    merged
}

pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (idx, ch) in key.chars().enumerate() {
        if idx > 0 && ch.is_ascii_uppercase() {
            out.push('_');
        }
        out.push(ch);
    }
    out.to_lowercase()
}

pub fn version_label_value() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION").replace(['.', '+'], "-"))
}
