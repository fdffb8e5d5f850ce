//! lint policy
//!
//! [Policy] is the user facing (serde) configuration. Before linting it is checked and compiled into a
//! [CompiledPolicy] which holds the matcher for the exclude globs.
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Policy {
    /// canonical paths that must exist in the value tree
    pub required_vars: BTreeSet<String>,
    /// function names that must not be called
    pub disallow_functions: BTreeSet<String>,
    /// references matching any of these globs are never reported as undefined
    pub exclude_globs: Vec<String>,
    /// report undefined references as errors instead of warnings
    pub undefined_check_enabled: bool,
    /// warnings fail the run
    pub fail_on_warn: bool,
    /// same as `undefinedCheckEnabled`
    pub strict: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse policy {origin}")]
    Parse {
        origin: String,
        #[source]
        error: serde_yaml::Error,
    },

    #[error("Invalid exclude glob `{glob}`")]
    InvalidGlob {
        glob: String,
        #[source]
        error: globset::Error,
    },

    #[error("Required variable must not be empty")]
    EmptyRequiredPath,
}

impl Policy {
    pub fn from_yaml(text: &str, origin: &str) -> Result<Self, PolicyError> {
        // an empty document is the default policy
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|error| PolicyError::Parse {
            origin: origin.to_string(),
            error,
        })
    }

    pub fn load_file(path: &Path) -> Result<Self, PolicyError> {
        tracing::info!(path=%path.display(), "loading policy");
        let text = std::fs::read_to_string(path).map_err(|error| PolicyError::Io {
            path: path.to_owned(),
            error,
        })?;
        Self::from_yaml(&text, &path.display().to_string())
    }

    /// Layer `other` on top: sets are joined, switches stay on once on
    pub fn merge(&mut self, other: Policy) {
        self.required_vars.extend(other.required_vars);
        self.disallow_functions.extend(other.disallow_functions);
        self.exclude_globs.extend(other.exclude_globs);
        self.undefined_check_enabled |= other.undefined_check_enabled;
        self.fail_on_warn |= other.fail_on_warn;
        self.strict |= other.strict;
    }

    pub fn compile(self) -> Result<CompiledPolicy, PolicyError> {
        if self.required_vars.iter().any(|path| path.trim().is_empty()) {
            return Err(PolicyError::EmptyRequiredPath);
        }

        let mut builder = GlobSetBuilder::new();
        for glob in &self.exclude_globs {
            let compiled = Glob::new(glob).map_err(|error| PolicyError::InvalidGlob {
                glob: glob.clone(),
                error,
            })?;
            builder.add(compiled);
        }
        let excludes = builder.build().map_err(|error| PolicyError::InvalidGlob {
            glob: self.exclude_globs.join(","),
            error,
        })?;

        Ok(CompiledPolicy {
            policy: self,
            excludes,
        })
    }
}

/// A validated [Policy], immutable for the run
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    policy: Policy,
    excludes: GlobSet,
}

impl Default for CompiledPolicy {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            excludes: GlobSet::empty(),
        }
    }
}

impl CompiledPolicy {
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excludes.is_match(path)
    }

    pub fn is_disallowed(&self, function: &str) -> bool {
        self.policy.disallow_functions.contains(function)
    }

    /// undefined references are errors
    pub fn undefined_is_error(&self) -> bool {
        self.policy.undefined_check_enabled || self.policy.strict
    }

    pub fn fail_on_warn(&self) -> bool {
        self.policy.fail_on_warn
    }

    pub fn required_vars(&self) -> impl Iterator<Item = &str> {
        self.policy.required_vars.iter().map(String::as_str)
    }
}
