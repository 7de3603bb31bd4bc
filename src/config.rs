//! Compiler configuration.
//!
//! Builder-style options controlling register allocation fidelity and how
//! pipeline stages react to diagnostics. Also loadable from a TOML file, the
//! same way the teacher's lint configuration is.

use serde::{Deserialize, Serialize};

/// Which register ranges the code generator draws from for general-purpose
/// work versus array-index offsets.
///
/// `Disjoint` keeps the two pools non-overlapping (`r1..r8` general,
/// `r9..r12` offset); `Overlapping` reproduces the original toolchain's
/// layout, where the general pool reaches up to `r9` and so shares that
/// register with the offset pool. `Overlapping` exists for users who want
/// bug-for-bug fidelity with that tool's emitted assembly; `Disjoint` is
/// the safer default since it can never hand out the same register twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterPoolPolicy {
    #[default]
    Disjoint,
    Overlapping,
}

/// Configuration for one compilation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Register pool layout used by the code generator.
    pub register_pool_policy: RegisterPoolPolicy,

    /// Stop after the first pass that reports an error instead of running
    /// every remaining pass. Off by default so a single run surfaces as
    /// many diagnostics as possible.
    pub stop_on_error: bool,

    /// Emit a `% ...` comment above the instructions generated for each
    /// source statement. On by default; the emitted assembly is meant to be
    /// read, not just assembled.
    pub emit_comments: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            register_pool_policy: RegisterPoolPolicy::default(),
            stop_on_error: false,
            emit_comments: true,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_register_pool_policy(mut self, policy: RegisterPoolPolicy) -> Self {
        self.register_pool_policy = policy;
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_comments(mut self, emit: bool) -> Self {
        self.emit_comments = emit;
        self
    }

    /// Parses a config from TOML text, e.g. loaded from a `toyc.toml` file.
    /// Unset fields fall back to [`CompilerConfig::default`].
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("failed to parse config: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_disjoint() {
        let config = CompilerConfig::new();
        assert_eq!(config.register_pool_policy, RegisterPoolPolicy::Disjoint);
        assert!(!config.stop_on_error);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = CompilerConfig::new()
            .with_register_pool_policy(RegisterPoolPolicy::Overlapping)
            .with_stop_on_error(true)
            .with_comments(false);
        assert_eq!(config.register_pool_policy, RegisterPoolPolicy::Overlapping);
        assert!(config.stop_on_error);
        assert!(!config.emit_comments);
    }

    #[test]
    fn from_toml_fills_in_defaults_for_missing_fields() {
        let config = CompilerConfig::from_toml("stop_on_error = true\n").unwrap();
        assert!(config.stop_on_error);
        assert_eq!(config.register_pool_policy, RegisterPoolPolicy::Disjoint);
        assert!(config.emit_comments);
    }

    #[test]
    fn from_toml_rejects_malformed_input() {
        assert!(CompilerConfig::from_toml("stop_on_error = not_a_bool").is_err());
    }
}
