//! Centralized environment variable registry.
//!
//! Two families of variables exist:
//! - the step script contract (`INPUT_<name>`, `MATCH_<group>`, `OUTPUT`)
//! - configuration overrides, using the `GUIDED_SETUP_` prefix with `__`
//!   separating nested config paths (e.g. `GUIDED_SETUP_PATHS__STATE_FILE`)
//!
//! The registry is printed by the `env` command.

/// Prefix of declared input variables, both for predefined values in the
/// engine's environment and for the values handed to step scripts
pub const INPUT_PREFIX: &str = "INPUT_";

/// Prefix of named pattern captures handed to step scripts
pub const MATCH_PREFIX: &str = "MATCH_";

/// Path of the scratch file a step script writes `KEY=VALUE` lines to
pub const OUTPUT_VAR: &str = "OUTPUT";

/// Prefix of configuration override variables
pub const CONFIG_PREFIX: &str = "GUIDED_SETUP";

/// An environment variable definition
#[derive(Debug, Clone)]
pub struct EnvVar {
    /// Environment variable name, `<name>` marks a placeholder
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Category for grouping
    pub category: EnvVarCategory,
    /// Default value if not set
    pub default: Option<&'static str>,
    /// Example value
    pub example: Option<&'static str>,
}

/// Categories for organizing environment variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvVarCategory {
    /// Variables handed to every step script
    StepScript,
    /// File path configuration
    Paths,
    /// Step execution settings
    Execution,
    /// Logging configuration
    Logging,
    /// Documentation rendering
    Render,
}

impl EnvVarCategory {
    /// Display name for this category
    pub fn display_name(&self) -> &'static str {
        match self {
            EnvVarCategory::StepScript => "Step scripts",
            EnvVarCategory::Paths => "Paths",
            EnvVarCategory::Execution => "Execution",
            EnvVarCategory::Logging => "Logging",
            EnvVarCategory::Render => "Render",
        }
    }

    /// All categories in display order
    pub fn all() -> &'static [EnvVarCategory] {
        &[
            EnvVarCategory::StepScript,
            EnvVarCategory::Paths,
            EnvVarCategory::Execution,
            EnvVarCategory::Logging,
            EnvVarCategory::Render,
        ]
    }
}

/// Static registry of all documented environment variables
pub static ENV_VARS: &[EnvVar] = &[
    // === Step scripts ===
    EnvVar {
        name: "INPUT_<name>",
        description: "Value of a declared step input. Set in guided-setup's own environment to pre-answer the input",
        category: EnvVarCategory::StepScript,
        default: None,
        example: Some("INPUT_region=eu1"),
    },
    EnvVar {
        name: "MATCH_<group>",
        description: "Value of a named capture group of the step pattern",
        category: EnvVarCategory::StepScript,
        default: None,
        example: Some("MATCH_cluster=prod"),
    },
    EnvVar {
        name: "OUTPUT",
        description: "Absolute path of the file the step writes KEY=VALUE output lines to",
        category: EnvVarCategory::StepScript,
        default: None,
        example: Some("/tmp/outputs-a1b2c3/outputs.env"),
    },
    // === Paths ===
    EnvVar {
        name: "GUIDED_SETUP_PATHS__STATE_FILE",
        description: "State document recording position and outputs",
        category: EnvVarCategory::Paths,
        default: Some(".guided-setup-state.json"),
        example: Some("/var/lib/setup/state.json"),
    },
    EnvVar {
        name: "GUIDED_SETUP_PATHS__RCFILE",
        description: "Shell file sourced before every step script when readable",
        category: EnvVarCategory::Paths,
        default: Some("~/.guided-setup/rc"),
        example: Some("./setup.rc"),
    },
    EnvVar {
        name: "GUIDED_SETUP_PATHS__SCRATCH_DIR",
        description: "Directory holding per-step output scratch directories",
        category: EnvVarCategory::Paths,
        default: None,
        example: Some("/tmp"),
    },
    // === Execution ===
    EnvVar {
        name: "GUIDED_SETUP_EXECUTION__SHELL",
        description: "Shell invoked with -c to run step scripts",
        category: EnvVarCategory::Execution,
        default: Some("sh"),
        example: Some("bash"),
    },
    // === Logging ===
    EnvVar {
        name: "GUIDED_SETUP_LOGGING__LEVEL",
        description: "Log level (trace, debug, info, warn, error)",
        category: EnvVarCategory::Logging,
        default: Some("info"),
        example: Some("debug"),
    },
    EnvVar {
        name: "GUIDED_SETUP_LOGGING__TO_FILE",
        description: "Write the run log to a file instead of stderr",
        category: EnvVarCategory::Logging,
        default: Some("true"),
        example: Some("false"),
    },
    EnvVar {
        name: "GUIDED_SETUP_LOGGING__FILE",
        description: "Run log file, appended to",
        category: EnvVarCategory::Logging,
        default: Some("guided-setup.log"),
        example: Some("setup-audit.log"),
    },
    // === Render ===
    EnvVar {
        name: "GUIDED_SETUP_RENDER__FORMAT",
        description: "Default documentation format (asciidoc, markdown)",
        category: EnvVarCategory::Render,
        default: Some("asciidoc"),
        example: Some("markdown"),
    },
    EnvVar {
        name: "GUIDED_SETUP_RENDER__TITLE",
        description: "Default document title",
        category: EnvVarCategory::Render,
        default: Some("Workflow"),
        example: Some("Cluster Setup"),
    },
];

/// Get all environment variables for a given category
pub fn env_vars_for_category(category: EnvVarCategory) -> impl Iterator<Item = &'static EnvVar> {
    ENV_VARS.iter().filter(move |v| v.category == category)
}

/// Get environment variables grouped by category
pub fn env_vars_by_category() -> Vec<(EnvVarCategory, Vec<&'static EnvVar>)> {
    EnvVarCategory::all()
        .iter()
        .map(|cat| {
            let vars: Vec<&EnvVar> = env_vars_for_category(*cat).collect();
            (*cat, vars)
        })
        .filter(|(_, vars)| !vars.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_env_vars_have_descriptions() {
        for var in ENV_VARS {
            assert!(
                !var.description.is_empty(),
                "EnvVar {} has empty description",
                var.name
            );
        }
    }

    #[test]
    fn test_config_vars_have_prefix() {
        for var in env_vars_by_category()
            .into_iter()
            .filter(|(cat, _)| *cat != EnvVarCategory::StepScript)
            .flat_map(|(_, vars)| vars)
        {
            assert!(
                var.name.starts_with(&format!("{}_", CONFIG_PREFIX)),
                "EnvVar {} does not have {} prefix",
                var.name,
                CONFIG_PREFIX
            );
        }
    }

    #[test]
    fn test_step_script_contract_documented() {
        let names: Vec<&str> = env_vars_for_category(EnvVarCategory::StepScript)
            .map(|v| v.name)
            .collect();
        assert!(names.iter().any(|n| n.starts_with(INPUT_PREFIX)));
        assert!(names.iter().any(|n| n.starts_with(MATCH_PREFIX)));
        assert!(names.contains(&OUTPUT_VAR));
    }

    #[test]
    fn test_every_category_has_vars() {
        assert_eq!(env_vars_by_category().len(), EnvVarCategory::all().len());
    }
}
