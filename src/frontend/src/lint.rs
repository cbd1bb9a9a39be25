//! Lint warning collection.
//!
//! The rule engine proper is hosted outside this crate; the compiler only
//! needs to emit named, located warnings and honor the `check` parser
//! directive (`# check=skip=<Rules>;error=<bool>;experimental=<Rules>`).

use basalt_core::error::{FrontendError, Result};
use basalt_core::location::SourceRange;

/// Rules the compiler can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    StageNameCasing,
    FromAsCasing,
    MaintainerDeprecated,
    LegacyKeyValueFormat,
    UndefinedVar,
    WorkdirRelativePath,
    RedundantTargetPlatform,
    FromPlatformFlagConstDisallowed,
    ReservedStageName,
    MultipleInstructionsDisallowed,
    InvalidDefinitionDescription,
}

impl LintRule {
    pub fn name(&self) -> &'static str {
        match self {
            LintRule::StageNameCasing => "StageNameCasing",
            LintRule::FromAsCasing => "FromAsCasing",
            LintRule::MaintainerDeprecated => "MaintainerDeprecated",
            LintRule::LegacyKeyValueFormat => "LegacyKeyValueFormat",
            LintRule::UndefinedVar => "UndefinedVar",
            LintRule::WorkdirRelativePath => "WorkdirRelativePath",
            LintRule::RedundantTargetPlatform => "RedundantTargetPlatform",
            LintRule::FromPlatformFlagConstDisallowed => "FromPlatformFlagConstDisallowed",
            LintRule::ReservedStageName => "ReservedStageName",
            LintRule::MultipleInstructionsDisallowed => "MultipleInstructionsDisallowed",
            LintRule::InvalidDefinitionDescription => "InvalidDefinitionDescription",
        }
    }

    /// Experimental rules run only when named in `check=experimental=`.
    pub fn is_experimental(&self) -> bool {
        matches!(self, LintRule::InvalidDefinitionDescription)
    }
}

/// A single emitted warning.
#[derive(Debug, Clone)]
pub struct LintWarning {
    pub rule: LintRule,
    pub message: String,
    pub location: Option<SourceRange>,
}

/// Configuration carried by the `check` parser directive.
#[derive(Debug, Clone, Default)]
pub struct CheckConfig {
    pub skip_all: bool,
    pub skip: Vec<String>,
    pub error: bool,
    pub experimental_all: bool,
    pub experimental: Vec<String>,
}

impl CheckConfig {
    /// Parse the value of a `# check=` directive,
    /// e.g. `skip=StageNameCasing,FromAsCasing;error=true`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut config = CheckConfig::default();
        for field in value.split(';') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let (key, val) = field.split_once('=').ok_or_else(|| {
                FrontendError::parse(format!("invalid check directive field {:?}", field))
            })?;
            match key.trim() {
                "skip" => {
                    if val.trim() == "all" {
                        config.skip_all = true;
                    } else {
                        config.skip = val.split(',').map(|s| s.trim().to_string()).collect();
                    }
                }
                "error" => {
                    config.error = val.trim().parse().map_err(|_| {
                        FrontendError::parse(format!("invalid check error value {:?}", val))
                    })?;
                }
                "experimental" => {
                    if val.trim() == "all" {
                        config.experimental_all = true;
                    } else {
                        config.experimental =
                            val.split(',').map(|s| s.trim().to_string()).collect();
                    }
                }
                other => {
                    return Err(FrontendError::parse(format!(
                        "unknown check directive key {:?}",
                        other
                    )));
                }
            }
        }
        Ok(config)
    }

    /// Scan the leading comment block of a Dockerfile for a `check` directive.
    pub fn from_dockerfile(text: &str) -> Result<Self> {
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Some(comment) = trimmed.strip_prefix('#') else {
                break;
            };
            if let Some(value) = comment.trim().strip_prefix("check=") {
                return CheckConfig::parse(value);
            }
        }
        Ok(CheckConfig::default())
    }
}

/// Collects warnings during a compilation pass.
#[derive(Debug, Default)]
pub struct Linter {
    config: CheckConfig,
    warnings: Vec<LintWarning>,
}

impl Linter {
    pub fn new(config: CheckConfig) -> Self {
        Linter {
            config,
            warnings: Vec::new(),
        }
    }

    /// Record a warning, honoring skip and experimental gating.
    pub fn run(&mut self, rule: LintRule, location: Option<SourceRange>, message: impl Into<String>) {
        if self.config.skip_all || self.config.skip.iter().any(|s| s == rule.name()) {
            return;
        }
        if rule.is_experimental()
            && !self.config.experimental_all
            && !self.config.experimental.iter().any(|s| s == rule.name())
        {
            return;
        }
        self.warnings.push(LintWarning {
            rule,
            message: message.into(),
            location,
        });
    }

    pub fn warnings(&self) -> &[LintWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<LintWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// With `check=error=true`, accumulated warnings become a terminal error.
    pub fn enforce(&self) -> Result<()> {
        if self.config.error && !self.warnings.is_empty() {
            let names: Vec<&str> = self.warnings.iter().map(|w| w.rule.name()).collect();
            return Err(FrontendError::validation(format!(
                "lint warnings treated as errors: {}",
                names.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_warning() {
        let mut lint = Linter::default();
        lint.run(LintRule::StageNameCasing, None, "stage name not lowercase");
        assert_eq!(lint.warnings().len(), 1);
        assert_eq!(lint.warnings()[0].rule.name(), "StageNameCasing");
    }

    #[test]
    fn test_skip_list() {
        let config = CheckConfig::parse("skip=StageNameCasing").unwrap();
        let mut lint = Linter::new(config);
        lint.run(LintRule::StageNameCasing, None, "skipped");
        lint.run(LintRule::FromAsCasing, None, "kept");
        assert_eq!(lint.warnings().len(), 1);
    }

    #[test]
    fn test_skip_all() {
        let config = CheckConfig::parse("skip=all").unwrap();
        let mut lint = Linter::new(config);
        lint.run(LintRule::UndefinedVar, None, "skipped");
        assert!(lint.warnings().is_empty());
    }

    #[test]
    fn test_experimental_gated_by_default() {
        let mut lint = Linter::default();
        lint.run(LintRule::InvalidDefinitionDescription, None, "gated");
        assert!(lint.warnings().is_empty());

        let config = CheckConfig::parse("experimental=InvalidDefinitionDescription").unwrap();
        let mut lint = Linter::new(config);
        lint.run(LintRule::InvalidDefinitionDescription, None, "enabled");
        assert_eq!(lint.warnings().len(), 1);
    }

    #[test]
    fn test_error_escalation() {
        let config = CheckConfig::parse("error=true").unwrap();
        let mut lint = Linter::new(config);
        assert!(lint.enforce().is_ok());
        lint.run(LintRule::UndefinedVar, None, "boom");
        let err = lint.enforce().unwrap_err();
        assert!(err.to_string().contains("UndefinedVar"));
    }

    #[test]
    fn test_parse_combined_directive() {
        let config = CheckConfig::parse("skip=A,B;error=true").unwrap();
        assert_eq!(config.skip, vec!["A", "B"]);
        assert!(config.error);
    }

    #[test]
    fn test_parse_bad_directive() {
        assert!(CheckConfig::parse("bogus").is_err());
        assert!(CheckConfig::parse("error=maybe").is_err());
    }

    #[test]
    fn test_from_dockerfile_directive() {
        let config =
            CheckConfig::from_dockerfile("# syntax=example/front\n# check=error=true\nFROM x\n")
                .unwrap();
        assert!(config.error);

        // Directives after the first instruction are ignored.
        let config = CheckConfig::from_dockerfile("FROM x\n# check=error=true\n").unwrap();
        assert!(!config.error);
    }
}
