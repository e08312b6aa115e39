/// Explicit check registration
///
/// Checks are appended to a [`CheckSuite`] in declaration order; that order
/// is also the execution order.
use std::collections::HashSet;

use crate::config::types::{CheckError, HarnessError, Result};
use crate::pipeline::context::CheckContext;
use crate::verdict::outcome::Outcome;

/// Body of a check. Assertion failures travel through `CheckError::Failed`.
pub type CheckBody = Box<dyn Fn(&mut CheckContext) -> std::result::Result<Outcome, CheckError>>;

/// Static description of one check. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub depends_on: Option<String>,
    /// Position in declaration order
    pub ordinal: usize,
    /// Run spawned programs under the memory checker
    pub leak_check: bool,
}

pub struct RegisteredCheck {
    pub descriptor: CheckDescriptor,
    pub(crate) body: CheckBody,
}

impl std::fmt::Debug for RegisteredCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RegisteredCheck")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Names double as staging directory names
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Ordered set of checks
#[derive(Debug, Default)]
pub struct CheckSuite {
    checks: Vec<RegisteredCheck>,
}

/// Builder for the check just registered
pub struct CheckBuilder<'a> {
    descriptor: &'a mut CheckDescriptor,
}

impl CheckBuilder<'_> {
    /// Run only when `name` passed; start from its staging directory
    pub fn depends_on(self, name: &str) -> Self {
        self.descriptor.depends_on = Some(name.to_string());
        self
    }

    pub fn description(self, text: &str) -> Self {
        self.descriptor.description = Some(text.to_string());
        self
    }

    pub fn leak_check(self) -> Self {
        self.descriptor.leak_check = true;
        self
    }
}

impl CheckSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check. Declaration order is execution order.
    pub fn check<F>(&mut self, name: &str, body: F) -> CheckBuilder<'_>
    where
        F: Fn(&mut CheckContext) -> std::result::Result<Outcome, CheckError> + 'static,
    {
        let ordinal = self.checks.len();
        self.checks.push(RegisteredCheck {
            descriptor: CheckDescriptor {
                name: name.to_string(),
                description: None,
                depends_on: None,
                ordinal,
                leak_check: false,
            },
            body: Box::new(body),
        });
        CheckBuilder {
            descriptor: &mut self.checks[ordinal].descriptor,
        }
    }

    pub fn checks(&self) -> &[RegisteredCheck] {
        &self.checks
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CheckDescriptor> {
        self.checks.iter().map(|c| &c.descriptor)
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors().map(|d| d.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&CheckDescriptor> {
        self.descriptors().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn needs_memcheck(&self) -> bool {
        self.descriptors().any(|d| d.leak_check)
    }

    /// Names unique and filesystem-safe, dependencies registered.
    /// A dependency declared later than its dependent is allowed; it has no
    /// result yet when the dependent runs, so the dependent is skipped.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for d in self.descriptors() {
            if !is_valid_name(&d.name) {
                return Err(HarnessError::Suite(format!(
                    "check name '{}' must start with a letter or digit and contain only letters, digits, '_' or '-'",
                    d.name
                )));
            }
            if !seen.insert(d.name.as_str()) {
                return Err(HarnessError::Suite(format!("duplicate check '{}'", d.name)));
            }
        }
        for d in self.descriptors() {
            if let Some(dep) = &d.depends_on {
                if dep == &d.name {
                    return Err(HarnessError::Suite(format!(
                        "check '{}' depends on itself",
                        d.name
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(HarnessError::Suite(format!(
                        "check '{}' depends on unknown check '{}'",
                        d.name, dep
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(_: &mut CheckContext) -> std::result::Result<Outcome, CheckError> {
        Ok(Outcome::Pass)
    }

    #[test]
    fn test_registration_order_and_builder() {
        let mut suite = CheckSuite::new();
        suite.check("exists", pass).description("hello.c exists");
        suite.check("compiles", pass).depends_on("exists");
        suite.check("runs", pass).depends_on("compiles").leak_check();

        assert_eq!(suite.names(), vec!["exists", "compiles", "runs"]);
        let runs = suite.get("runs").unwrap();
        assert_eq!(runs.ordinal, 2);
        assert_eq!(runs.depends_on.as_deref(), Some("compiles"));
        assert!(runs.leak_check);
        assert!(suite.needs_memcheck());
        assert_eq!(
            suite.get("exists").unwrap().description.as_deref(),
            Some("hello.c exists")
        );
        assert!(suite.validate().is_ok());
    }

    #[test]
    fn test_name_rules() {
        assert!(is_valid_name("compiles"));
        assert!(is_valid_name("handles_0-cents"));
        assert!(!is_valid_name("_"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("../escape"));
        assert!(!is_valid_name("two words"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut suite = CheckSuite::new();
        suite.check("exists", pass);
        suite.check("exists", pass);
        let err = suite.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate check 'exists'"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut suite = CheckSuite::new();
        suite.check("compiles", pass).depends_on("exists");
        assert!(matches!(suite.validate(), Err(HarnessError::Suite(_))));
    }

    #[test]
    fn test_forward_dependency_allowed() {
        let mut suite = CheckSuite::new();
        suite.check("runs", pass).depends_on("compiles");
        suite.check("compiles", pass);
        assert!(suite.validate().is_ok());
    }
}
