//! Pure fragment classifier.

use crate::{ApprovalError, CategorySpec, SecurityLevel};
use regex::Regex;
use std::collections::BTreeSet;

/// One compiled detector.
#[derive(Debug)]
struct Detector {
    pattern: Regex,
    unless_preceded_by: Option<Regex>,
}

impl Detector {
    /// True when `fragment` contains at least one non-guarded match.
    fn matches(&self, fragment: &str) -> bool {
        for m in self.pattern.find_iter(fragment) {
            let guarded = match &self.unless_preceded_by {
                Some(unless) => {
                    let prefix = &fragment[..m.start()];
                    unless.find_iter(prefix).any(|g| g.end() == prefix.len())
                }
                None => false,
            };
            if !guarded {
                return true;
            }
        }
        false
    }
}

/// One compiled category.
#[derive(Debug)]
pub struct CompiledCategory {
    pub id: String,
    pub description: String,
    pub level: SecurityLevel,
    detectors: Vec<Detector>,
}

/// A compiled category set, built once at startup from configuration.
#[derive(Debug)]
pub struct CategorySet {
    categories: Vec<CompiledCategory>,
}

impl CategorySet {
    /// Compile the configured specs, failing fast on a bad pattern.
    pub fn compile(specs: &[CategorySpec]) -> Result<Self, ApprovalError> {
        let mut categories = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut detectors = Vec::with_capacity(spec.patterns.len());
            for det in &spec.patterns {
                let pattern =
                    Regex::new(&det.pattern).map_err(|source| ApprovalError::BadPattern {
                        category: spec.id.clone(),
                        pattern: det.pattern.clone(),
                        source,
                    })?;
                let unless_preceded_by = det
                    .unless_preceded_by
                    .as_ref()
                    .map(|p| {
                        Regex::new(p).map_err(|source| ApprovalError::BadPattern {
                            category: spec.id.clone(),
                            pattern: p.clone(),
                            source,
                        })
                    })
                    .transpose()?;
                detectors.push(Detector {
                    pattern,
                    unless_preceded_by,
                });
            }
            categories.push(CompiledCategory {
                id: spec.id.clone(),
                description: spec.description.clone(),
                level: spec.level,
                detectors,
            });
        }
        Ok(Self { categories })
    }

    /// Pure matcher: which categories does this fragment trigger?
    pub fn classify(&self, fragment: &str) -> BTreeSet<String> {
        let mut matched = BTreeSet::new();
        for category in &self.categories {
            if category.detectors.iter().any(|d| d.matches(fragment)) {
                matched.insert(category.id.clone());
            }
        }
        matched
    }

    /// Look up a category by id.
    pub fn get(&self, id: &str) -> Option<&CompiledCategory> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// All category ids in configured order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_categories;

    fn set() -> CategorySet {
        CategorySet::compile(&default_categories()).unwrap()
    }

    #[test]
    fn test_clean_fragment_matches_nothing() {
        let matched = set().classify("fit <- lm(y ~ x, data = df)\nsummary(fit)");
        assert!(matched.is_empty());
    }

    #[test]
    fn test_write_pattern_matches_file_operations() {
        let matched = set().classify("write.csv(results, 'out.csv')");
        assert!(matched.contains("file_operations"));
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_install_and_system_both_match() {
        let code = "install.packages('forecast')\nsystem('rm -rf /tmp/x')";
        let matched = set().classify(code);
        assert!(matched.contains("package_installation"));
        assert!(matched.contains("system_operations"));
    }

    #[test]
    fn test_commented_line_is_guarded() {
        let matched = set().classify("# write.csv(results, 'out.csv')\nmean(x)");
        assert!(matched.is_empty());
    }

    #[test]
    fn test_comment_guard_does_not_leak_across_lines() {
        let code = "# note\nwrite.csv(results, 'out.csv')";
        let matched = set().classify(code);
        assert!(matched.contains("file_operations"));
    }

    #[test]
    fn test_bad_pattern_fails_compile() {
        let specs = vec![CategorySpec {
            id: "broken".to_string(),
            description: "broken".to_string(),
            level: SecurityLevel::Medium,
            patterns: vec![crate::DetectorSpec {
                pattern: "(".to_string(),
                unless_preceded_by: None,
            }],
        }];
        assert!(matches!(
            CategorySet::compile(&specs),
            Err(ApprovalError::BadPattern { .. })
        ));
    }
}
