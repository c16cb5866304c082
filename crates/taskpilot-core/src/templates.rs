//! Built-in task templates.
//!
//! A template binds a task category to a default prompt, tool allow-list and
//! turn budget. Categories without a template (such as `custom`) fall back to
//! [`DEFAULT_ALLOWED_TOOLS`] and [`DEFAULT_MAX_TURNS`].

use serde::Serialize;

/// Tool set used when neither the request nor a template names one.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];

/// Turn budget used when neither the request nor a template names one.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// A named preset for a task category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
    pub allowed_tools: &'static [&'static str],
    pub max_turns: u32,
}

const READ_ONLY: &[&str] = &["Read", "Glob", "Grep"];
const EDITING: &[&str] = &["Read", "Write", "Edit", "Glob", "Grep"];
const EDITING_WITH_SHELL: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];

const BUILTIN: &[TaskTemplate] = &[
    TaskTemplate {
        id: "code-review-general",
        name: "General code review",
        category: "code-review",
        description: "Review the workspace for bugs, readability and maintainability issues.",
        prompt: "Review the code in the current directory. Report bugs, risky patterns and \
                 readability problems, ordered by severity, with file and line references.",
        allowed_tools: READ_ONLY,
        max_turns: 10,
    },
    TaskTemplate {
        id: "bug-fix-standard",
        name: "Bug fix",
        category: "bug-fix",
        description: "Locate and fix a defect, then verify the fix.",
        prompt: "Investigate the failing behaviour in this project, identify the root cause, \
                 apply a minimal fix and run the relevant tests to confirm it.",
        allowed_tools: EDITING_WITH_SHELL,
        max_turns: 20,
    },
    TaskTemplate {
        id: "feature-implementation",
        name: "Feature implementation",
        category: "feature",
        description: "Implement a new feature following existing project conventions.",
        prompt: "Implement the requested feature following the conventions already used in \
                 this project. Add tests for the new behaviour.",
        allowed_tools: EDITING_WITH_SHELL,
        max_turns: 30,
    },
    TaskTemplate {
        id: "refactor-cleanup",
        name: "Refactor",
        category: "refactor",
        description: "Improve structure without changing behaviour.",
        prompt: "Refactor the code in the current directory to reduce duplication and improve \
                 naming without changing observable behaviour.",
        allowed_tools: EDITING_WITH_SHELL,
        max_turns: 20,
    },
    TaskTemplate {
        id: "documentation-readme",
        name: "Documentation",
        category: "documentation",
        description: "Write or update project documentation.",
        prompt: "Write clear documentation for this project: purpose, setup, usage and \
                 configuration. Update existing docs instead of duplicating them.",
        allowed_tools: EDITING,
        max_turns: 10,
    },
    TaskTemplate {
        id: "testing-unit",
        name: "Unit tests",
        category: "testing",
        description: "Add unit tests for untested code paths.",
        prompt: "Find code paths without test coverage and add focused unit tests for them. \
                 Run the test suite and make sure it passes.",
        allowed_tools: EDITING_WITH_SHELL,
        max_turns: 20,
    },
    TaskTemplate {
        id: "security-audit",
        name: "Security audit",
        category: "security-audit",
        description: "Audit the code for common security weaknesses.",
        prompt: "Audit this project for security weaknesses such as injection, unsafe \
                 deserialization, secrets in source and missing input validation. Report each \
                 finding with severity and a suggested fix.",
        allowed_tools: READ_ONLY,
        max_turns: 15,
    },
];

/// Read-only catalog of task templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateCatalog {
    templates: &'static [TaskTemplate],
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateCatalog {
    pub const fn builtin() -> Self {
        Self {
            templates: BUILTIN,
        }
    }

    /// Look up a template by its id.
    pub fn by_id(&self, id: &str) -> Option<&'static TaskTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// The default template for a task category, if the category has one.
    pub fn for_category(&self, category: &str) -> Option<&'static TaskTemplate> {
        self.templates.iter().find(|t| t.category == category)
    }

    /// All templates, optionally restricted to one category.
    pub fn list(&self, category: Option<&str>) -> Vec<&'static TaskTemplate> {
        self.templates
            .iter()
            .filter(|t| category.is_none_or(|c| t.category == c))
            .collect()
    }

    /// Distinct category names, in catalog order.
    pub fn categories(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for t in self.templates {
            if !out.contains(&t.category) {
                out.push(t.category);
            }
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn every_template_has_prompt_and_tools() {
        for t in TemplateCatalog::builtin().list(None) {
            assert!(!t.prompt.trim().is_empty(), "{} has empty prompt", t.id);
            assert!(!t.allowed_tools.is_empty(), "{} has no tools", t.id);
            assert!(t.max_turns > 0);
        }
    }

    #[test]
    fn template_ids_are_unique() {
        let all = TemplateCatalog::builtin().list(None);
        let mut ids: Vec<_> = all.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all.len());
    }

    #[test]
    fn lookup_by_category() {
        let catalog = TemplateCatalog::builtin();
        let t = catalog.for_category("code-review").unwrap();
        assert_eq!(t.id, "code-review-general");
        assert!(catalog.for_category("custom").is_none());
    }

    #[test]
    fn list_filters_by_category() {
        let catalog = TemplateCatalog::builtin();
        let testing = catalog.list(Some("testing"));
        assert_eq!(testing.len(), 1);
        assert!(catalog.list(Some("nope")).is_empty());
    }

    #[test]
    fn by_id_unknown_is_none() {
        assert!(TemplateCatalog::builtin().by_id("missing").is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let t = TemplateCatalog::builtin().by_id("testing-unit").unwrap();
        let json = serde_json::to_value(t).unwrap();
        assert!(json.get("allowedTools").is_some());
        assert_eq!(json["maxTurns"], 20);
    }
}
