//! Code admission checker
//!
//! A static, text-level gate over the three custom-task fragments. It runs
//! before anything is parsed or evaluated. The policy is a heuristic over
//! source text; the interpreter's namespace and limits are what actually
//! confine execution.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Case-insensitive substrings that reject a fragment outright, in the order
/// they are checked
pub const DENYLIST: &[&str] = &[
    "import os",
    "from os",
    "os.system",
    "os.popen",
    "import sys",
    "from sys",
    "subprocess",
    "import shutil",
    "import socket",
    "importlib",
    "__import__",
    "eval(",
    "exec(",
    "compile(",
    "globals(",
    "locals(",
    "vars(",
    "getattr(",
    "setattr(",
    "delattr(",
    "__builtins__",
    "__globals__",
    "__subclasses__",
    "open(",
    "file(",
    "input(",
    "raw_input(",
    "breakpoint(",
];

/// Module families an import line may name
pub const ALLOWED_IMPORT_ROOTS: &[&str] = &["torch", "transformers"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Tokenizer,
    Model,
    Function,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 3] = [
        FragmentKind::Tokenizer,
        FragmentKind::Model,
        FragmentKind::Function,
    ];

    /// Label used in messages and traces
    pub fn label(&self) -> &'static str {
        match self {
            FragmentKind::Tokenizer => "tokenizer code",
            FragmentKind::Model => "model code",
            FragmentKind::Function => "function code",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One policy violation in one fragment
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AdmissionError {
    #[error("Forbidden pattern '{pattern}' found in {fragment}")]
    Forbidden {
        fragment: FragmentKind,
        pattern: String,
    },

    #[error("Import of '{module}' is not allowed in {fragment}; only torch and transformers may be imported")]
    DisallowedImport {
        fragment: FragmentKind,
        module: String,
    },
}

impl AdmissionError {
    pub fn fragment(&self) -> FragmentKind {
        match self {
            AdmissionError::Forbidden { fragment, .. }
            | AdmissionError::DisallowedImport { fragment, .. } => *fragment,
        }
    }
}

/// Every violation found across a task's fragments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "http-api", derive(utoipa::ToSchema))]
pub struct AdmissionRejection {
    pub violations: Vec<AdmissionError>,
}

impl fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for AdmissionRejection {}

fn import_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // A statement starts a line or follows `;`, `{` or `}`
            Regex::new(
                r"(?m)(?:^|[;{}])[ \t]*(?:from[ \t]+([A-Za-z_][\w.]*)[ \t]+import\b|import[ \t]+([^\n;{}]+))",
            )
            .ok()
        })
        .as_ref()
}

/// Modules named by the import statements of `source`; `None` when they
/// cannot be determined
fn imported_modules(source: &str) -> Option<Vec<String>> {
    let mut modules = Vec::new();
    let pattern = import_pattern()?;
    for captures in pattern.captures_iter(source) {
        if let Some(from) = captures.get(1) {
            modules.push(from.as_str().to_string());
        } else if let Some(list) = captures.get(2) {
            for item in list.as_str().split(',') {
                let name = item.split_whitespace().next().unwrap_or_default();
                modules.push(name.to_string());
            }
        }
    }
    Some(modules)
}

fn import_allowed(module: &str) -> bool {
    let root = module.split('.').next().unwrap_or_default();
    ALLOWED_IMPORT_ROOTS.contains(&root)
}

/// Every violation of one fragment, denylist hits first
pub fn violations(source: &str, kind: FragmentKind) -> Vec<AdmissionError> {
    let lowered = source.to_lowercase();
    let mut found: Vec<AdmissionError> = DENYLIST
        .iter()
        .filter(|pattern| lowered.contains(*pattern))
        .map(|pattern| AdmissionError::Forbidden {
            fragment: kind,
            pattern: pattern.to_string(),
        })
        .collect();

    match imported_modules(source) {
        Some(modules) => {
            for module in modules {
                if !import_allowed(&module) {
                    found.push(AdmissionError::DisallowedImport {
                        fragment: kind,
                        module,
                    });
                }
            }
        }
        None if lowered.contains("import") => {
            tracing::error!("Import pattern unavailable; rejecting fragment that mentions import");
            found.push(AdmissionError::DisallowedImport {
                fragment: kind,
                module: "import".to_string(),
            });
        }
        None => {}
    }
    found
}

/// Admit one fragment, reporting its first violation
pub fn check(source: &str, kind: FragmentKind) -> Result<&str, AdmissionError> {
    match violations(source, kind).into_iter().next() {
        Some(violation) => Err(violation),
        None => Ok(source),
    }
}

/// Admit a whole task. All three fragments are always checked so the caller
/// sees every rejected fragment, not just the first.
pub fn check_all(
    tokenizer_code: &str,
    model_code: &str,
    function_code: &str,
) -> Result<(), AdmissionRejection> {
    let sources = [tokenizer_code, model_code, function_code];
    let violations: Vec<AdmissionError> = FragmentKind::ALL
        .iter()
        .zip(sources)
        .filter_map(|(kind, source)| check(source, *kind).err())
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        for violation in &violations {
            tracing::warn!(fragment = %violation.fragment(), "Fragment rejected: {}", violation);
        }
        Err(AdmissionRejection { violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_os_rejected() {
        let err = check("import os\ntokenizer = 1", FragmentKind::Tokenizer).unwrap_err();
        assert_eq!(
            err,
            AdmissionError::Forbidden {
                fragment: FragmentKind::Tokenizer,
                pattern: "import os".to_string(),
            }
        );
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        assert!(check("x = EVAL(\"1\")", FragmentKind::Function).is_err());
        assert!(check("Import OS", FragmentKind::Model).is_err());
    }

    #[test]
    fn test_allowed_imports_pass() {
        let source = "import torch\nfrom transformers import AutoTokenizer\ntokenizer = AutoTokenizer.from_pretrained(model_id)";
        assert_eq!(check(source, FragmentKind::Tokenizer), Ok(source));
        assert!(check("import torch.nn as nn", FragmentKind::Model).is_ok());
    }

    #[test]
    fn test_fragment_without_imports_passes() {
        assert!(check("def custom_function(text) { return len(text) }", FragmentKind::Function).is_ok());
    }

    #[test]
    fn test_disallowed_import_rejected() {
        let err = check("import numpy as np", FragmentKind::Function).unwrap_err();
        assert_eq!(
            err,
            AdmissionError::DisallowedImport {
                fragment: FragmentKind::Function,
                module: "numpy".to_string(),
            }
        );

        // Mixed import lists are checked per module
        assert!(check("import torch, requests", FragmentKind::Model).is_err());
        assert!(check("from json import loads", FragmentKind::Model).is_err());
    }

    #[test]
    fn test_import_words_inside_identifiers_ignored() {
        assert!(check("important = 1\nreimport = 2", FragmentKind::Function).is_ok());
    }

    #[test]
    fn test_import_after_separator_rejected() {
        let err = check("let x = 1; import numpy", FragmentKind::Function).unwrap_err();
        assert!(matches!(err, AdmissionError::DisallowedImport { ref module, .. } if module == "numpy"));

        let err = check("if true { import numpy }", FragmentKind::Function).unwrap_err();
        assert!(matches!(err, AdmissionError::DisallowedImport { ref module, .. } if module == "numpy"));

        let err = check("def f() { 1 }; from json import dumps", FragmentKind::Model).unwrap_err();
        assert!(matches!(err, AdmissionError::DisallowedImport { ref module, .. } if module == "json"));
    }

    #[test]
    fn test_allowed_import_after_separator_passes() {
        assert!(check("let x = 1; import torch", FragmentKind::Function).is_ok());
        assert!(check("if true { from transformers import pipeline }", FragmentKind::Function).is_ok());
    }

    #[test]
    fn test_check_all_reports_every_fragment() {
        let rejection = check_all("import subprocess", "import socket", "import torch").unwrap_err();
        assert_eq!(rejection.violations.len(), 2);
        assert_eq!(rejection.violations[0].fragment(), FragmentKind::Tokenizer);
        assert_eq!(rejection.violations[1].fragment(), FragmentKind::Model);
        assert!(rejection.to_string().contains("subprocess"));
    }
}
