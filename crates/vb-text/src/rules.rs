use std::path::Path;

use serde::Deserialize;

/// One configurable find/replace rule applied after stage-direction cleanup
/// (SPEC_FULL.md §4.B). `pattern` is a regex; invalid patterns are skipped
/// at load time rather than failing the whole file.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<CleanupRule>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleDocument {
    Wrapped(RuleFile),
    Bare(Vec<CleanupRule>),
}

/// Built-in rules applied when no rules file is configured, the file is
/// missing, or the file fails to parse into at least one usable rule.
pub fn default_rules() -> Vec<CleanupRule> {
    vec![
        CleanupRule {
            pattern: r"\b(?:uh|um)+[.…]*".to_string(),
            replacement: String::new(),
        },
        CleanupRule {
            pattern: r"\s{2,}".to_string(),
            replacement: " ".to_string(),
        },
    ]
}

fn fallback_rules() -> Vec<CleanupRule> {
    vec![CleanupRule {
        pattern: r"\s{2,}".to_string(),
        replacement: " ".to_string(),
    }]
}

/// Load cleanup rules from a YAML or JSON file. Missing files, unreadable
/// files, unsupported extensions, and files with zero valid rules all fall
/// back to a single whitespace-collapse rule rather than erroring, since a
/// malformed rules file should degrade the TTS output, not take down the
/// turn.
pub fn load_rules(path: &Path) -> Vec<CleanupRule> {
    if !path.exists() {
        return default_rules();
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to read TTS rules file");
            return fallback_rules();
        }
    };

    let document = match extension.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str::<RuleDocument>(&contents)
            .map_err(|e| e.to_string()),
        Some("json") => serde_json::from_str::<RuleDocument>(&contents).map_err(|e| e.to_string()),
        _ => {
            tracing::warn!(path = %path.display(), "unsupported TTS rules file extension");
            return fallback_rules();
        }
    };

    let rules = match document {
        Ok(RuleDocument::Wrapped(file)) => file.rules,
        Ok(RuleDocument::Bare(rules)) => rules,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to parse TTS rules file");
            return fallback_rules();
        }
    };

    let valid: Vec<CleanupRule> = rules
        .into_iter()
        .filter(|r| !r.pattern.is_empty() && regex::Regex::new(&r.pattern).is_ok())
        .collect();

    if valid.is_empty() {
        tracing::warn!(path = %path.display(), "TTS rules file contained no usable rules, falling back");
        fallback_rules()
    } else {
        valid
    }
}
