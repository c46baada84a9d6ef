//! Keyword router deciding whether free text asks the IDE to fix or improve itself.
//!
//! Best effort only. A misclassified request just takes the ordinary chat path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    UiBug,
    Performance,
    RuntimeError,
    Integration,
    Logic,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 5] = [
        Self::UiBug,
        Self::Performance,
        Self::RuntimeError,
        Self::Integration,
        Self::Logic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UiBug => "ui_bug",
            Self::Performance => "performance",
            Self::RuntimeError => "runtime_error",
            Self::Integration => "integration",
            Self::Logic => "logic",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown issue category: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestKind {
    Chat,
    SelfImprove { category: IssueCategory },
}

/// Phrases that mark a request as "something is wrong, fix it".
const TRIGGERS: &[&str] = &[
    // Arabic
    "لا يعمل",
    "لايعمل",
    "خطأ",
    "مشكلة",
    "أصلح",
    "اصلح",
    "إصلاح",
    "حسّن",
    "تحسين",
    "بطيء",
    "معطل",
    "عطل",
    // English
    "bug",
    "broken",
    "not working",
    "doesn't work",
    "does not work",
    "isn't working",
    "fix",
    "improve",
    "slow",
    "crash",
    "error",
    "fails",
    "failing",
    "wrong",
];

/// Checked in order; the first category with a hit wins.
const CATEGORY_KEYWORDS: &[(IssueCategory, &[&str])] = &[
    (
        IssueCategory::UiBug,
        &[
            "الزر",
            "الشريط الجانبي",
            "الواجهة",
            "القائمة",
            "النافذة",
            "اللوحة",
            "button",
            "sidebar",
            "panel",
            "menu",
            "layout",
            "dialog",
            "modal",
            "click",
            "icon",
            "theme",
            "css",
            "ui",
        ],
    ),
    (
        IssueCategory::Performance,
        &[
            "بطيء",
            "بطء",
            "سرعة",
            "تجميد",
            "slow",
            "lag",
            "freeze",
            "performance",
            "memory",
            "hang",
        ],
    ),
    (
        IssueCategory::RuntimeError,
        &[
            "انهيار",
            "استثناء",
            "crash",
            "exception",
            "undefined",
            "null",
            "stack trace",
            "panic",
            "error",
        ],
    ),
    (
        IssueCategory::Integration,
        &[
            "جيت",
            "جيت هب",
            "الاتصال",
            "git",
            "github",
            "api",
            "provider",
            "push",
            "commit",
            "network",
            "sync",
        ],
    ),
];

pub fn classify_request(text: &str) -> RequestKind {
    let lowered = text.to_lowercase();
    if !TRIGGERS.iter().any(|t| contains_term(&lowered, t)) {
        return RequestKind::Chat;
    }
    let category = CATEGORY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| contains_term(&lowered, w)))
        .map(|(category, _)| *category)
        .unwrap_or(IssueCategory::Logic);
    RequestKind::SelfImprove { category }
}

/// ASCII terms must start a word ("fix" matches "fixes" but not "prefix"), and two-letter
/// abbreviations must also end one ("ui" but not "uint").
/// Other scripts match as substrings, since Arabic attaches prefixes to words.
fn contains_term(haystack: &str, term: &str) -> bool {
    if !term.is_ascii() {
        return haystack.contains(term);
    }
    let whole_word = term.len() <= 2;
    haystack.match_indices(term).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + term.len()..].chars().next();
        !is_word_char(before) && !(whole_word && is_word_char(after))
    })
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_alphanumeric())
}
