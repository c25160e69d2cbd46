//! Source language detection and per-language strategy selection.
//!
//! Every language-dependent decision in the pipeline (token profile,
//! structure analysis, fallback rewriting, lexical rules, fence hints)
//! dispatches on [`Language`] instead of on raw file extensions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fallback::{FallbackEngine, IdentityFallback, PythonFallback};
use crate::structure::{BraceAnalyzer, PlainAnalyzer, PythonAnalyzer, StructureAnalyzer};
use crate::tokens::TokenProfile;

/// Language of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Other,
}

/// Comment and string syntax used by the lexer.
#[derive(Debug, Clone, Copy)]
pub struct LexicalRules {
    /// Line comment introducer (`#` or `//`).
    pub line_comment: &'static str,
    /// Whether `/* ... */` block comments exist.
    pub block_comments: bool,
    /// Whether `"""`/`'''` triple-quoted strings exist.
    pub triple_quotes: bool,
}

impl Language {
    /// Detect the language from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("py") => Language::Python,
            Some("java") => Language::Java,
            _ => Language::Other,
        }
    }

    /// Parse a configuration value such as `"python"`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            "other" => Some(Language::Other),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::Other => "other",
        }
    }

    /// Human-facing name used in prompts ("Python", "Java").
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::Java => "Java",
            Language::Other => "source",
        }
    }

    /// File extension eligible for a sweep of this language.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Language::Python => Some("py"),
            Language::Java => Some("java"),
            Language::Other => None,
        }
    }

    /// Code fence language hints accepted during reply extraction.
    pub fn fence_hints(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["python", "py", "python3"],
            Language::Java => &["java"],
            Language::Other => &[],
        }
    }

    /// Fence hint written into prompts.
    pub fn fence_tag(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::Other => "",
        }
    }

    /// Prefixes that mark a bare reply as code.
    pub fn preamble_prefixes(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["#!", "import ", "from ", "def ", "class ", "async def "],
            Language::Java => &["package ", "import ", "public ", "class ", "/*", "//"],
            Language::Other => &["#!"],
        }
    }

    pub fn lexical_rules(&self) -> LexicalRules {
        match self {
            Language::Python => LexicalRules {
                line_comment: "#",
                block_comments: false,
                triple_quotes: true,
            },
            Language::Java => LexicalRules {
                line_comment: "//",
                block_comments: true,
                triple_quotes: false,
            },
            Language::Other => LexicalRules {
                line_comment: "#",
                block_comments: false,
                triple_quotes: false,
            },
        }
    }

    pub fn token_profile(&self) -> TokenProfile {
        match self {
            Language::Python => TokenProfile::code(),
            Language::Java => TokenProfile::code(),
            Language::Other => TokenProfile::prose(),
        }
    }

    pub fn analyzer(&self) -> &'static dyn StructureAnalyzer {
        match self {
            Language::Python => &PythonAnalyzer,
            Language::Java => &BraceAnalyzer,
            Language::Other => &PlainAnalyzer,
        }
    }

    pub fn fallback_engine(&self) -> &'static dyn FallbackEngine {
        match self {
            Language::Python => &PythonFallback,
            Language::Java | Language::Other => &IdentityFallback,
        }
    }
}

/// A dotted language version such as `3.9` or `17`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Parse `N`, `N.N` or `N.N.N`. Anything else is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.patch != 0 {
            write!(f, ".{}", self.patch)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
