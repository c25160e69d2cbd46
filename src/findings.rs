//! Static analysis findings.
//!
//! | Language | Source |
//! |----------|--------|
//! | Python | [`PythonScanner`]: version-gated patterns over lexed code |
//! | Java | [`ModernizerAnalyzer`]: Maven Modernizer plugin in a scratch project |
//! | other | `"unavailable"` |
//!
//! The findings text is shown to the model and its keywords switch on the
//! matching rewrites of the fallback catalog.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio::process::Command;

use uplifter_core::language::{Language, Version};
use uplifter_core::lexer::lex;
use uplifter_core::models::FINDINGS_UNAVAILABLE;

use crate::config::AnalysisConfig;
use crate::traits::FindingsSource;

/// Line numbers listed per finding.
const MAX_LINES_LISTED: usize = 5;

// ═══════════════════════════════════════════════════════════════════════
// Python
// ═══════════════════════════════════════════════════════════════════════

struct ScanRule {
    /// Lowest target version the finding applies to.
    since: Option<(u32, u32)>,
    pattern: &'static str,
    message: &'static str,
}

const PYTHON_RULES: &[ScanRule] = &[
    ScanRule {
        since: None,
        pattern: r"^\s*print\s+[^\s(=.,)\]]",
        message: "Ensure print statements use parentheses for Python 3 compatibility",
    },
    ScanRule {
        since: None,
        pattern: r"^\s*except\s+(\([^)]*\)|[\w.]+)\s*,\s*\w+\s*:",
        message: "Use 'except Exception as e:' syntax instead of 'except Exception, e:'",
    },
    ScanRule {
        since: None,
        pattern: r"\.has_key\s*\(",
        message: "Replace dict.has_key(k) with 'k in dict'",
    },
    ScanRule {
        since: None,
        pattern: r"\bxrange\s*\(",
        message: "Replace xrange() with range()",
    },
    ScanRule {
        since: None,
        pattern: r"\.(iteritems|itervalues|iterkeys)\s*\(",
        message: "Replace iteritems()/itervalues()/iterkeys() with items()/values()/keys()",
    },
    ScanRule {
        since: None,
        pattern: r"<>",
        message: "Replace the <> operator with !=",
    },
    ScanRule {
        since: Some((3, 6)),
        pattern: r#"["']\s*%\s*[\w(\[]"#,
        message: "Consider using f-strings instead of % formatting",
    },
    ScanRule {
        since: Some((3, 6)),
        pattern: r"^\s*def\s+\w+\s*\([^)]*\)\s*:",
        message: "Consider adding type hints to function signatures",
    },
    ScanRule {
        since: Some((3, 8)),
        pattern: r"^\s*(el)?if\s+(not\s+)?len\s*\([^)]*\)",
        message: "Consider using the walrus operator (:=) for len() checks",
    },
    ScanRule {
        since: Some((3, 9)),
        pattern: r"(\}\s*\.update\s*\(|\.update\s*\(\s*\{)",
        message: "Consider using dict union operators (|, |=) instead of .update() with literals",
    },
];

static COMPILED_RULES: Lazy<Vec<(&'static ScanRule, Regex)>> = Lazy::new(|| {
    PYTHON_RULES
        .iter()
        .filter_map(|rule| Regex::new(rule.pattern).ok().map(|re| (rule, re)))
        .collect()
});

/// Pattern scanner for Python sources.
///
/// Matching runs on lexed lines, so string contents and comments never
/// produce findings. Version gates compare parsed versions numerically.
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonScanner;

impl PythonScanner {
    pub fn scan(&self, code: &str, target_version: &str) -> String {
        let version = Version::parse(target_version);
        let lexed = lex(code, &Language::Python.lexical_rules());

        let mut findings = Vec::new();
        for (rule, re) in COMPILED_RULES.iter() {
            let applies = match (rule.since, version) {
                (None, _) => true,
                (Some((major, minor)), Some(v)) => v.at_least(major, minor),
                (Some(_), None) => false,
            };
            if !applies {
                continue;
            }
            let hits: Vec<usize> = lexed
                .lines
                .iter()
                .enumerate()
                .filter(|(_, l)| !l.continues_literal && re.is_match(&l.code))
                .map(|(i, _)| i + 1)
                .collect();
            if hits.is_empty() {
                continue;
            }
            let mut listed: Vec<String> = hits.iter().take(MAX_LINES_LISTED).map(|n| n.to_string()).collect();
            if hits.len() > MAX_LINES_LISTED {
                listed.push(format!("and {} more", hits.len() - MAX_LINES_LISTED));
            }
            findings.push(format!("- {} (lines {})", rule.message, listed.join(", ")));
        }

        if findings.is_empty() {
            format!("Code appears to be compatible with Python {}", target_version.trim())
        } else {
            format!(
                "Static analysis for Python {}:\n{}",
                target_version.trim(),
                findings.join("\n")
            )
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Java (Maven Modernizer)
// ═══════════════════════════════════════════════════════════════════════

const POM_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="http://maven.apache.org/POM/4.0.0 http://maven.apache.org/xsd/maven-4.0.0.xsd">
    <modelVersion>4.0.0</modelVersion>
    <groupId>com.example.modernizer</groupId>
    <artifactId>modernizer-check</artifactId>
    <version>1.0-SNAPSHOT</version>
    <properties>
        <project.build.sourceEncoding>UTF-8</project.build.sourceEncoding>
        <maven.compiler.source>{java_version}</maven.compiler.source>
        <maven.compiler.target>{java_version}</maven.compiler.target>
        <modernizer.javaVersion>{java_version}</modernizer.javaVersion>
    </properties>
    <build>
        <plugins>
            <plugin>
                <groupId>org.apache.maven.plugins</groupId>
                <artifactId>maven-compiler-plugin</artifactId>
                <version>3.11.0</version>
                <configuration>
                    <source>${maven.compiler.source}</source>
                    <target>${maven.compiler.target}</target>
                </configuration>
            </plugin>
            <plugin>
                <groupId>org.gaul</groupId>
                <artifactId>modernizer-maven-plugin</artifactId>
                <version>2.7.0</version>
                <configuration>
                    <javaVersion>${modernizer.javaVersion}</javaVersion>
                    <failOnViolations>false</failOnViolations>
                </configuration>
                <executions>
                    <execution>
                        <id>modernizer</id>
                        <phase>verify</phase>
                        <goals>
                            <goal>modernizer</goal>
                        </goals>
                    </execution>
                </executions>
            </plugin>
        </plugins>
    </build>
</project>
"#;

static PACKAGE_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;").ok());

/// One Modernizer violation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violation {
    pub name: String,
    pub comment: String,
    /// `(source file, line number)` pairs.
    pub locations: Vec<(String, String)>,
}

impl Violation {
    fn render(&self) -> String {
        let at: Vec<String> = self
            .locations
            .iter()
            .map(|(file, line)| format!("at {file}:L{line}"))
            .collect();
        if at.is_empty() {
            format!("- {}: {}", self.name, self.comment)
        } else {
            format!("- {}: {} ({})", self.name, self.comment, at.join(", "))
        }
    }
}

/// Runs the Maven Modernizer plugin against one Java file.
///
/// The file is copied into a scratch Maven project inside a [`tempfile::TempDir`],
/// which is removed when the analysis returns, whatever the outcome.
#[derive(Debug, Clone)]
pub struct ModernizerAnalyzer {
    maven_bin: String,
}

impl ModernizerAnalyzer {
    pub fn new(maven_bin: impl Into<String>) -> Self {
        Self {
            maven_bin: maven_bin.into(),
        }
    }

    async fn run(&self, path: &Path, code: &str, target_version: &str) -> Result<String> {
        let probe = Command::new(&self.maven_bin)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Maven not found: {}", self.maven_bin))?;
        if !probe.status.success() {
            bail!("'{} --version' exited with {}", self.maven_bin, probe.status);
        }

        let scratch = tempfile::Builder::new()
            .prefix("modernizer_")
            .tempdir()
            .context("Failed to create scratch directory")?;
        let mut source_dir = scratch.path().join("src").join("main").join("java");
        if let Some(package) = package_path(code) {
            source_dir.push(package);
        }
        tokio::fs::create_dir_all(&source_dir).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "Main.java".into());
        tokio::fs::write(source_dir.join(file_name), code).await?;
        tokio::fs::write(scratch.path().join("pom.xml"), pom_for(target_version)).await?;

        tracing::debug!(dir = %scratch.path().display(), "running mvn -B clean verify");
        let output = Command::new(&self.maven_bin)
            .args(["-B", "clean", "verify"])
            .current_dir(scratch.path())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.maven_bin))?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let report = scratch.path().join("target").join("modernizer-report.xml");
        if report.exists() {
            let xml = tokio::fs::read(&report).await?;
            let violations = parse_report(&xml)?;
            return Ok(render_violations(&violations));
        }
        let logged = violations_from_log(&stdout);
        if !logged.is_empty() {
            return Ok(format!(
                "Modernizer found the following issues:\n{}",
                logged.join("\n")
            ));
        }
        if stdout.contains("No violations found") {
            return Ok("Modernizer found no violations.".to_string());
        }
        bail!("Modernizer report not found (mvn exited with {})", output.status)
    }
}

#[async_trait]
impl FindingsSource for ModernizerAnalyzer {
    fn name(&self) -> &str {
        "modernizer"
    }

    async fn analyze(&self, path: &Path, code: &str, target_version: &str) -> String {
        match self.run(path, code, target_version).await {
            Ok(findings) => findings,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "modernizer analysis failed");
                format!("Modernizer analysis unavailable: {e:#}")
            }
        }
    }
}

fn pom_for(java_version: &str) -> String {
    POM_TEMPLATE.replace("{java_version}", java_version.trim())
}

/// `com/example/app` for `package com.example.app;`.
fn package_path(code: &str) -> Option<String> {
    let re = PACKAGE_RE.as_ref()?;
    re.captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace('.', "/"))
}

fn render_violations(violations: &[Violation]) -> String {
    if violations.is_empty() {
        return "Modernizer found no violations.".to_string();
    }
    let lines: Vec<String> = violations.iter().map(Violation::render).collect();
    format!("Modernizer found the following issues:\n{}", lines.join("\n"))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Name,
    Comment,
}

/// Parse `target/modernizer-report.xml`.
pub fn parse_report(xml: &[u8]) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();
    let mut current: Option<Violation> = None;
    let mut field = Field::None;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"violation" => current = Some(Violation::default()),
                b"name" => field = Field::Name,
                b"comment" => field = Field::Comment,
                b"location" => push_location(&mut current, &e),
                _ => {}
            },
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"location" {
                    push_location(&mut current, &e);
                }
            }
            Ok(quick_xml::events::Event::Text(te)) => {
                if let Some(v) = current.as_mut() {
                    let text = te.unescape().unwrap_or_default().trim().to_string();
                    match field {
                        Field::Name => v.name.push_str(&text),
                        Field::Comment => v.comment.push_str(&text),
                        Field::None => {}
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"name" | b"comment" => field = Field::None,
                b"violation" => {
                    if let Some(v) = current.take() {
                        violations.push(v);
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("Malformed modernizer report: {e}"),
            _ => {}
        }
        buf.clear();
    }
    Ok(violations)
}

fn push_location(current: &mut Option<Violation>, e: &quick_xml::events::BytesStart<'_>) {
    let Some(v) = current.as_mut() else {
        return;
    };
    let mut file = String::new();
    let mut line = String::new();
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(attr.value.as_ref()).to_string();
        match attr.key.as_ref() {
            b"sourceFile" => file = value,
            b"lineNumber" => line = value,
            _ => {}
        }
    }
    v.locations.push((file, line));
}

/// `[ERROR] .../Foo.java:12: Prefer java.util.Optional` lines from the build log.
fn violations_from_log(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|l| l.contains("[ERROR]") && l.contains("Prefer"))
        .filter_map(|l| {
            let (location, message) = l.split_once(": ")?;
            let file_line = location.rsplit('/').next().unwrap_or(location);
            Some(format!("- {} (at {})", message.trim(), file_line.trim()))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════════════

/// Findings by file language: the Python scanner for `.py`, Modernizer for
/// `.java` when enabled, `"unavailable"` otherwise.
pub struct AnalysisDispatch {
    python: PythonScanner,
    modernizer: Option<ModernizerAnalyzer>,
}

impl AnalysisDispatch {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            python: PythonScanner,
            modernizer: config
                .modernizer
                .then(|| ModernizerAnalyzer::new(config.maven_bin.clone())),
        }
    }
}

#[async_trait]
impl FindingsSource for AnalysisDispatch {
    fn name(&self) -> &str {
        "static-analysis"
    }

    async fn analyze(&self, path: &Path, code: &str, target_version: &str) -> String {
        match Language::from_path(path) {
            Language::Python => self.python.scan(code, target_version),
            Language::Java => match &self.modernizer {
                Some(m) => m.analyze(path, code, target_version).await,
                None => FINDINGS_UNAVAILABLE.to_string(),
            },
            Language::Other => FINDINGS_UNAVAILABLE.to_string(),
        }
    }
}
