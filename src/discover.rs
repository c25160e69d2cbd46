//! Source file discovery.
//!
//! Walks `run.root` and returns every regular file whose extension matches
//! the run language, in sorted relative-path order. Default excludes
//! (`.git`, `target`, `build`, `__pycache__`, `node_modules`, hidden
//! directories) are always applied on top of `run.exclude_globs`. When
//! `run.selected_modules` is non-empty only files under those
//! sub-directories are returned.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use uplifter_core::language::Language;

use crate::config::Config;
use crate::error::ConfigError;

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/build/**",
    "**/__pycache__/**",
    "**/node_modules/**",
];

/// One file eligible for modernization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the run root, `/`-separated.
    pub relative: String,
}

pub fn discover(config: &Config) -> Result<Vec<SourceFile>> {
    let language = config.language()?;
    let root = &config.run.root;
    if !root.exists() {
        return Err(ConfigError::MissingRoot { path: root.clone() }.into());
    }
    if root.is_file() {
        let relative = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(if matches_language(root, language) {
            vec![SourceFile {
                path: root.clone(),
                relative,
            }]
        } else {
            Vec::new()
        });
    }

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.run.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name().to_string_lossy().as_ref()));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !matches_language(path, language) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative_string(relative);

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !in_selected_modules(relative, &config.run.selected_modules) {
            continue;
        }
        files.push(SourceFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn matches_language(path: &Path, language: Language) -> bool {
    Language::from_path(path) == language
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

fn relative_string(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn in_selected_modules(relative: &Path, modules: &[String]) -> bool {
    if modules.is_empty() {
        return true;
    }
    modules.iter().any(|m| {
        let module = Path::new(m.trim_matches('/'));
        relative.starts_with(module) && relative != module
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x = 1\n").unwrap();
    }

    fn config_for(root: &Path) -> Config {
        let mut cfg = Config::minimal("3.9", Language::Python);
        cfg.run.root = root.to_path_buf();
        cfg
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for rel in [
            "b.py",
            "a.py",
            "pkg/mod.py",
            "pkg/readme.md",
            "a.py.backup",
            ".venv/lib.py",
            "pkg/__pycache__/mod.py",
            "build/gen.py",
            "Main.java",
        ] {
            touch(dir.path(), rel);
        }
        let files = discover(&config_for(dir.path())).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["a.py", "b.py", "pkg/mod.py"]);
    }

    #[test]
    fn test_discover_selected_modules_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["core/a.py", "core/gen/b.py", "tools/c.py", "top.py"] {
            touch(dir.path(), rel);
        }
        let mut cfg = config_for(dir.path());
        cfg.run.selected_modules = vec!["core".into()];
        cfg.run.exclude_globs = vec!["**/gen/**".into()];
        let files = discover(&cfg).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["core/a.py"]);
    }

    #[test]
    fn test_discover_java_and_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/App.java");
        touch(dir.path(), "src/app.py");
        let mut cfg = config_for(dir.path());
        cfg.run.language = "java".into();
        let files = discover(&cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative, "src/App.java");

        cfg.run.root = dir.path().join("src/App.java");
        assert_eq!(discover(&cfg).unwrap().len(), 1);
    }

    #[test]
    fn test_discover_missing_root() {
        let cfg = config_for(Path::new("/nonexistent/uplift/root"));
        assert!(discover(&cfg).is_err());
    }
}
