/*
 * loader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template loaders.
//!
//! A [`Loader`] turns template references into canonical identities and
//! identities into source text. `resolve` is pure and synchronous; `load`
//! is the synchronous read and `load_async` the asynchronous one, which
//! defaults to delegating to `load`. An implementation backed by a truly
//! asynchronous source overrides `load_async`; such a loader's `load` may
//! return a configuration error, which surfaces only if a caller uses the
//! synchronous engine entry points.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{TemplateError, TemplateResult};

/// Source of template text, keyed by reference strings.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Resolve a reference (as written in a template or passed by a
    /// caller) to a canonical identity, relative to the identity of the
    /// referring template when there is one.
    fn resolve(&self, to: &str, from: Option<&str>) -> String;

    /// Load template source by canonical identity.
    fn load(&self, identity: &str) -> TemplateResult<String>;

    /// Asynchronously load template source by canonical identity.
    async fn load_async(&self, identity: &str) -> TemplateResult<String> {
        self.load(identity)
    }
}

/// An in-memory loader over a virtual absolute path space. Useful for
/// tests and for embedding templates in a binary.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: HashMap<String, String>,
    base: String,
}

impl MemoryLoader {
    pub fn new() -> Self {
        MemoryLoader {
            templates: HashMap::new(),
            base: "/".to_string(),
        }
    }

    /// Set the base path prepended to relative references that have no
    /// referring template.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    /// Add a template under a virtual path.
    pub fn add(&mut self, path: impl Into<String>, source: impl Into<String>) {
        let path = path.into();
        let identity = normalize_virtual(&join_virtual("/", &path));
        self.templates.insert(identity, source.into());
    }

    /// Builder-style [`MemoryLoader::add`].
    pub fn with_template(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.add(path, source);
        self
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn resolve(&self, to: &str, from: Option<&str>) -> String {
        let base = match from {
            Some(from) => parent_virtual(from),
            None => self.base.clone(),
        };
        normalize_virtual(&join_virtual(&base, to))
    }

    fn load(&self, identity: &str) -> TemplateResult<String> {
        self.templates
            .get(identity)
            .cloned()
            .ok_or_else(|| TemplateError::TemplateNotFound {
                identity: identity.to_string(),
            })
    }
}

/// A loader reading template files from a base directory on disk.
#[derive(Debug, Clone)]
pub struct FsLoader {
    base: PathBuf,
    extension: Option<String>,
}

impl FsLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FsLoader {
            base: base.into(),
            extension: None,
        }
    }

    /// Set a default extension (without the dot) appended to references
    /// that have none, so templates can say `include "nav"`.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }
}

#[async_trait]
impl Loader for FsLoader {
    fn resolve(&self, to: &str, from: Option<&str>) -> String {
        let with_ext = match &self.extension {
            Some(ext) if Path::new(to).extension().is_none() => format!("{to}.{ext}"),
            _ => to.to_string(),
        };
        let to = with_ext.as_str();
        let target = Path::new(to);
        if target.is_absolute() {
            return lexical_normalize(target);
        }
        let base = match from {
            Some(from) => Path::new(from)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.base.clone()),
            None => self.base.clone(),
        };
        lexical_normalize(&base.join(target))
    }

    fn load(&self, identity: &str) -> TemplateResult<String> {
        match std::fs::read_to_string(identity) {
            Ok(source) => {
                tracing::debug!(path = %identity, "Loaded template file");
                Ok(source)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TemplateError::TemplateNotFound {
                    identity: identity.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Join and normalize without touching the filesystem.
fn lexical_normalize(path: &Path) -> String {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    let mut prefix = String::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::RootDir => parts.clear(),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
        }
    }
    let joined = parts
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if path.is_absolute() {
        format!("{prefix}/{joined}")
    } else {
        format!("{prefix}{joined}")
    }
}

fn join_virtual(base: &str, to: &str) -> String {
    if to.starts_with('/') {
        to.to_string()
    } else if base.ends_with('/') {
        format!("{base}{to}")
    } else {
        format!("{base}/{to}")
    }
}

fn parent_virtual(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn normalize_virtual(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memory_resolve_from_base() {
        let loader = MemoryLoader::new();
        assert_eq!(loader.resolve("page.html", None), "/page.html");

        let loader = MemoryLoader::new().with_base("/themes/plain");
        assert_eq!(loader.resolve("page.html", None), "/themes/plain/page.html");
    }

    #[test]
    fn test_memory_resolve_relative_to_referrer() {
        let loader = MemoryLoader::new();
        assert_eq!(
            loader.resolve("partial.html", Some("/pages/index.html")),
            "/pages/partial.html"
        );
        assert_eq!(
            loader.resolve("../shared/nav.html", Some("/pages/index.html")),
            "/shared/nav.html"
        );
        assert_eq!(
            loader.resolve("/absolute.html", Some("/pages/index.html")),
            "/absolute.html"
        );
    }

    #[test]
    fn test_memory_load() {
        let loader = MemoryLoader::new().with_template("greeting.html", "hello");
        assert_eq!(loader.load("/greeting.html").unwrap(), "hello");

        let err = loader.load("/missing.html").unwrap_err();
        assert_eq!(err.to_string(), "Unable to find template \"/missing.html\"");
    }

    #[test]
    fn test_memory_load_async_delegates() {
        let loader = MemoryLoader::new().with_template("a.html", "A");
        let loaded = pollster::block_on(loader.load_async("/a.html")).unwrap();
        assert_eq!(loaded, "A");
    }

    #[test]
    fn test_fs_resolve() {
        let loader = FsLoader::new("/srv/templates");
        assert_eq!(loader.resolve("page.html", None), "/srv/templates/page.html");
        assert_eq!(
            loader.resolve("nav.html", Some("/srv/templates/pages/index.html")),
            "/srv/templates/pages/nav.html"
        );
        assert_eq!(
            loader.resolve("../nav.html", Some("/srv/templates/pages/index.html")),
            "/srv/templates/nav.html"
        );
    }

    #[test]
    fn test_fs_default_extension() {
        let loader = FsLoader::new("/srv/templates").with_extension("html");
        assert_eq!(loader.resolve("page", None), "/srv/templates/page.html");
        // References that already carry an extension are untouched.
        assert_eq!(loader.resolve("page.txt", None), "/srv/templates/page.txt");
    }

    #[test]
    fn test_fs_missing_is_not_found() {
        let loader = FsLoader::new("/nonexistent-base");
        let err = loader.load("/nonexistent-base/x.html").unwrap_err();
        assert!(matches!(err, TemplateError::TemplateNotFound { .. }));
    }

    #[test]
    fn test_normalize_virtual() {
        assert_eq!(normalize_virtual("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_virtual("/../up"), "/up");
        assert_eq!(normalize_virtual("//double//slash"), "/double/slash");
    }
}
