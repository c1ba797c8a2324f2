/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compilation cache.
//!
//! Keys are canonical template identities as produced by the loader's
//! `resolve`, so the same file referenced through different relative
//! paths shares one entry. Entries are whole compiled artifacts behind
//! `Arc`, handed out without copying. Invalidation is all-or-nothing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codegen::CompiledTemplate;

/// Caching behavior for compiled templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Keep compiled templates in memory, keyed by identity.
    #[default]
    Memory,
    /// Compile on every request.
    None,
}

#[derive(Debug, Default)]
pub(crate) struct CompileCache {
    mode: CacheMode,
    entries: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
}

impl CompileCache {
    pub fn new(mode: CacheMode) -> Self {
        CompileCache {
            mode,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, identity: &str) -> Option<Arc<CompiledTemplate>> {
        if self.mode == CacheMode::None {
            return None;
        }
        let entries = self.entries.read().ok()?;
        let hit = entries.get(identity).cloned();
        if hit.is_some() {
            tracing::debug!(identity = %identity, "Template cache hit");
        }
        hit
    }

    pub fn store(&self, template: Arc<CompiledTemplate>) {
        if self.mode == CacheMode::None {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            tracing::debug!(identity = %template.identity, "Caching compiled template");
            entries.insert(template.identity.clone(), template);
        }
    }

    /// Drop every cached entry.
    pub fn invalidate(&self) {
        if let Ok(mut entries) = self.entries.write() {
            tracing::debug!(count = entries.len(), "Invalidating template cache");
            entries.clear();
        }
    }
}
