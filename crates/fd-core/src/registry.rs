// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client modules known to one session.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Instance-owned mapping from client module id to its export names.
///
/// Each `WorkspaceSession` owns a fresh registry, so nothing leaks from one
/// compile cycle into the next. Clones share the same mapping.
#[derive(Debug, Clone, Default)]
pub struct ClientModuleRegistry {
    modules: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl ClientModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a module and its exports.
    pub fn register(&self, module_id: impl Into<String>, exports: Vec<String>) {
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        modules.insert(module_id.into(), exports);
    }

    pub fn exports(&self, module_id: &str) -> Option<Vec<String>> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        modules.get(module_id).cloned()
    }

    /// Whether `name` resolves inside `module_id`; `*` names the whole module.
    pub fn resolves(&self, module_id: &str, name: &str) -> bool {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        match modules.get(module_id) {
            Some(exports) => name == "*" || exports.iter().any(|e| e == name),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub fn clear(&self) {
        self.modules.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
