//! Module loader for component bundles.
//!
//! A bundle is a directory of ES modules whose entry registers components.
//! Imports are confined to that directory: no network, no `data:`/`blob:`
//! URLs, no path traversal, and only `.js`/`.mjs` files.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};

/// Loads component modules from a single bundle directory.
pub struct BundleLoader {
    bundle_dir: PathBuf,
}

impl BundleLoader {
    /// Create a loader rooted at `bundle_dir`, which must exist.
    pub fn new(bundle_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let canonical = bundle_dir.as_ref().canonicalize().map_err(|e| {
            anyhow!(
                "Bundle directory '{}' is not accessible: {}",
                bundle_dir.as_ref().display(),
                e
            )
        })?;

        if !canonical.is_dir() {
            return Err(anyhow!("Bundle path '{}' is not a directory", canonical.display()));
        }

        Ok(Self {
            bundle_dir: canonical,
        })
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// Resolve symlinks and `..` and require the result to stay in the bundle
    /// and to be a JavaScript module.
    fn check_path(&self, path: &Path) -> Result<PathBuf, Error> {
        let canonical = path
            .canonicalize()
            .map_err(|e| anyhow!("Cannot read module '{}': {}", path.display(), e))?;

        if !canonical.starts_with(&self.bundle_dir) {
            tracing::warn!(path = %path.display(), "module outside bundle directory refused");
            return Err(anyhow!(
                "Access denied: '{}' is outside the bundle directory",
                path.display()
            ));
        }

        if !matches!(
            canonical.extension().and_then(|e| e.to_str()),
            Some("js") | Some("mjs")
        ) {
            return Err(anyhow!(
                "Only .js and .mjs modules can be loaded, got: {}",
                path.display()
            ));
        }

        Ok(canonical)
    }
}

impl ModuleLoader for BundleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if ["http://", "https://", "data:", "blob:", "npm:", "node:"]
            .iter()
            .any(|scheme| specifier.starts_with(scheme))
        {
            return Err(anyhow!("Remote imports are forbidden: {}", specifier));
        }

        let resolved = if specifier.starts_with("./") || specifier.starts_with("../") {
            ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?
                .join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?
        } else if specifier.starts_with("file://") {
            ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", specifier, e))?
        } else if specifier.starts_with('/') {
            ModuleSpecifier::from_file_path(specifier)
                .map_err(|_| anyhow!("Invalid absolute path: {}", specifier))?
        } else {
            // Bare specifiers resolve from the bundle root ("chunk-abc123.js")
            ModuleSpecifier::from_file_path(self.bundle_dir.join(specifier))
                .map_err(|_| anyhow!("Invalid bare specifier: {}", specifier))?
        };

        if resolved.scheme() != "file" {
            return Err(anyhow!("Only file:// modules allowed, got: {}", resolved.scheme()));
        }

        let path = resolved
            .to_file_path()
            .map_err(|_| anyhow!("Failed to convert URL to path: {}", resolved))?;
        self.check_path(&path)?;

        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let load = || -> Result<ModuleSource, Error> {
            let path = module_specifier
                .to_file_path()
                .map_err(|_| anyhow!("Invalid file path: {}", module_specifier))?;
            // resolve() already checked, but the file may have moved since
            let path = self.check_path(&path)?;
            let code = std::fs::read_to_string(&path)
                .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;

            tracing::debug!(module = %module_specifier, bytes = code.len(), "loaded bundle module");

            Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(code.into()),
                module_specifier,
                None,
            ))
        };

        ModuleLoadResponse::Sync(load())
    }
}
