//! Reads a plugin bundle handed to the sandbox by the host and validates
//! it before any plugin code (flow graph) is allowed to run.
//!
//! The on-disk bundle shape is a directory containing
//! `plugin-manifest.json`, `signature.json`, and `ui/`/`flows/` trees.
//! Signature verification runs before `load` elsewhere in the platform
//! and is out of scope here; this loader's job is to read the manifest,
//! validate its declared config against its own schema, and compute the
//! content digest the host's handshake claim is checked against.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use sandbox_types::PluginManifest;

use crate::error::{RuntimeError, RuntimeResult};

/// A validated plugin bundle, ready to hand to a [`crate::runtime::PluginRuntime`].
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub manifest: PluginManifest,
    pub content_digest: String,
    pub root: PathBuf,
}

/// Reads and validates plugin bundles from their on-disk layout.
///
/// A small stateless reader with a single entry point: this sandbox never
/// loads or executes native code from a plugin, only reads a declarative
/// bundle directory.
pub struct PluginLoader;

impl PluginLoader {
    /// Read and validate the bundle rooted at `bundle_path`.
    pub async fn load(bundle_path: &Path) -> RuntimeResult<LoadedBundle> {
        let manifest_path = bundle_path.join("plugin-manifest.json");
        let bytes = tokio::fs::read(&manifest_path)
            .await
            .map_err(|source| RuntimeError::BundleRead { path: manifest_path.clone(), source })?;

        let manifest: PluginManifest =
            serde_json::from_slice(&bytes).map_err(|e| RuntimeError::MalformedManifest(e.to_string()))?;

        let violations = manifest.validate_config();
        if !violations.is_empty() {
            return Err(RuntimeError::InvalidManifestConfig(violations));
        }

        let content_digest = Self::digest_bundle(bundle_path).await?;

        tracing::info!(plugin_id = %manifest.id, flows = manifest.flows.len(), "loaded plugin bundle");
        Ok(LoadedBundle { manifest, content_digest, root: bundle_path.to_path_buf() })
    }

    /// SHA-256 over every regular file under `bundle_path`, in a stable
    /// (sorted path) order, so the digest is reproducible across
    /// filesystem traversal orders. This is what the handshake's
    /// `content_digest` is checked against on the host side.
    async fn digest_bundle(bundle_path: &Path) -> RuntimeResult<String> {
        let mut paths = Vec::new();
        collect_files(bundle_path, &mut paths).await?;
        paths.sort();

        let mut hasher = Sha256::new();
        for path in paths {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| RuntimeError::BundleRead { path: path.clone(), source })?;
            hasher.update(&bytes);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

fn collect_files<'a>(
    dir: &'a Path,
    out: &'a mut Vec<PathBuf>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = RuntimeResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|source| RuntimeError::BundleRead { path: dir.to_path_buf(), source })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| RuntimeError::BundleRead { path: dir.to_path_buf(), source })?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|source| RuntimeError::BundleRead { path: path.clone(), source })?;
            if file_type.is_dir() {
                collect_files(&path, out).await?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_manifest(dir: &Path, extra: serde_json::Value) {
        let mut manifest = serde_json::json!({
            "id": "demo-automation",
            "version": "1.0.0",
            "display_name": "Demo Automation",
            "developer_id": "dev-1",
            "min_host_version": "0.1.0",
            "declared_capabilities": [],
            "flows": [],
        });
        for (k, v) in extra.as_object().unwrap() {
            manifest[k] = v.clone();
        }
        tokio::fs::write(dir.join("plugin-manifest.json"), serde_json::to_vec(&manifest).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn loads_a_valid_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), serde_json::json!({})).await;

        let bundle = PluginLoader::load(dir.path()).await.unwrap();
        assert_eq!(bundle.manifest.id.as_str(), "demo-automation");
        assert_eq!(bundle.content_digest.len(), 64);
    }

    #[tokio::test]
    async fn digest_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), serde_json::json!({})).await;

        let first = PluginLoader::load(dir.path()).await.unwrap();
        let second = PluginLoader::load(dir.path()).await.unwrap();
        assert_eq!(first.content_digest, second.content_digest);
    }

    #[tokio::test]
    async fn rejects_manifest_missing_required_config_field() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            serde_json::json!({
                "config_schema": {"required_fields": ["api_base"], "field_types": {}},
            }),
        )
        .await;

        let result = PluginLoader::load(dir.path()).await;
        assert!(matches!(result, Err(RuntimeError::InvalidManifestConfig(_))));
    }

    #[tokio::test]
    async fn rejects_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let result = PluginLoader::load(dir.path()).await;
        assert!(matches!(result, Err(RuntimeError::BundleRead { .. })));
    }
}
