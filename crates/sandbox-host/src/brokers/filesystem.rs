//! The filesystem broker. Every path a plugin supplies is relative to that
//! plugin's own sandbox root; absolute paths and any `..` component are
//! rejected with `PathEscape` before the host ever touches the
//! filesystem.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use sandbox_types::{PluginId, SandboxError};

/// Owner-only create mode: newly created files default to not being
/// readable or writable by anyone but the host process.
#[cfg(unix)]
const DEFAULT_CREATE_MODE: u32 = 0o600;

#[derive(Debug, Deserialize)]
struct PathArg {
    path: String,
}

#[derive(Debug, Deserialize)]
struct OpenArg {
    path: String,
    #[serde(default)]
    mode: OpenMode,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OpenMode {
    #[default]
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Serialize)]
struct FileEntry {
    name: String,
    is_dir: bool,
    size_bytes: u64,
}

/// Filesystem operations scoped to per-plugin sandbox roots under
/// `<app_data_dir>/plugins/<plugin_id>/`.
#[derive(Clone)]
pub struct FilesystemBroker {
    app_data_dir: PathBuf,
}

impl FilesystemBroker {
    pub fn new(app_data_dir: impl Into<PathBuf>) -> Self {
        Self { app_data_dir: app_data_dir.into() }
    }

    /// Resolve a plugin-relative path, rejecting anything that would
    /// escape the plugin's sandbox root.
    fn resolve(&self, plugin_id: &PluginId, relative: &str) -> Result<PathBuf, SandboxError> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(SandboxError::PathEscape(relative.to_string()));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathEscape(relative.to_string()));
                }
            }
        }

        let root = self.app_data_dir.join("plugins").join(plugin_id.as_str());
        Ok(root.join(candidate))
    }

    async fn ensure_root(&self, plugin_id: &PluginId) -> Result<PathBuf, SandboxError> {
        let root = self.app_data_dir.join("plugins").join(plugin_id.as_str());
        fs::create_dir_all(&root).await.map_err(|_| SandboxError::Internal)?;
        Ok(root)
    }

    fn parse<T: serde::de::DeserializeOwned>(args: &serde_json::Value) -> Result<T, SandboxError> {
        serde_json::from_value(args.clone()).map_err(|e| SandboxError::InvalidArgument(e.to_string()))
    }

    pub async fn create_file(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: PathArg = Self::parse(args)?;
        self.ensure_root(plugin_id).await?;
        let path = self.resolve(plugin_id, &arg.path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|_| SandboxError::Internal)?;
        }

        let mut options = fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(DEFAULT_CREATE_MODE);
        }
        options.open(&path).await.map_err(|_| SandboxError::Internal)?;
        Ok(serde_json::json!({"created": true}))
    }

    pub async fn open_file(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: OpenArg = Self::parse(args)?;
        let path = self.resolve(plugin_id, &arg.path)?;

        let exists = fs::metadata(&path).await.is_ok();
        if !exists && !matches!(arg.mode, OpenMode::Write | OpenMode::ReadWrite) {
            return Err(SandboxError::NotFound(arg.path));
        }
        Ok(serde_json::json!({"opened": true, "path": arg.path}))
    }

    pub async fn delete_file(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: PathArg = Self::parse(args)?;
        let path = self.resolve(plugin_id, &arg.path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(serde_json::json!({"deleted": true})),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SandboxError::NotFound(arg.path)),
            Err(_) => Err(SandboxError::Internal),
        }
    }

    pub async fn file_exists(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: PathArg = Self::parse(args)?;
        let path = self.resolve(plugin_id, &arg.path)?;
        Ok(serde_json::json!(fs::metadata(&path).await.is_ok()))
    }

    pub async fn get_file_size(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: PathArg = Self::parse(args)?;
        let path = self.resolve(plugin_id, &arg.path)?;
        let metadata = fs::metadata(&path).await.map_err(|_| SandboxError::NotFound(arg.path))?;
        Ok(serde_json::json!(metadata.len()))
    }

    pub async fn list_files(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: PathArg = Self::parse(args)?;
        let path = self.resolve(plugin_id, &arg.path)?;

        let mut read_dir = match fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(SandboxError::NotFound(arg.path)),
            Err(_) => return Err(SandboxError::Internal),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|_| SandboxError::Internal)? {
            let metadata = entry.metadata().await.map_err(|_| SandboxError::Internal)?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size_bytes: metadata.len(),
            });
        }

        serde_json::to_value(entries).map_err(|_| SandboxError::Internal)
    }

    /// The picker variants route through a user-visible chooser owned by
    /// the host UI in the full platform; this core has no UI layer to
    /// route through, so they fall back to their non-interactive
    /// equivalents against the path the plugin already supplied.
    pub async fn create_file_via_picker(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        self.create_file(plugin_id, args).await
    }

    pub async fn open_file_via_picker(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        self.open_file(plugin_id, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FilesystemBroker::new(dir.path());
        let id = plugin("demo-automation");

        broker.create_file(&id, &serde_json::json!({"path": "notes/a.txt"})).await.unwrap();
        let listed = broker.list_files(&id, &serde_json::json!({"path": "notes"})).await.unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_parent_dir_escape() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FilesystemBroker::new(dir.path());
        let id = plugin("demo-automation");

        let result = broker.create_file(&id, &serde_json::json!({"path": "../evil.txt"})).await;
        assert!(matches!(result, Err(SandboxError::PathEscape(_))));
    }

    #[tokio::test]
    async fn rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FilesystemBroker::new(dir.path());
        let id = plugin("demo-automation");

        let result = broker.get_file_size(&id, &serde_json::json!({"path": "/etc/passwd"})).await;
        assert!(matches!(result, Err(SandboxError::PathEscape(_))));
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FilesystemBroker::new(dir.path());
        let id = plugin("demo-automation");

        let result = broker.delete_file(&id, &serde_json::json!({"path": "missing.txt"})).await;
        assert!(matches!(result, Err(SandboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn file_exists_reports_false_for_unwritten_path() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FilesystemBroker::new(dir.path());
        let id = plugin("demo-automation");

        let exists = broker.file_exists(&id, &serde_json::json!({"path": "nope.txt"})).await.unwrap();
        assert_eq!(exists, serde_json::json!(false));
    }

    #[tokio::test]
    async fn two_plugins_cannot_see_each_others_files() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FilesystemBroker::new(dir.path());
        let a = plugin("plugin-a");
        let b = plugin("plugin-b");

        broker.create_file(&a, &serde_json::json!({"path": "secret.txt"})).await.unwrap();
        let exists_for_b = broker.file_exists(&b, &serde_json::json!({"path": "secret.txt"})).await.unwrap();
        assert_eq!(exists_for_b, serde_json::json!(false));
    }

    #[tokio::test]
    async fn picker_variants_fall_back_to_direct_path_operations() {
        let dir = tempfile::tempdir().unwrap();
        let broker = FilesystemBroker::new(dir.path());
        let id = plugin("demo-automation");

        broker.create_file_via_picker(&id, &serde_json::json!({"path": "picked.txt"})).await.unwrap();
        let opened = broker.open_file_via_picker(&id, &serde_json::json!({"path": "picked.txt"})).await.unwrap();
        assert_eq!(opened["opened"], serde_json::json!(true));
    }
}
