//! The hardware/network broker. URLs must be HTTPS unless the caller
//! holds the low-security capability; bulk request/response bodies are
//! out of scope for this in-process stub (a production broker would
//! exchange opaque file handles, never in-memory buffers, to bound
//! memory — see DESIGN.md for why handle-passing itself is not
//! reimplemented here).

use serde::Deserialize;
use url::Url;

use sandbox_types::capability::names;
use sandbox_types::{Capability, PluginId, SandboxError};

use crate::capability_manager::CapabilityManager;

#[derive(Debug, Deserialize)]
struct UrlArg {
    url: String,
}

#[derive(Debug, Deserialize)]
struct BluetoothArg {
    address: String,
}

#[derive(Debug, Deserialize)]
struct PrintArg {
    printer: String,
}

/// Outbound HTTP(S) and device-proxy operations. Holds its own
/// [`CapabilityManager`] handle (in addition to the one the
/// [`crate::secure_wrapper::SecureWrapper`] already consulted for the
/// base `NET_HTTP` capability) because the HTTPS-vs-insecure decision is
/// a second, URL-dependent capability check that belongs inside this
/// broker rather than at the wrapper's generic gate.
#[derive(Clone)]
pub struct HardwareBroker {
    client: reqwest::Client,
    capabilities: CapabilityManager,
}

impl HardwareBroker {
    pub fn new(capabilities: CapabilityManager) -> Self {
        Self { client: reqwest::Client::new(), capabilities }
    }

    fn validate_url(&self, plugin_id: &PluginId, url: &str) -> Result<Url, SandboxError> {
        let parsed = Url::parse(url).map_err(|_| SandboxError::InvalidArgument(format!("invalid url '{url}'")))?;
        if parsed.scheme() == "https" {
            return Ok(parsed);
        }
        if self.capabilities.is_granted(plugin_id, &Capability::new(names::NET_HTTP_INSECURE)) {
            return Ok(parsed);
        }
        Err(SandboxError::InvalidArgument(format!("non-HTTPS url '{url}' requires {}", names::NET_HTTP_INSECURE)))
    }

    fn parse<T: serde::de::DeserializeOwned>(args: &serde_json::Value) -> Result<T, SandboxError> {
        serde_json::from_value(args.clone()).map_err(|e| SandboxError::InvalidArgument(e.to_string()))
    }

    pub async fn http_get(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: UrlArg = Self::parse(args)?;
        let url = self.validate_url(plugin_id, &arg.url)?;

        let response = self.client.get(url).send().await.map_err(|_| SandboxError::Internal)?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(serde_json::json!({"status": status, "body": body}))
    }

    pub async fn http_post(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        #[derive(Deserialize)]
        struct PostArg {
            url: String,
            #[serde(default)]
            body: serde_json::Value,
        }
        let arg: PostArg = Self::parse(args)?;
        let url = self.validate_url(plugin_id, &arg.url)?;

        let response = self.client.post(url).json(&arg.body).send().await.map_err(|_| SandboxError::Internal)?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(serde_json::json!({"status": status, "body": body}))
    }

    pub async fn open_socket(&self, _plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        #[derive(Deserialize)]
        struct SocketArg {
            host: String,
            port: u16,
        }
        let arg: SocketArg = Self::parse(args)?;
        tokio::net::TcpStream::connect((arg.host.as_str(), arg.port))
            .await
            .map_err(|_| SandboxError::Internal)?;
        Ok(serde_json::json!({"connected": true}))
    }

    /// No physical camera is reachable from a headless host process; the
    /// real broker defers to the platform's camera API, so a capture here
    /// always reports the device as unavailable.
    pub async fn capture_image(&self, _plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        Err(SandboxError::NotFound("camera not available".to_string()))
    }

    pub async fn start_camera_preview(&self, _plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        Err(SandboxError::NotFound("camera not available".to_string()))
    }

    /// Stopping a preview that was never running is a no-op, not an
    /// error, the same way `disconnect_bluetooth_device` treats a
    /// disconnect of an already-idle device.
    pub async fn stop_camera_preview(&self, _plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        Ok(serde_json::json!({"stopped": true}))
    }

    pub async fn get_paired_bluetooth_devices(&self, _plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        // No physical Bluetooth stack is reachable from a headless host
        // process; the real broker defers to the platform's Bluetooth
        // API. An empty list is the correct answer in that environment.
        Ok(serde_json::json!([]))
    }

    pub async fn connect_bluetooth_device(&self, _plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let _arg: BluetoothArg = Self::parse(args)?;
        Err(SandboxError::NotFound("bluetooth device not paired".to_string()))
    }

    pub async fn disconnect_bluetooth_device(&self, _plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let _arg: BluetoothArg = Self::parse(args)?;
        Ok(serde_json::json!({"disconnected": true}))
    }

    pub async fn get_available_printers(&self, _plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        Ok(serde_json::json!([]))
    }

    pub async fn print_document(&self, _plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: PrintArg = Self::parse(args)?;
        Err(SandboxError::NotFound(format!("printer '{}' not available", arg.printer)))
    }

    /// The interactive consent prompt lives outside this crate (there is
    /// no host UI here): `Critical`-class capabilities are still forbidden
    /// outright by [`CapabilityManager::request`], but any `Dangerous`- or
    /// `AutoGrant`-class capability the plugin asks for is granted
    /// immediately rather than prompted for.
    pub async fn request_permission(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        #[derive(Deserialize)]
        struct PermissionArg {
            capability: String,
        }
        let arg: PermissionArg = Self::parse(args)?;
        let capability = Capability::new(arg.capability);

        let outcomes = self.capabilities.request(plugin_id, &[capability], |_| true);
        let granted = matches!(outcomes.first(), Some((_, crate::capability_manager::GrantOutcome::Granted)));
        Ok(serde_json::json!({"granted": granted}))
    }

    /// Read a file from outside the calling plugin's own sandbox root
    /// (e.g. an attachment staged by another broker operation), identified
    /// by an absolute host-managed path rather than a plugin-relative one.
    pub async fn get_plugin_file(&self, _plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        #[derive(Deserialize)]
        struct FileArg {
            path: String,
        }
        let arg: FileArg = Self::parse(args)?;
        let metadata = tokio::fs::metadata(&arg.path).await.map_err(|_| SandboxError::NotFound(arg.path.clone()))?;
        Ok(serde_json::json!({"path": arg.path, "size_bytes": metadata.len()}))
    }

    /// Write plugin-supplied bytes to a host-managed temp file outside any
    /// plugin's sandbox root, for handing off to hardware operations (print,
    /// bluetooth transfer) that expect a file path rather than inline bytes.
    pub async fn write_temp_file(&self, _plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        #[derive(Deserialize)]
        struct WriteTempArg {
            plugin_id: String,
            contents: String,
        }
        let arg: WriteTempArg = Self::parse(args)?;
        let path = std::env::temp_dir().join(format!("{}-{}.tmp", arg.plugin_id, uuid::Uuid::new_v4()));
        tokio::fs::write(&path, arg.contents.as_bytes()).await.map_err(|_| SandboxError::Internal)?;
        Ok(serde_json::json!({"path": path.to_string_lossy()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    #[test]
    fn https_url_is_always_accepted() {
        let broker = HardwareBroker::new(CapabilityManager::new());
        let id = plugin("demo-automation");
        assert!(broker.validate_url(&id, "https://example.com").is_ok());
    }

    #[test]
    fn plain_http_is_rejected_without_insecure_capability() {
        let broker = HardwareBroker::new(CapabilityManager::new());
        let id = plugin("demo-automation");
        let result = broker.validate_url(&id, "http://example.com");
        assert!(matches!(result, Err(SandboxError::InvalidArgument(_))));
    }

    #[test]
    fn plain_http_is_accepted_with_insecure_capability() {
        let capabilities = CapabilityManager::new();
        let id = plugin("demo-automation");
        capabilities.install_declared(&id, &[Capability::new(names::NET_HTTP_INSECURE)]);
        // NET_HTTP_INSECURE is dangerous-class, so declaring it alone does
        // not auto-grant it; simulate a completed consent flow instead.
        capabilities.request(&id, &[Capability::new(names::NET_HTTP_INSECURE)], |_| true);

        let broker = HardwareBroker::new(capabilities);
        assert!(broker.validate_url(&id, "http://example.com").is_ok());
    }

    #[test]
    fn malformed_url_is_invalid_argument() {
        let broker = HardwareBroker::new(CapabilityManager::new());
        let id = plugin("demo-automation");
        assert!(matches!(broker.validate_url(&id, "not a url"), Err(SandboxError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn request_permission_grants_dangerous_capability_without_a_ui() {
        let capabilities = CapabilityManager::new();
        let broker = HardwareBroker::new(capabilities.clone());
        let id = plugin("demo-automation");

        let result = broker.request_permission(&id, &serde_json::json!({"capability": names::HW_CAMERA})).await.unwrap();
        assert_eq!(result["granted"], serde_json::json!(true));
        assert!(capabilities.is_granted(&id, &Capability::new(names::HW_CAMERA)));
    }

    #[tokio::test]
    async fn request_permission_never_grants_critical_capability() {
        let capabilities = CapabilityManager::new();
        let broker = HardwareBroker::new(capabilities.clone());
        let id = plugin("demo-automation");

        let result = broker.request_permission(&id, &serde_json::json!({"capability": names::SYSTEM_REBOOT})).await.unwrap();
        assert_eq!(result["granted"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn write_temp_file_then_get_plugin_file_round_trips_size() {
        let broker = HardwareBroker::new(CapabilityManager::new());
        let id = plugin("demo-automation");

        let written = broker
            .write_temp_file(&id, &serde_json::json!({"plugin_id": "demo-automation", "contents": "hello"}))
            .await
            .unwrap();
        let path = written["path"].as_str().unwrap().to_string();

        let info = broker.get_plugin_file(&id, &serde_json::json!({"path": path})).await.unwrap();
        assert_eq!(info["size_bytes"], serde_json::json!(5));
    }

    #[tokio::test]
    async fn capture_image_reports_camera_unavailable_headless() {
        let broker = HardwareBroker::new(CapabilityManager::new());
        let id = plugin("demo-automation");
        assert!(matches!(broker.capture_image(&id).await, Err(SandboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn stop_camera_preview_succeeds_even_when_none_was_started() {
        let broker = HardwareBroker::new(CapabilityManager::new());
        let id = plugin("demo-automation");
        let result = broker.stop_camera_preview(&id).await.unwrap();
        assert_eq!(result, serde_json::json!({"stopped": true}));
    }
}
