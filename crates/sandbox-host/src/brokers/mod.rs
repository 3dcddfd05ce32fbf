//! The four privileged broker services — filesystem, hardware/network,
//! messaging, logging — plus the [`BrokerRouter`] that dispatches a framed
//! [`sandbox_ipc::BrokerCall`] to the right one after it has cleared
//! [`crate::secure_wrapper::SecureWrapper`].

pub mod filesystem;
pub mod hardware;
pub mod logging;
pub mod messaging;

use sandbox_ipc::{BrokerCall, BrokerReply};
use sandbox_types::capability::names;
use sandbox_types::{AuditKind, AuditSeverity, Capability, PeerCredentials, SandboxError};

use crate::resource_meter::ResourceMeter;
use crate::secure_wrapper::SecureWrapper;
use filesystem::FilesystemBroker;
use hardware::HardwareBroker;
use logging::LoggingBroker;
use messaging::MessagingBroker;

/// Maps a broker method name to the capability it requires. Methods not
/// listed here are rejected with `InvalidArgument` by [`BrokerRouter::dispatch`]
/// rather than silently auto-granted.
///
/// `openFile` is mode-aware: a read-mode open only needs the auto-granted
/// `FILE_READ`, but `write`/`read_write` opens create or truncate the
/// target just like `createFile` does, so they need the consent-gated
/// `FILE_WRITE` instead.
fn required_capability(method: &str, args: &serde_json::Value) -> Option<Capability> {
    let name = match method {
        "createFile" | "deleteFile" | "createFileViaPicker" => names::FILE_WRITE,
        "openFileViaPicker" | "listFiles" | "getFileSize" | "fileExists" => names::FILE_READ,
        "openFile" => {
            let mode = args.get("mode").and_then(|v| v.as_str()).unwrap_or("read");
            if mode == "read" { names::FILE_READ } else { names::FILE_WRITE }
        }
        "httpGet" | "httpPost" => names::NET_HTTP,
        "openSocket" => names::NET_SOCKET,
        "captureImage" | "startCameraPreview" | "stopCameraPreview" => names::HW_CAMERA,
        "getPairedBluetoothDevices" => names::BT_PAIRED,
        "connectBluetoothDevice" | "disconnectBluetoothDevice" => names::BT_CONNECT,
        "getAvailablePrinters" | "printDocument" => names::PRINT,
        "getPluginFile" | "writeTempFile" => names::FILE_READ,
        "requestPermission" => names::PERMISSION_REQUEST,
        "sendMessage" | "sendResponse" | "registerPlugin" | "unregisterPlugin" => names::MSG_SEND,
        "receiveMessages" => names::MSG_SEND,
        "submitLog" => names::LOG_SUBMIT,
        _ => return None,
    };
    Some(Capability::new(name))
}

/// Owns one instance of each broker and routes an incoming [`BrokerCall`]
/// through [`SecureWrapper::authorize`] before delegating.
#[derive(Clone)]
pub struct BrokerRouter {
    wrapper: SecureWrapper,
    resource_meter: ResourceMeter,
    filesystem: FilesystemBroker,
    hardware: HardwareBroker,
    messaging: MessagingBroker,
    logging: LoggingBroker,
}

impl BrokerRouter {
    pub fn new(
        wrapper: SecureWrapper,
        resource_meter: ResourceMeter,
        filesystem: FilesystemBroker,
        hardware: HardwareBroker,
        messaging: MessagingBroker,
        logging: LoggingBroker,
    ) -> Self {
        Self { wrapper, resource_meter, filesystem, hardware, messaging, logging }
    }

    /// Run the full SecureWrapper pipeline for `call` and dispatch to the
    /// matching broker, producing the reply the sandbox proxy expects.
    ///
    /// `peer_credentials` is the OS-level identity the transport captured
    /// when it accepted the connection this call arrived on; `None` only
    /// in tests that drive a `BrokerCall` directly without a live connection.
    pub async fn dispatch(&self, call: BrokerCall, peer_credentials: Option<&PeerCredentials>) -> BrokerReply {
        let result = self.dispatch_inner(&call, peer_credentials).await;
        BrokerReply { call_id: call.call_id, result }
    }

    async fn dispatch_inner(
        &self,
        call: &BrokerCall,
        peer_credentials: Option<&PeerCredentials>,
    ) -> Result<serde_json::Value, SandboxError> {
        let Some(capability) = required_capability(&call.method, &call.args) else {
            self.wrapper
                .audit(
                    AuditKind::SandboxProtocolViolation,
                    AuditSeverity::Warning,
                    Some(call.claimed_plugin_id.as_str().to_string()),
                    format!("unknown broker method '{}'", call.method),
                )
                .await;
            return Err(SandboxError::InvalidArgument(format!("unknown method '{}'", call.method)));
        };

        let verified = self
            .wrapper
            .authorize(&call.claimed_plugin_id, call.session_token, &call.method, &capability, peer_credentials)
            .await?;

        match call.method.as_str() {
            "createFile" => self.filesystem.create_file(&verified, &call.args).await,
            "openFile" => self.filesystem.open_file(&verified, &call.args).await,
            "deleteFile" => self.filesystem.delete_file(&verified, &call.args).await,
            "fileExists" => self.filesystem.file_exists(&verified, &call.args).await,
            "listFiles" => self.filesystem.list_files(&verified, &call.args).await,
            "getFileSize" => self.filesystem.get_file_size(&verified, &call.args).await,
            "createFileViaPicker" => self.filesystem.create_file_via_picker(&verified, &call.args).await,
            "openFileViaPicker" => self.filesystem.open_file_via_picker(&verified, &call.args).await,

            "requestPermission" => self.hardware.request_permission(&verified, &call.args).await,
            "getPluginFile" => self.hardware.get_plugin_file(&verified, &call.args).await,
            "writeTempFile" => self.hardware.write_temp_file(&verified, &call.args).await,

            "httpGet" => {
                let result = self.hardware.http_get(&verified, &call.args).await;
                self.meter_response_bytes(&verified, &result);
                result
            }
            "httpPost" => {
                let result = self.hardware.http_post(&verified, &call.args).await;
                self.meter_response_bytes(&verified, &result);
                result
            }
            "openSocket" => self.hardware.open_socket(&verified, &call.args).await,
            "captureImage" => self.hardware.capture_image(&verified).await,
            "startCameraPreview" => self.hardware.start_camera_preview(&verified).await,
            "stopCameraPreview" => self.hardware.stop_camera_preview(&verified).await,
            "getPairedBluetoothDevices" => self.hardware.get_paired_bluetooth_devices(&verified).await,
            "connectBluetoothDevice" => self.hardware.connect_bluetooth_device(&verified, &call.args).await,
            "disconnectBluetoothDevice" => self.hardware.disconnect_bluetooth_device(&verified, &call.args).await,
            "getAvailablePrinters" => self.hardware.get_available_printers(&verified).await,
            "printDocument" => self.hardware.print_document(&verified, &call.args).await,

            "sendMessage" => self.messaging.send_message(&verified, &call.args).await,
            "receiveMessages" => self.messaging.receive_messages(&verified).await,
            "sendResponse" => self.messaging.send_response(&verified, &call.args, &self.wrapper).await,
            "registerPlugin" => self.messaging.register_plugin(&verified),
            "unregisterPlugin" => self.messaging.unregister_plugin(&verified),

            "submitLog" => self.logging.submit_log_with(&verified, &call.args, Some(&self.wrapper)).await,

            other => Err(SandboxError::InvalidArgument(format!("unrouted method '{other}'"))),
        }
    }

    /// Meter a successful hardware/network reply's size against the
    /// caller's plugin. Failures carry no response body worth metering.
    fn meter_response_bytes(&self, plugin_id: &sandbox_types::PluginId, result: &Result<serde_json::Value, SandboxError>) {
        if let Ok(value) = result {
            let bytes = serde_json::to_vec(value).map(|b| b.len() as u64).unwrap_or(0);
            self.resource_meter.record_call_bytes(plugin_id, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_file_requires_the_consent_gated_write_capability() {
        let capability = required_capability("createFile", &serde_json::json!({"path": "a.txt"})).unwrap();
        assert_eq!(capability, Capability::new(names::FILE_WRITE));
    }

    #[test]
    fn open_file_in_read_mode_requires_only_file_read() {
        let capability = required_capability("openFile", &serde_json::json!({"path": "a.txt", "mode": "read"})).unwrap();
        assert_eq!(capability, Capability::new(names::FILE_READ));
    }

    #[test]
    fn open_file_with_no_mode_defaults_to_read() {
        let capability = required_capability("openFile", &serde_json::json!({"path": "a.txt"})).unwrap();
        assert_eq!(capability, Capability::new(names::FILE_READ));
    }

    #[test]
    fn open_file_in_write_mode_requires_file_write() {
        let capability = required_capability("openFile", &serde_json::json!({"path": "a.txt", "mode": "write"})).unwrap();
        assert_eq!(capability, Capability::new(names::FILE_WRITE));
    }

    #[test]
    fn open_file_in_read_write_mode_requires_file_write() {
        let capability =
            required_capability("openFile", &serde_json::json!({"path": "a.txt", "mode": "read_write"})).unwrap();
        assert_eq!(capability, Capability::new(names::FILE_WRITE));
    }

    #[test]
    fn camera_methods_all_require_hw_camera() {
        for method in ["captureImage", "startCameraPreview", "stopCameraPreview"] {
            let capability = required_capability(method, &serde_json::Value::Null).unwrap();
            assert_eq!(capability, Capability::new(names::HW_CAMERA));
        }
    }
}
