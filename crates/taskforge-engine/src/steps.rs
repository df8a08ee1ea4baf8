//! Non-command step execution and device-shell command synthesis.
//!
//! Command-shaped steps (including everything that goes through the
//! device shell) are streamed by the supervisor; the helpers here cover
//! the remaining step kinds and build the argv vectors for the emulator
//! prelude.

use std::collections::HashMap;

use taskforge_core::catalog::{Prelude, Step};
use taskforge_core::error::{ForgeError, Result};

use crate::notify::WebhookSink;

/// Run a file/http/webhook step to completion and return its output text.
pub async fn run_inline_step(
    step: &Step,
    http: &reqwest::Client,
    sink: &dyn WebhookSink,
) -> Result<String> {
    match step {
        Step::FileWrite { path, contents, .. } => {
            tokio::fs::write(path, contents).await?;
            Ok(format!("wrote {} bytes to {}", contents.len(), path.display()))
        }
        Step::FileRead { path, .. } => {
            let contents = tokio::fs::read_to_string(path).await?;
            Ok(contents)
        }
        Step::FileCopy { from, to, .. } => {
            let bytes = tokio::fs::copy(from, to).await?;
            Ok(format!("copied {bytes} bytes to {}", to.display()))
        }
        Step::FileDelete { path, .. } => {
            tokio::fs::remove_file(path).await?;
            Ok(format!("deleted {}", path.display()))
        }
        Step::HttpGet { url, .. } => {
            let response = http
                .get(url)
                .send()
                .await
                .map_err(|e| ForgeError::Config(format!("http_get {url}: {e}")))?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_success() {
                Ok(body)
            } else {
                Err(ForgeError::Config(format!("http_get {url}: HTTP {status}")))
            }
        }
        Step::HttpPost {
            url, body, headers, ..
        } => {
            let mut request = http.post(url);
            if let Some(body) = body {
                request = request.json(body);
            }
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
            let response = request
                .send()
                .await
                .map_err(|e| ForgeError::Config(format!("http_post {url}: {e}")))?;
            let status = response.status();
            if status.is_success() {
                Ok(format!("http_post {url}: HTTP {status}"))
            } else {
                Err(ForgeError::Config(format!("http_post {url}: HTTP {status}")))
            }
        }
        Step::WebhookSend {
            template, message, ..
        } => {
            let mut variables = HashMap::new();
            variables.insert("title".to_string(), template.clone());
            variables.insert("body".to_string(), message.clone());
            variables.insert("channel".to_string(), "step".to_string());
            sink.deliver(template, &variables).await?;
            Ok(format!("webhook {template} delivered"))
        }
        _ => Err(ForgeError::Config(format!(
            "step {step:?} is not an inline step"
        ))),
    }
}

/// Argv for a command run on the device through its shell interface.
pub fn device_shell_argv(shell: &str, device_id: &str, command: &[&str]) -> Vec<String> {
    let mut argv = vec![shell.to_string(), "-s".into(), device_id.into(), "shell".into()];
    argv.extend(command.iter().map(|part| part.to_string()));
    argv
}

/// Argv connecting the device before anything else touches it.
pub fn device_connect_argv(shell: &str, device_id: &str) -> Vec<String> {
    vec![shell.to_string(), "connect".into(), device_id.into()]
}

/// Wake + unlock key sequences for a device.
pub fn wake_commands(shell: &str, device_id: &str) -> Vec<Vec<String>> {
    vec![
        device_shell_argv(shell, device_id, &["input", "keyevent", "KEYCODE_WAKEUP"]),
        device_shell_argv(shell, device_id, &["input", "swipe", "300", "1000", "300", "500"]),
    ]
}

/// App launch command: explicit activity when declared, otherwise the
/// launcher intent.
pub fn launch_app_argv(
    shell: &str,
    device_id: &str,
    package: &str,
    activity: Option<&str>,
) -> Vec<String> {
    match activity {
        Some(activity) => {
            let component = if activity.contains('/') {
                activity.to_string()
            } else {
                format!("{package}/{activity}")
            };
            device_shell_argv(shell, device_id, &["am", "start", "-n", &component])
        }
        None => device_shell_argv(
            shell,
            device_id,
            &["monkey", "-p", package, "-c", "android.intent.category.LAUNCHER", "1"],
        ),
    }
}

pub fn query_resolution_argv(shell: &str, device_id: &str) -> Vec<String> {
    device_shell_argv(shell, device_id, &["wm", "size"])
}

pub fn set_resolution_argv(shell: &str, device_id: &str, resolution: &str) -> Vec<String> {
    device_shell_argv(shell, device_id, &["wm", "size", resolution])
}

/// Normalize a resolution string for comparison (`1280×720` → `1280x720`).
pub fn normalize_resolution(raw: &str) -> String {
    raw.trim().to_lowercase().replace('×', "x")
}

/// Ordered command list for a job's emulator prelude, excluding the
/// resolution assertion (which needs its query/compare round-trip).
pub fn prelude_commands(shell: &str, prelude: &Prelude) -> Vec<Vec<String>> {
    let mut commands = vec![device_connect_argv(shell, &prelude.device_id)];
    if prelude.wake_device {
        commands.extend(wake_commands(shell, &prelude.device_id));
    }
    commands
}
