//! Environment detection and startup preflight: container detection and
//! probing for the LLM CLI and its authentication state.

use std::path::PathBuf;
use std::process::Command;

/// Whether this process runs inside a container.
pub fn is_running_in_container() -> bool {
    if std::path::Path::new("/.dockerenv").exists() {
        return true;
    }
    std::fs::read_to_string("/proc/self/cgroup")
        .map(|content| content.contains("docker"))
        .unwrap_or(false)
}

/// Whether the LLM CLI responds to a version probe.
pub fn cli_available(command: &str) -> bool {
    Command::new(command)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Whether CLI authentication state is present on this machine. The CLI
/// stores auth either under `~/.cursor` or at `~/.config/cursor/auth.json`.
pub fn cli_authenticated() -> bool {
    let Some(home) = dirs::home_dir() else {
        return false;
    };
    if home.join(".config/cursor/auth.json").exists() {
        return true;
    }
    auth_markers_in(&home.join(".cursor"))
}

fn auth_markers_in(dir: &PathBuf) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    const MARKERS: [&str; 4] = ["auth", "token", "session", "config"];
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_lowercase())
        .any(|name| MARKERS.iter().any(|marker| name.contains(marker)))
}

/// Instructions printed when the CLI has no auth state.
pub fn auth_guidance() -> String {
    [
        "The LLM CLI is not authenticated.",
        "Run `agent login` (inside the container: `docker compose run --rm agent agent login`),",
        "open the printed URL in a browser on the host, then restart the orchestrator.",
    ]
    .join("\n")
}
