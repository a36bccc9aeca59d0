//! Opens the output directory with the platform file browser.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Program used to show a directory on this platform
pub fn opener() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    }
}

/// Show `dir` with `program` (normally [`opener`]). Failures are logged and
/// reported as `false`.
pub async fn reveal(program: &Path, dir: &Path) -> bool {
    let status = Command::new(program)
        .arg(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(s) if s.success() => {
            tracing::info!(dir = %dir.display(), "revealed output directory");
            true
        }
        Ok(s) => {
            tracing::warn!(program = %program.display(), dir = %dir.display(), %s, "could not reveal output directory");
            false
        }
        Err(e) => {
            tracing::warn!(program = %program.display(), dir = %dir.display(), error = %e, "could not start opener");
            false
        }
    }
}
