use std::ffi::OsStr;
use std::path::Path;

fn search_path(bin_dir: Option<&Path>) -> Option<String> {
    let bin_dir = bin_dir?;
    let current = std::env::var("PATH").unwrap_or_default();
    if current.is_empty() {
        return Some(bin_dir.display().to_string());
    }
    let sep = if cfg!(windows) { ";" } else { ":" };
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

/// Child process with `bin_dir` ahead of `PATH` and UTF-8 output forced for
/// the Python-based extractor. The child dies with its handle.
pub fn command_in<S: AsRef<OsStr>>(
    program: S,
    bin_dir: Option<&Path>,
) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    if let Some(path) = search_path(bin_dir) {
        cmd.env("PATH", path);
    }
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd.kill_on_drop(true);
    cmd
}
