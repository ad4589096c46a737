use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::anyhow;
use relayget_core::models::settings::ProxySettings;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

use super::http_client;
use super::process;
use crate::models::media::{FormatInfo, MediaProbe, RequestConfig, TransferEvent, TransferOutput};
use relayget_core::core::events::MediaKind;

const PROGRESS_MARKER: &str = "relayget-progress";
const FILE_MARKER: &str = "relayget-file:";
const STDERR_TAIL_LINES: usize = 20;

fn bin_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

pub async fn find_ytdlp(bin_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(managed) = bin_dir.map(|d| d.join(bin_name())) {
        if managed.exists() {
            return Some(managed);
        }
    }

    let found = process::command_in(bin_name(), bin_dir)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);
    found.then(|| PathBuf::from(bin_name()))
}

pub async fn ensure_ytdlp(
    bin_dir: Option<&Path>,
    proxy: &ProxySettings,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = find_ytdlp(bin_dir).await {
        return Ok(path);
    }
    let dir = bin_dir
        .ok_or_else(|| anyhow!("yt-dlp not found and no managed bin directory is available"))?;
    download_ytdlp_binary(&dir.join(bin_name()), proxy).await
}

async fn download_ytdlp_binary(target: &Path, proxy: &ProxySettings) -> anyhow::Result<PathBuf> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let download_url = if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    };
    tracing::info!("[ytdlp] downloading extractor binary from {}", download_url);

    let client = http_client::client(proxy, concat!("relayget/", env!("CARGO_PKG_VERSION")))?;
    let response = client
        .get(download_url)
        .timeout(std::time::Duration::from_secs(120))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(anyhow!("Failed to download yt-dlp: HTTP {}", response.status()));
    }

    let bytes = response.bytes().await?;
    let staging = target.with_extension("download");
    tokio::fs::write(&staging, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(&staging, perms).await?;
    }
    tokio::fs::rename(&staging, target).await?;

    tracing::info!("[ytdlp] installed {} ({} bytes)", target.display(), bytes.len());
    Ok(target.to_path_buf())
}

/// Flags shared by the probe and the transfer.
pub fn request_args(config: &RequestConfig) -> Vec<String> {
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--user-agent".to_string(),
        config.user_agent.clone(),
    ];
    for (name, value) in &config.headers {
        args.push("--add-header".to_string());
        args.push(format!("{}:{}", name, value));
    }

    let mut extractor_args = format!("youtube:player_client={}", config.player_client);
    if config.skip_streaming_manifests {
        extractor_args.push_str(";skip=hls,dash");
    }
    args.push("--extractor-args".to_string());
    args.push(extractor_args);

    args.extend([
        "--retries".to_string(),
        config.retries.to_string(),
        "--fragment-retries".to_string(),
        config.fragment_retries.to_string(),
        "--socket-timeout".to_string(),
        config.socket_timeout.as_secs().max(1).to_string(),
    ]);
    if let Some(sleep) = config.sleep_between_requests {
        args.push("--sleep-requests".to_string());
        args.push(format!("{:.1}", sleep.as_secs_f64()));
    }
    if config.geo_bypass {
        args.push("--geo-bypass".to_string());
    }
    if config.skip_certificate_check {
        args.push("--no-check-certificates".to_string());
    }
    if let Some(proxy) = &config.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }
    args
}

pub fn transfer_args(url: &str, config: &RequestConfig) -> Vec<String> {
    let output_template = config
        .output_dir
        .join(&config.output_template)
        .to_string_lossy()
        .to_string();

    let mut args = request_args(config);
    args.extend(["-f".to_string(), config.format_selector.clone()]);
    match config.kind {
        MediaKind::Video => {
            args.extend(["--merge-output-format".to_string(), "mp4".to_string()]);
        }
        MediaKind::Audio => {
            args.extend(["-x".to_string(), "--audio-format".to_string(), "mp3".to_string()]);
        }
    }
    args.extend([
        "--no-simulate".to_string(),
        "--progress".to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        format!(
            "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s",
            PROGRESS_MARKER
        ),
        "--print".to_string(),
        format!("after_move:{}%(filepath)s", FILE_MARKER),
        "-o".to_string(),
        output_template,
        url.to_string(),
    ]);
    args
}

pub async fn probe(
    ytdlp: &Path,
    bin_dir: Option<&Path>,
    url: &str,
    config: &RequestConfig,
) -> anyhow::Result<MediaProbe> {
    let mut args = vec!["--dump-json".to_string(), "--skip-download".to_string()];
    args.extend(request_args(config));
    args.push(url.to_string());

    let output = process::command_in(ytdlp, bin_dir)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| anyhow!("Failed to run yt-dlp: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("yt-dlp probe failed: {}", tail(&stderr)));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| anyhow!("yt-dlp returned invalid JSON: {}", e))?;
    Ok(parse_probe(&json))
}

pub async fn transfer(
    ytdlp: &Path,
    bin_dir: Option<&Path>,
    url: &str,
    config: &RequestConfig,
    progress: mpsc::Sender<TransferEvent>,
) -> anyhow::Result<TransferOutput> {
    tokio::fs::create_dir_all(&config.output_dir).await?;
    let args = transfer_args(url, config);

    let mut child = process::command_in(ytdlp, bin_dir)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow!("Failed to start yt-dlp: {}", e))?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("yt-dlp stdout unavailable"))?;
    let mut stderr = child.stderr.take().ok_or_else(|| anyhow!("yt-dlp stderr unavailable"))?;

    let stderr_reader = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut file_path: Option<PathBuf> = None;
    while let Some(line) = lines.next_line().await? {
        if let Some(event) = parse_progress_line(&line) {
            let _ = progress.try_send(event);
        } else if let Some(path) = line.trim().strip_prefix(FILE_MARKER) {
            file_path = Some(PathBuf::from(path));
        }
    }

    let status = child.wait().await.map_err(|e| anyhow!("yt-dlp process failed: {}", e))?;
    let stderr_text = stderr_reader.await.unwrap_or_default();

    if !status.success() {
        return Err(anyhow!("yt-dlp exited with {}: {}", status, tail(&stderr_text)));
    }
    let _ = progress.send(TransferEvent::Finished).await;

    let reported_bytes = match &file_path {
        Some(p) => tokio::fs::metadata(p).await.ok().map(|m| m.len()),
        None => None,
    };
    Ok(TransferOutput {
        file_path,
        reported_bytes,
    })
}

fn parse_count(field: Option<&str>) -> Option<u64> {
    field
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}

pub fn parse_progress_line(line: &str) -> Option<TransferEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.split_whitespace();
    let downloaded_bytes = parse_count(fields.next());
    let total = parse_count(fields.next());
    let estimate = parse_count(fields.next());
    Some(TransferEvent::Downloading {
        downloaded_bytes,
        total_bytes: total.or(estimate),
    })
}

pub fn parse_probe(json: &serde_json::Value) -> MediaProbe {
    MediaProbe {
        title: json
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        duration_seconds: json.get("duration").and_then(|v| v.as_f64()),
        is_live: json.get("is_live").and_then(|v| v.as_bool()).unwrap_or(false),
        available_formats: parse_formats(json),
    }
}

pub fn parse_formats(json: &serde_json::Value) -> Vec<FormatInfo> {
    let Some(formats) = json.get("formats").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    formats
        .iter()
        .filter_map(|f| {
            let format_id = f.get("format_id").and_then(|v| v.as_str())?.to_string();
            let codec_present = |key: &str| {
                f.get(key)
                    .and_then(|v| v.as_str())
                    .map(|v| v != "none")
                    .unwrap_or(false)
            };
            Some(FormatInfo {
                format_id,
                ext: f.get("ext").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                height: f.get("height").and_then(|v| v.as_u64()).map(|v| v as u32),
                has_video: codec_present("vcodec"),
                has_audio: codec_present("acodec"),
                filesize: f
                    .get("filesize")
                    .or_else(|| f.get("filesize_approx"))
                    .and_then(|v| v.as_u64()),
            })
        })
        .collect()
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let joined = lines[start..].join("\n");
    if joined.is_empty() {
        "no error output".to_string()
    } else {
        joined
    }
}
