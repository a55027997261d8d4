use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubefetch-env";
pub const DEFAULT_TUBEFETCH_PORT: u16 = 3000;
pub const DEFAULT_TUBEFETCH_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=info";

/// Raw values read from the env file. Everything is optional; defaults are
/// applied by [`load_server_config_from`].
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub tubefetch_host: Option<String>,
    pub tubefetch_port: Option<u16>,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub log_filter: String,
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "TUBEFETCH_HOST" => cfg.tubefetch_host = Some(value.to_string()),
                "TUBEFETCH_PORT" => {
                    let port: u16 = value.parse().with_context(|| {
                        format!("Parsing TUBEFETCH_PORT from {}", path.display())
                    })?;
                    cfg.tubefetch_port = Some(port);
                }
                "YTDLP_PATH" => cfg.ytdlp_path = Some(PathBuf::from(value)),
                "FFMPEG_PATH" => cfg.ffmpeg_path = Some(PathBuf::from(value)),
                "COOKIES_FILE" => cfg.cookies_file = Some(PathBuf::from(value)),
                "LOG_FILTER" => cfg.log_filter = Some(value.to_string()),
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Loads the server configuration. A missing file is not an error: the
/// service runs on defaults out of the box.
pub fn load_server_config_from(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(ServerConfig {
        host: cfg
            .tubefetch_host
            .unwrap_or_else(|| DEFAULT_TUBEFETCH_HOST.to_string()),
        port: cfg.tubefetch_port.unwrap_or(DEFAULT_TUBEFETCH_PORT),
        ytdlp_path: cfg
            .ytdlp_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_PATH)),
        ffmpeg_path: cfg
            .ffmpeg_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_PATH)),
        cookies_file: cfg.cookies_file,
        log_filter: cfg
            .log_filter
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_env_config_extracts_port() {
        let cfg = make_config("TUBEFETCH_PORT=\"4242\"\n");
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.tubefetch_port, Some(4242));
    }

    #[test]
    fn read_env_config_rejects_bad_port() {
        let cfg = make_config("TUBEFETCH_PORT=eighty\n");
        assert!(read_env_config(cfg.path()).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = load_server_config_from(dir.path().join("absent-env")).unwrap();
        assert_eq!(runtime.port, DEFAULT_TUBEFETCH_PORT);
        assert_eq!(runtime.host, DEFAULT_TUBEFETCH_HOST);
        assert_eq!(runtime.ytdlp_path, PathBuf::from(DEFAULT_YTDLP_PATH));
        assert_eq!(runtime.ffmpeg_path, PathBuf::from(DEFAULT_FFMPEG_PATH));
        assert!(runtime.cookies_file.is_none());
    }

    #[test]
    fn load_server_config_reads_tool_paths() {
        let cfg = make_config(
            "# tools\nYTDLP_PATH=/opt/yt-dlp\nFFMPEG_PATH=\"/opt/ffmpeg\"\nCOOKIES_FILE=/etc/cookies.txt\nTUBEFETCH_HOST=0.0.0.0\nLOG_FILTER=debug\n",
        );
        let runtime = load_server_config_from(cfg.path()).unwrap();
        assert_eq!(runtime.ytdlp_path, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(runtime.ffmpeg_path, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(runtime.cookies_file, Some(PathBuf::from("/etc/cookies.txt")));
        assert_eq!(runtime.host, "0.0.0.0");
        assert_eq!(runtime.log_filter, "debug");
    }
}
