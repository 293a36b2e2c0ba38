#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_CONVERTED_DIR: &str = "converted";
pub const DEFAULT_WWW_ROOT: &str = "www";
pub const DEFAULT_GRABDECK_PORT: u16 = 8501;
pub const DEFAULT_GRABDECK_HOST: &str = "127.0.0.1";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Every location and external program the server touches at runtime.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub downloads_dir: PathBuf,
    pub converted_dir: PathBuf,
    pub www_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    /// Idle time after which a session and its registries are dropped.
    pub session_ttl: Duration,
}

impl RuntimePaths {
    /// Creates the downloads and converted directories. The server refuses to
    /// start when this fails.
    pub fn prepare(&self) -> Result<()> {
        for dir in [&self.downloads_dir, &self.converted_dir] {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub downloads_dir: Option<PathBuf>,
    pub converted_dir: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub yt_dlp: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub session_ttl_secs: Option<u64>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_paths(overrides: RuntimeOverrides) -> Result<RuntimePaths> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_paths_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_paths(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimePaths {
    build_runtime_paths_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_paths_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimePaths {
    let path_value = |override_value: Option<PathBuf>, key: &str, default: &str| {
        override_value
            .or_else(|| lookup_value(key, file_vars, &env_lookup).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };

    let downloads_dir = path_value(
        overrides.downloads_dir,
        "GRABDECK_DOWNLOADS_DIR",
        DEFAULT_DOWNLOADS_DIR,
    );
    let converted_dir = path_value(
        overrides.converted_dir,
        "GRABDECK_CONVERTED_DIR",
        DEFAULT_CONVERTED_DIR,
    );
    let www_root = path_value(overrides.www_root, "GRABDECK_WWW_ROOT", DEFAULT_WWW_ROOT);
    let yt_dlp = path_value(overrides.yt_dlp, "GRABDECK_YT_DLP", DEFAULT_YT_DLP);
    let ffmpeg = path_value(overrides.ffmpeg, "GRABDECK_FFMPEG", DEFAULT_FFMPEG);
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("GRABDECK_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_GRABDECK_PORT);
    let session_ttl_secs = overrides
        .session_ttl_secs
        .or_else(|| {
            lookup_value("GRABDECK_SESSION_TTL_SECS", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u64>().ok())
        })
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_SESSION_TTL_SECS);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup_value("GRABDECK_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GRABDECK_HOST.to_string());

    RuntimePaths {
        downloads_dir,
        converted_dir,
        www_root,
        port,
        host,
        yt_dlp,
        ffmpeg,
        session_ttl: Duration::from_secs(session_ttl_secs),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn runtime_from(contents: &str) -> RuntimePaths {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_paths(&vars, |_| None)
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let runtime = build_runtime_paths(&HashMap::new(), |_| None);
        assert_eq!(runtime.downloads_dir, PathBuf::from(DEFAULT_DOWNLOADS_DIR));
        assert_eq!(runtime.converted_dir, PathBuf::from(DEFAULT_CONVERTED_DIR));
        assert_eq!(runtime.www_root, PathBuf::from(DEFAULT_WWW_ROOT));
        assert_eq!(runtime.port, DEFAULT_GRABDECK_PORT);
        assert_eq!(runtime.host, DEFAULT_GRABDECK_HOST);
        assert_eq!(runtime.yt_dlp, PathBuf::from(DEFAULT_YT_DLP));
        assert_eq!(runtime.ffmpeg, PathBuf::from(DEFAULT_FFMPEG));
        assert_eq!(
            runtime.session_ttl,
            Duration::from_secs(DEFAULT_SESSION_TTL_SECS)
        );
    }

    #[test]
    fn session_ttl_comes_from_env_and_rejects_zero() {
        let runtime = runtime_from("GRABDECK_SESSION_TTL_SECS=90\n");
        assert_eq!(runtime.session_ttl, Duration::from_secs(90));

        let runtime = runtime_from("GRABDECK_SESSION_TTL_SECS=0\n");
        assert_eq!(
            runtime.session_ttl,
            Duration::from_secs(DEFAULT_SESSION_TTL_SECS)
        );

        let runtime = build_runtime_paths_with_overrides(
            &HashMap::new(),
            |_| Some("120".to_string()),
            RuntimeOverrides {
                session_ttl_secs: Some(15),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(runtime.session_ttl, Duration::from_secs(15));
    }

    #[test]
    fn env_file_sets_directories_and_port() {
        let runtime = runtime_from(
            "GRABDECK_DOWNLOADS_DIR=\"/srv/dl\"\nGRABDECK_CONVERTED_DIR=\"/srv/conv\"\nGRABDECK_PORT=\"4242\"\n",
        );
        assert_eq!(runtime.downloads_dir, PathBuf::from("/srv/dl"));
        assert_eq!(runtime.converted_dir, PathBuf::from("/srv/conv"));
        assert_eq!(runtime.port, 4242);
    }

    #[test]
    fn env_file_sets_host_and_programs() {
        let runtime = runtime_from(
            "GRABDECK_HOST=\"0.0.0.0\"\nGRABDECK_YT_DLP=/opt/bin/yt-dlp\nGRABDECK_FFMPEG=/opt/bin/ffmpeg\n",
        );
        assert_eq!(runtime.host, "0.0.0.0");
        assert_eq!(runtime.yt_dlp, PathBuf::from("/opt/bin/yt-dlp"));
        assert_eq!(runtime.ffmpeg, PathBuf::from("/opt/bin/ffmpeg"));
    }

    #[test]
    fn environment_wins_over_file() {
        let vars = read_env_file(make_config("GRABDECK_DOWNLOADS_DIR=\"/file\"\n").path()).unwrap();
        let runtime = build_runtime_paths(&vars, |key| {
            if key == "GRABDECK_DOWNLOADS_DIR" {
                Some("/env".to_string())
            } else {
                None
            }
        });
        assert_eq!(runtime.downloads_dir, PathBuf::from("/env"));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export GRABDECK_DOWNLOADS_DIR="/media"
            GRABDECK_WWW_ROOT='/www'
            GRABDECK_HOST =  "0.0.0.0"
            GRABDECK_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("GRABDECK_DOWNLOADS_DIR").unwrap(), "/media");
        assert_eq!(vars.get("GRABDECK_WWW_ROOT").unwrap(), "/www");
        assert_eq!(vars.get("GRABDECK_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("GRABDECK_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn override_precedence() {
        let mut vars = HashMap::new();
        vars.insert("GRABDECK_DOWNLOADS_DIR".to_string(), "/file-dl".to_string());
        vars.insert("GRABDECK_WWW_ROOT".to_string(), "/file-www".to_string());
        vars.insert("GRABDECK_HOST".to_string(), "file-host".to_string());
        vars.insert("GRABDECK_PORT".to_string(), "7000".to_string());

        let overrides = RuntimeOverrides {
            downloads_dir: Some(PathBuf::from("/override-dl")),
            port: Some(9000),
            host: Some("override-host".into()),
            ..RuntimeOverrides::default()
        };

        let runtime = build_runtime_paths_with_overrides(
            &vars,
            |key| {
                if key == "GRABDECK_WWW_ROOT" {
                    Some("/env-www".to_string())
                } else if key == "GRABDECK_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        );

        assert_eq!(runtime.downloads_dir, PathBuf::from("/override-dl"));
        assert_eq!(runtime.www_root, PathBuf::from("/env-www"));
        assert_eq!(runtime.port, 9000);
        assert_eq!(runtime.host, "override-host");
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let runtime = build_runtime_paths_with_overrides(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(runtime.host, DEFAULT_GRABDECK_HOST);
    }

    #[test]
    fn invalid_port_defaults() {
        let runtime = runtime_from("GRABDECK_PORT=\"nope\"\n");
        assert_eq!(runtime.port, DEFAULT_GRABDECK_PORT);
    }

    #[test]
    fn prepare_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = build_runtime_paths_with_overrides(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                downloads_dir: Some(dir.path().join("downloads")),
                converted_dir: Some(dir.path().join("converted")),
                ..RuntimeOverrides::default()
            },
        );
        runtime.prepare().unwrap();
        assert!(runtime.downloads_dir.is_dir());
        assert!(runtime.converted_dir.is_dir());
        // second call is a no-op
        runtime.prepare().unwrap();
    }

    #[test]
    fn prepare_fails_when_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("downloads");
        fs::write(&blocker, "not a dir").unwrap();
        let runtime = build_runtime_paths_with_overrides(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                downloads_dir: Some(blocker),
                converted_dir: Some(dir.path().join("converted")),
                ..RuntimeOverrides::default()
            },
        );
        assert!(runtime.prepare().is_err());
    }
}
