//! Application configuration management
//!
//! Loaded once at process start from environment variables (after `.env`
//! has been applied) and shared read-only behind an `Arc` afterwards.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;

use crate::error::RecordResult;
use crate::services::RetentionPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address, all interfaces when unset
    pub host: Option<String>,

    /// Server port
    pub port: u16,

    /// Root of the recording store (`{root}/{app}/{stream}/...`)
    pub record_root: PathBuf,

    /// Segments kept per stream by the retention sweep
    pub keep_segments: usize,

    /// Cron expression for the retention sweep (with seconds field)
    pub retention_schedule: String,

    /// Segments modified within this window are never deleted
    pub retention_grace: Duration,

    /// Streams processed in parallel during a sweep
    pub sweep_concurrency: usize,

    /// Path to ffprobe executable
    pub ffprobe_path: String,

    /// Per-file ffprobe timeout
    pub ffprobe_timeout: Duration,

    /// Offset used to interpret wall-clock segment times
    pub record_tz_offset: FixedOffset,

    /// External media server base URL
    pub media_server_url: String,

    /// Media server INI file that holds the API secret
    pub media_server_config: PathBuf,

    /// Media server API secret, if it could be read
    pub media_server_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let media_server_config = PathBuf::from(
            env::var("MEDIA_SERVER_CONFIG").unwrap_or_else(|_| "/opt/zlm/conf/config.ini".to_string()),
        );

        let media_server_secret = match read_server_secret(&media_server_config) {
            Ok(secret) => Some(secret),
            Err(e) => {
                tracing::warn!(error = %e, "Media server secret not loaded");
                None
            }
        };

        let keep_segments: usize = env_value("KEEP_SEGMENTS", "72")?;
        if keep_segments == 0 {
            bail!("KEEP_SEGMENTS must be at least 1");
        }

        let record_tz_offset = parse_offset(
            &env::var("RECORD_TZ_OFFSET").unwrap_or_else(|_| "+08:00".to_string()),
        )
        .context("Invalid RECORD_TZ_OFFSET")?;

        Ok(Self {
            host: env::var("HOST").ok(),

            port: env_value("PORT", "10801")?,

            record_root: PathBuf::from(
                env::var("RECORD_ROOT").unwrap_or_else(|_| "/opt/zlm/record".to_string()),
            ),

            keep_segments,

            retention_schedule: env::var("RETENTION_SCHEDULE")
                .unwrap_or_else(|_| "0 0 0 * * *".to_string()),

            retention_grace: Duration::from_secs(env_value("RETENTION_GRACE_SECS", "0")?),

            sweep_concurrency: env_value::<usize>("SWEEP_CONCURRENCY", "4")?.max(1),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            ffprobe_timeout: Duration::from_secs(env_value("FFPROBE_TIMEOUT_SECS", "30")?),

            record_tz_offset,

            media_server_url: env::var("MEDIA_SERVER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),

            media_server_config,
            media_server_secret,
        })
    }

    /// Retention policy described by this configuration
    pub fn retention_policy(&self) -> RecordResult<RetentionPolicy> {
        Ok(RetentionPolicy::new(self.keep_segments)?.with_grace(self.retention_grace))
    }
}

/// Read a numeric variable, falling back to `default` only when it is unset
fn env_value<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    parse_value(key, &raw)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {key}: '{raw}'"))
}

/// Parse a fixed UTC offset such as `+08:00`, `-0530` or `Z`
pub fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).context("zero offset");
    }

    let (sign, rest) = match raw.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => bail!("offset must start with '+' or '-': {raw}"),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("offset must look like +HH:MM: {raw}");
    }
    let hours: i32 = digits[..2].parse()?;
    let minutes: i32 = digits[2..].parse()?;

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("offset out of range: {raw}"))
}

/// Read `secret=...` from the media server's INI configuration
///
/// Blank lines and lines starting with `#` or `;` are ignored. The first
/// line starting with `secret` decides the outcome.
pub fn read_server_secret(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("config file does not exist: {}", path.display());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_server_secret(&contents)
        .with_context(|| format!("no usable secret in {}", path.display()))
}

fn parse_server_secret(contents: &str) -> Result<String> {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if !line.starts_with("secret") {
            continue;
        }

        let Some((_, value)) = line.split_once('=') else {
            bail!("secret entry must look like secret=xxx");
        };
        let value = value.trim();
        if value.is_empty() {
            bail!("secret value must not be empty");
        }
        return Ok(value.to_string());
    }
    bail!("'secret' entry not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+08:00").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("08:00").is_err());
        assert!(parse_offset("+8").is_err());
        assert!(parse_offset("+99:00").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<usize>("SWEEP_CONCURRENCY", "8").unwrap(), 8);
        assert_eq!(parse_value::<u64>("FFPROBE_TIMEOUT_SECS", " 45 ").unwrap(), 45);

        let err = parse_value::<usize>("SWEEP_CONCURRENCY", "lots").unwrap_err();
        assert!(err.to_string().contains("Invalid SWEEP_CONCURRENCY"));
        let err = parse_value::<u64>("FFPROBE_TIMEOUT_SECS", "-1").unwrap_err();
        assert!(err.to_string().contains("Invalid FFPROBE_TIMEOUT_SECS"));
        assert!(parse_value::<u16>("PORT", "70000").is_err());
    }

    #[test]
    fn test_parse_server_secret() {
        let ini = "\
; media server config
[api]
# comment
apiDebug=1
secret = 035c73f7-bb6b-4889-a715-d9eb2d1925cc
snapRoot=./www/snap/
";
        assert_eq!(
            parse_server_secret(ini).unwrap(),
            "035c73f7-bb6b-4889-a715-d9eb2d1925cc"
        );
    }

    #[test]
    fn test_parse_server_secret_errors() {
        assert!(parse_server_secret("[api]\napiDebug=1\n").is_err());
        assert!(parse_server_secret("secret=\n").is_err());
        assert!(parse_server_secret("secret\n").is_err());
        // Commented-out entries do not count
        assert!(parse_server_secret("#secret=abc\n").is_err());
    }

    #[test]
    fn test_read_server_secret_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(read_server_secret(&dir.path().join("config.ini")).is_err());

        let path = dir.path().join("config.ini");
        fs::write(&path, "secret=abc\n").unwrap();
        assert_eq!(read_server_secret(&path).unwrap(), "abc");
    }
}
