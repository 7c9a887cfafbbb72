use attend_core::{ByteOrder, MismatchPolicy, Tolerance, EMBEDDING_DIM};
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173,http://localhost:3000";
const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 127.0.0.1:8000).
    pub bind_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: Tolerance,
    /// Expected embedding length for incoming requests.
    pub embedding_dim: usize,
    /// Handling of stored embeddings whose length differs from the query.
    pub mismatch_policy: MismatchPolicy,
    /// Byte order of stored embedding blobs.
    pub byte_order: ByteOrder,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("attend");

        let db_path = lookup("ATTEND_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("faces.db"));

        let bind_addr = parse_or(&lookup, "ATTEND_BIND_ADDR", || {
            DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8000)))
        });

        let tolerance = match lookup("ATTEND_TOLERANCE").map(|v| v.parse::<f64>()) {
            None => Tolerance::default(),
            Some(Ok(v)) => Tolerance::new(v).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "invalid ATTEND_TOLERANCE; using default");
                Tolerance::default()
            }),
            Some(Err(_)) => {
                tracing::warn!("unparseable ATTEND_TOLERANCE; using default");
                Tolerance::default()
            }
        };
        if tolerance.value() > 1.0 {
            tracing::warn!(
                tolerance = tolerance.value(),
                "tolerance above 1.0: matches past distance 1.0 report zero confidence"
            );
        }

        let mismatch_policy = match lookup("ATTEND_MISMATCH_POLICY").as_deref() {
            Some("reject") => MismatchPolicy::Reject,
            Some("skip") | None => MismatchPolicy::Skip,
            Some(other) => {
                tracing::warn!(value = other, "unknown ATTEND_MISMATCH_POLICY; using skip");
                MismatchPolicy::Skip
            }
        };

        let allowed_origins = lookup("ATTEND_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        let embedding_dim = match parse_or(&lookup, "ATTEND_EMBEDDING_DIM", || EMBEDDING_DIM) {
            0 => {
                tracing::warn!("ATTEND_EMBEDDING_DIM must be positive; using default");
                EMBEDDING_DIM
            }
            dim => dim,
        };

        Self {
            bind_addr,
            db_path,
            tolerance,
            embedding_dim,
            mismatch_policy,
            byte_order: parse_or(&lookup, "ATTEND_BYTE_ORDER", ByteOrder::default),
            allowed_origins,
            max_body_bytes: parse_or(&lookup, "ATTEND_MAX_BODY_BYTES", || {
                DEFAULT_MAX_BODY_BYTES
            }),
        }
    }
}

/// Parse `key` if set, warning and falling back to `default` on a bad value.
fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: impl FnOnce() -> T,
) -> T {
    match lookup(key) {
        None => default(),
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable value; using default");
            default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("HOME", "/home/clerk")]);
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8000");
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/clerk/.local/share/attend/faces.db")
        );
        assert_eq!(config.tolerance.value(), 0.6);
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.mismatch_policy, MismatchPolicy::Skip);
        assert_eq!(config.byte_order, ByteOrder::Little);
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:5173", "http://localhost:3000"]
        );
        assert_eq!(config.max_body_bytes, 5_242_880);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("ATTEND_BIND_ADDR", "0.0.0.0:9100"),
            ("ATTEND_DB_PATH", "/var/lib/attend/faces.db"),
            ("ATTEND_TOLERANCE", "0.45"),
            ("ATTEND_EMBEDDING_DIM", "512"),
            ("ATTEND_MISMATCH_POLICY", "reject"),
            ("ATTEND_BYTE_ORDER", "big"),
            ("ATTEND_ALLOWED_ORIGINS", " https://a.example , ,https://b.example"),
        ]);
        assert_eq!(config.bind_addr.port(), 9100);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/attend/faces.db"));
        assert_eq!(config.tolerance.value(), 0.45);
        assert_eq!(config.embedding_dim, 512);
        assert_eq!(config.mismatch_policy, MismatchPolicy::Reject);
        assert_eq!(config.byte_order, ByteOrder::Big);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_invalid_tolerance_falls_back() {
        assert_eq!(config_from(&[("ATTEND_TOLERANCE", "-1")]).tolerance.value(), 0.6);
        assert_eq!(config_from(&[("ATTEND_TOLERANCE", "abc")]).tolerance.value(), 0.6);
    }

    #[test]
    fn test_zero_embedding_dim_falls_back() {
        assert_eq!(config_from(&[("ATTEND_EMBEDDING_DIM", "0")]).embedding_dim, 128);
        assert_eq!(config_from(&[("ATTEND_EMBEDDING_DIM", "-3")]).embedding_dim, 128);
    }

    #[test]
    fn test_byte_order_spellings() {
        assert_eq!(
            config_from(&[("ATTEND_BYTE_ORDER", "big-endian")]).byte_order,
            ByteOrder::Big
        );
        assert_eq!(
            config_from(&[("ATTEND_BYTE_ORDER", " BE ")]).byte_order,
            ByteOrder::Big
        );
        assert_eq!(
            config_from(&[("ATTEND_BYTE_ORDER", "sideways")]).byte_order,
            ByteOrder::Little
        );
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        let config = config_from(&[
            ("ATTEND_BIND_ADDR", "not-an-addr"),
            ("ATTEND_MAX_BODY_BYTES", "5MB"),
        ]);
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8000");
        assert_eq!(config.max_body_bytes, 5_242_880);
    }

    #[test]
    fn test_xdg_data_home() {
        let config = config_from(&[("XDG_DATA_HOME", "/data")]);
        assert_eq!(config.db_path, PathBuf::from("/data/attend/faces.db"));
    }
}
