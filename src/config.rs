//! CLI arguments, legacy flag spellings and the immutable server configuration.

use clap::Parser;
use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

use crate::auth::{AuthMode, CredentialGate};
use crate::policy::{ExtensionRule, FilterMode};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_STORAGE_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;
/// Room for multipart boundaries and part headers on top of the file itself.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;
pub const UPLOAD_FIELD: &str = "file";
pub const PASSWORD_HEADER: &str = "x-password";
pub const BASIC_AUTH_USER: &str = "admin";
pub const BASIC_AUTH_REALM: &str = r#"Basic realm="File Vault""#;

/// Single-dash long flags accepted for compatibility with older launch scripts.
const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("-pass", "--password"),
    ("-ext", "--ext"),
    ("-type", "--type"),
    ("-dir", "--directory"),
];

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "file-vault", version, about = "Password protected file vault")]
pub struct Args {
    #[arg(
        short = 'p',
        long,
        env = "VAULT_PORT",
        default_value_t = DEFAULT_PORT,
        help = "Listen port"
    )]
    pub port: u16,
    #[arg(
        short = 'b',
        long,
        env = "VAULT_BIND",
        default_value = DEFAULT_BIND,
        help = "Bind address"
    )]
    pub bind: String,
    #[arg(
        long,
        env = "VAULT_PASSWORD",
        hide_env_values = true,
        help = "Access password (omit for an open vault)"
    )]
    pub password: Option<String>,
    #[arg(
        long = "ext",
        env = "VAULT_EXT",
        num_args = 1..,
        value_delimiter = ',',
        help = "File extensions for the filter rule (requires --type)"
    )]
    pub ext: Vec<String>,
    #[arg(
        long = "type",
        env = "VAULT_TYPE",
        value_name = "MODE",
        help = "Filter rule type: whitelist or blacklist (requires --ext)"
    )]
    pub filter_type: Option<String>,
    #[arg(
        long,
        env = "VAULT_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Storage directory for uploaded files"
    )]
    pub directory: PathBuf,
    #[arg(
        long,
        env = "VAULT_AUTH_MODE",
        value_enum,
        default_value_t = AuthMode::Header,
        help = "How clients present the password"
    )]
    pub auth_mode: AuthMode,
    #[arg(
        long,
        env = "VAULT_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload size in bytes"
    )]
    pub max_upload_size: u64,
}

impl Args {
    /// Parses the process arguments after rewriting legacy flag spellings.
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_legacy_flags(std::env::args_os()))
    }
}

/// Rewrites `-pass`, `-ext`, `-type` and `-dir` (also in `-flag=value` form)
/// into their double-dash equivalents. Arguments after `--` are left alone.
pub fn normalize_legacy_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if passthrough {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                passthrough = true;
                return arg;
            }
            for (legacy, modern) in LEGACY_FLAGS {
                if text == *legacy {
                    return OsString::from(*modern);
                }
                if let Some(value) = text
                    .strip_prefix(legacy)
                    .and_then(|rest| rest.strip_prefix('='))
                {
                    return OsString::from(format!("{modern}={value}"));
                }
            }
            arg
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("-ext requires -type (whitelist/blacklist)")]
    ExtensionsWithoutType,
    #[error("-type requires -ext with at least one extension")]
    TypeWithoutExtensions,
    #[error("unknown filter type `{0}`, expected whitelist or blacklist")]
    UnknownFilterMode(String),
    #[error("max upload size must be greater than zero")]
    ZeroUploadLimit,
    #[error("invalid bind address `{0}`")]
    InvalidBind(String),
    #[error("storage directory {path:?} is unusable: {source}")]
    StorageDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Process-wide settings, built once at startup and never mutated.
#[derive(Debug)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub gate: CredentialGate,
    pub extension_rule: Option<ExtensionRule>,
    pub max_upload_size: u64,
}

impl ServerConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let extension_rule = build_extension_rule(&args.ext, args.filter_type.as_deref())?;
        if args.max_upload_size == 0 {
            return Err(ConfigError::ZeroUploadLimit);
        }
        let bind = args
            .bind
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidBind(args.bind.clone()))?;
        let storage_dir =
            std::path::absolute(&args.directory).map_err(|source| ConfigError::StorageDirectory {
                path: args.directory.clone(),
                source,
            })?;

        Ok(Self {
            bind,
            port: args.port,
            storage_dir,
            gate: CredentialGate::new(args.auth_mode, args.password),
            extension_rule,
            max_upload_size: args.max_upload_size,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Request body limit handed to axum; the file itself is capped by storage.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_size.saturating_add(MULTIPART_OVERHEAD))
            .unwrap_or(usize::MAX)
    }
}

fn build_extension_rule(
    extensions: &[String],
    filter_type: Option<&str>,
) -> Result<Option<ExtensionRule>, ConfigError> {
    let extensions: Vec<&str> = extensions
        .iter()
        .map(|ext| ext.trim())
        .filter(|ext| !ext.is_empty())
        .collect();
    match (extensions.is_empty(), filter_type) {
        (true, None) => Ok(None),
        (false, None) => Err(ConfigError::ExtensionsWithoutType),
        (true, Some(_)) => Err(ConfigError::TypeWithoutExtensions),
        (false, Some(name)) => match FilterMode::from_name(name) {
            FilterMode::Unrecognized => Err(ConfigError::UnknownFilterMode(name.to_string())),
            mode => Ok(Some(ExtensionRule::new(mode, extensions))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["file-vault"];
        argv.extend_from_slice(args);
        Args::try_parse_from(normalize_legacy_flags(argv)).expect("parse args")
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::from_args(parse(&[])).expect("config");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
        assert!(config.storage_dir.is_absolute());
        assert!(config.storage_dir.ends_with(DEFAULT_STORAGE_DIR));
        assert!(config.gate.is_open());
        assert!(config.extension_rule.is_none());
    }

    #[test]
    fn legacy_single_dash_flags_are_accepted() {
        let args = parse(&[
            "-p", "8080", "-pass", "hunter2", "-type", "whitelist", "-ext", "pdf", "docx",
            "-dir", "/tmp/vault",
        ]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.password.as_deref(), Some("hunter2"));
        assert_eq!(args.filter_type.as_deref(), Some("whitelist"));
        assert_eq!(args.ext, vec!["pdf", "docx"]);
        assert_eq!(args.directory, PathBuf::from("/tmp/vault"));

        let config = ServerConfig::from_args(args).expect("config");
        let rule = config.extension_rule.expect("rule");
        assert_eq!(rule.mode(), FilterMode::Whitelist);
        assert!(rule.allows("report.PDF"));
        assert!(!rule.allows("virus.exe"));
    }

    #[test]
    fn legacy_flags_with_equals_are_rewritten() {
        let argv = normalize_legacy_flags(["file-vault", "-pass=a=b", "--", "-dir"]);
        assert_eq!(argv[1], OsString::from("--password=a=b"));
        assert_eq!(argv[3], OsString::from("-dir"));
    }

    #[test]
    fn extensions_without_type_fail_fast() {
        let result = ServerConfig::from_args(parse(&["-ext", "pdf"]));
        assert!(matches!(result, Err(ConfigError::ExtensionsWithoutType)));
    }

    #[test]
    fn type_without_extensions_fails_fast() {
        let result = ServerConfig::from_args(parse(&["-type", "blacklist"]));
        assert!(matches!(result, Err(ConfigError::TypeWithoutExtensions)));
    }

    #[test]
    fn unknown_filter_type_is_rejected() {
        let result = ServerConfig::from_args(parse(&["-type", "greylist", "-ext", "exe"]));
        assert!(matches!(result, Err(ConfigError::UnknownFilterMode(name)) if name == "greylist"));
    }

    #[test]
    fn zero_upload_limit_is_rejected() {
        let result = ServerConfig::from_args(parse(&["--max-upload-size", "0"]));
        assert!(matches!(result, Err(ConfigError::ZeroUploadLimit)));
    }

    #[test]
    fn basic_mode_with_password_builds_hashed_gate() {
        let config = ServerConfig::from_args(parse(&["-pass", "pw", "--auth-mode", "basic"]))
            .expect("config");
        assert!(matches!(config.gate, CredentialGate::Basic(_)));
    }

    #[test]
    fn body_limit_adds_multipart_overhead() {
        let config = ServerConfig::from_args(parse(&["--max-upload-size", "10"])).expect("config");
        assert_eq!(config.body_limit() as u64, 10 + MULTIPART_OVERHEAD);
    }
}
