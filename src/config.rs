//! Server configuration.
//!
//! Layering, lowest to highest precedence: built-in defaults, a JSON file
//! (`--config PATH`, `CASTELLAN_CONFIG`, or `castellan.json` in the working
//! directory), `CASTELLAN_*` environment variables, command-line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::EvictionOrder;
use crate::error::{AuthError, AuthResult};
use crate::identity::password::PasswordScheme;
use crate::token::codec::{SharedSecret, TokenCodec};
use crate::token::origin::LocalHostIdentity;
use crate::token::validator::{DEFAULT_GRACE_SECS, TokenValidator};

pub const DEFAULT_HTTP_PORT: u16 = 50001;
pub const DEFAULT_CONFIG_FILE: &str = "castellan.json";
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccount {
    pub name: String,
    pub password: String,
}

impl Default for AdminAccount {
    fn default() -> Self { Self { name: "admin".into(), password: "password".into() } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    pub bind_address: String,
    pub shared_secret: Option<String>,
    pub grace_period_secs: i64,
    pub origin_hostnames: Vec<String>,
    pub resource_servers: Vec<String>,
    pub session_encryption: bool,
    pub store_path: Option<PathBuf>,
    pub cache_capacity: usize,
    pub cache_eviction: EvictionOrder,
    pub password_scheme: PasswordScheme,
    /// Created when the store holds no users at startup. `null` disables it.
    pub default_admin: Option<AdminAccount>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            bind_address: "0.0.0.0".into(),
            shared_secret: None,
            grace_period_secs: DEFAULT_GRACE_SECS,
            origin_hostnames: Vec::new(),
            resource_servers: Vec::new(),
            session_encryption: false,
            store_path: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_eviction: EvictionOrder::Insertion,
            password_scheme: PasswordScheme::Pbkdf2,
            default_admin: Some(AdminAccount::default()),
        }
    }
}

/// A `host:port` a client is redirected to after entity login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceServer {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for ResourceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}:{}", self.host, self.port) }
}

impl std::str::FromStr for ResourceServer {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| AuthError::Config(format!("resource server '{s}' is not host:port")))?;
        if host.is_empty() {
            return Err(AuthError::Config(format!("resource server '{s}' has no host")));
        }
        let port = port.parse::<u16>().map_err(|_| AuthError::Config(format!("resource server '{s}' has a bad port")))?;
        Ok(Self { host: host.to_string(), port })
    }
}

/// Token-related values the core needs, already checked.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: Option<SharedSecret>,
    pub grace_secs: i64,
    pub origins: Vec<String>,
}

impl TokenSettings {
    /// Validator for tokens issued under these settings, with the configured origin
    /// hostnames counted as names of this host. `None` without a shared secret.
    pub fn validator(&self) -> Option<TokenValidator> {
        let secret = self.secret.clone()?;
        Some(
            TokenValidator::new(TokenCodec::new(secret))
                .with_grace_secs(self.grace_secs)
                .with_host_identity(Arc::new(LocalHostIdentity::with_aliases(self.origins.clone()))),
        )
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn parse_or<T: std::str::FromStr>(key: &str, v: &str) -> AuthResult<T> {
    v.trim().parse::<T>().map_err(|_| AuthError::Config(format!("{key}: cannot parse '{v}'")))
}

impl ServerConfig {
    pub fn from_json_str(text: &str) -> AuthResult<Self> {
        serde_json::from_str(text).map_err(|e| AuthError::Config(format!("config: {e}")))
    }

    pub fn from_file(path: &Path) -> AuthResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AuthError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Full layering from the process environment and `args` (without the program
    /// name being significant).
    pub fn load(args: &[String]) -> AuthResult<Self> {
        let explicit = arg_value(args, "--config").map(PathBuf::from).or_else(|| std::env::var("CASTELLAN_CONFIG").ok().map(PathBuf::from));
        let mut cfg = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.apply_args(args)?;
        cfg.validate()?;
        info!(target: "startup", port = cfg.http_port, store = ?cfg.store_path, tokens = cfg.shared_secret.is_some(), "configuration loaded");
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> AuthResult<()> {
        if let Some(v) = lookup("CASTELLAN_HTTP_PORT") { self.http_port = parse_or("CASTELLAN_HTTP_PORT", &v)?; }
        if let Some(v) = lookup("CASTELLAN_BIND") { self.bind_address = v; }
        if let Some(v) = lookup("CASTELLAN_SHARED_SECRET") { self.shared_secret = Some(v); }
        if let Some(v) = lookup("CASTELLAN_GRACE_SECS") { self.grace_period_secs = parse_or("CASTELLAN_GRACE_SECS", &v)?; }
        if let Some(v) = lookup("CASTELLAN_ORIGINS") { self.origin_hostnames = split_list(&v); }
        if let Some(v) = lookup("CASTELLAN_RESOURCE_SERVERS") { self.resource_servers = split_list(&v); }
        if let Some(v) = lookup("CASTELLAN_SESSION_ENCRYPTION") {
            self.session_encryption = parse_bool(&v).ok_or_else(|| AuthError::Config(format!("CASTELLAN_SESSION_ENCRYPTION: '{v}'")))?;
        }
        if let Some(v) = lookup("CASTELLAN_STORE") { self.store_path = Some(PathBuf::from(v)); }
        if let Some(v) = lookup("CASTELLAN_CACHE_CAPACITY") { self.cache_capacity = parse_or("CASTELLAN_CACHE_CAPACITY", &v)?; }
        if let Some(v) = lookup("CASTELLAN_PASSWORD_SCHEME") {
            self.password_scheme = match v.to_lowercase().as_str() {
                "pbkdf2" => PasswordScheme::Pbkdf2,
                "argon2" => PasswordScheme::Argon2,
                _ => return Err(AuthError::Config(format!("CASTELLAN_PASSWORD_SCHEME: '{v}'"))),
            };
        }
        Ok(())
    }

    pub fn apply_args(&mut self, args: &[String]) -> AuthResult<()> {
        if let Some(v) = arg_value(args, "--http-port") { self.http_port = parse_or("--http-port", v)?; }
        if let Some(v) = arg_value(args, "--bind") { self.bind_address = v.to_string(); }
        if let Some(v) = arg_value(args, "--store") { self.store_path = Some(PathBuf::from(v)); }
        if let Some(v) = arg_value(args, "--secret") { self.shared_secret = Some(v.to_string()); }
        Ok(())
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.cache_capacity == 0 {
            return Err(AuthError::CacheCapacityMisconfigured);
        }
        if self.grace_period_secs < 0 {
            return Err(AuthError::Config("grace_period_secs must not be negative".into()));
        }
        self.shared_secret()?;
        for rs in &self.resource_servers {
            rs.parse::<ResourceServer>()?;
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn shared_secret(&self) -> AuthResult<Option<SharedSecret>> {
        self.shared_secret.as_deref().map(str::parse::<SharedSecret>).transpose()
    }

    pub fn token_settings(&self) -> AuthResult<TokenSettings> {
        Ok(TokenSettings { secret: self.shared_secret()?, grace_secs: self.grace_period_secs, origins: self.origin_hostnames.clone() })
    }

    /// The resource server clients are sent to: the first one configured.
    pub fn resource_server(&self) -> AuthResult<Option<ResourceServer>> {
        self.resource_servers.first().map(|s| s.parse::<ResourceServer>()).transpose()
    }

    pub fn socket_addr(&self) -> AuthResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.http_port)
            .parse()
            .map_err(|_| AuthError::Config(format!("bad bind address '{}'", self.bind_address)))
    }
}
