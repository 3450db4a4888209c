//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CliArgs, Command, MigrateArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cms-sync";
const ENV_PREFIX: &str = "CMS_SYNC";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_STATEMENT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WEBHOOK_MAX_REQUESTS_PER_HOUR: u64 = 1000;
const DEFAULT_CMS_DATASET: &str = "production";
const DEFAULT_CMS_API_VERSION: &str = "2024-01-01";
const DEFAULT_CMS_QUERY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CMS_LANGUAGE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CMS_RELATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CDN_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CDN_MAX_URLS_PER_REQUEST: usize = 30;
const DEFAULT_IMAGE_CDN_BASE_URL: &str = "https://cdn.sanity.io/images";
const DEFAULT_IMAGE_VARIANT_WIDTHS: [u32; 5] = [320, 640, 960, 1280, 1920];
const DEFAULT_INVALIDATION_DEBOUNCE_MS: u64 = 100;
const DEFAULT_LANGUAGES: [&str; 2] = ["en", "zh"];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub webhook: WebhookSettings,
    pub cms: CmsSettings,
    pub cdn: CdnSettings,
    pub images: ImageSettings,
    pub invalidation: InvalidationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Signing secret; requests are refused with 500 while unset.
    pub secret: Option<String>,
    pub max_requests_per_hour: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CmsSettings {
    pub project_id: Option<String>,
    pub dataset: String,
    pub api_version: String,
    pub token: Option<String>,
    pub query_timeout: Duration,
    pub language_timeout: Duration,
    pub relation_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CdnSettings {
    pub zone_id: Option<String>,
    pub api_token: Option<String>,
    pub site_url: Option<Url>,
    pub request_timeout: Duration,
    pub max_urls_per_request: NonZeroUsize,
}

impl CdnSettings {
    /// Zone id and token, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.zone_id.as_deref()?, self.api_token.as_deref()?))
    }
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub cdn_base_url: String,
    pub variant_widths: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub debounce: Duration,
    pub revalidate_url: Option<Url>,
    pub revalidate_secret: Option<String>,
    pub languages: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("invalidation.languages")
            .with_list_parse_key("images.variant_widths"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_migrate_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    webhook: RawWebhookSettings,
    cms: RawCmsSettings,
    cdn: RawCdnSettings,
    images: RawImageSettings,
    invalidation: RawInvalidationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(secret) = overrides.webhook_secret.as_ref() {
            self.webhook.secret = Some(secret.clone());
        }
        if let Some(debounce) = overrides.invalidation_debounce_ms {
            self.invalidation.debounce_ms = Some(debounce);
        }
    }

    fn apply_migrate_overrides(&mut self, args: &MigrateArgs) {
        if let Some(url) = args.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            webhook,
            cms,
            cdn,
            images,
            invalidation,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            webhook: build_webhook_settings(webhook)?,
            cms: build_cms_settings(cms)?,
            cdn: build_cdn_settings(cdn)?,
            images: build_image_settings(images)?,
            invalidation: build_invalidation_settings(invalidation)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;
    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "admin listener must not share the webhook listener address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let timeout_secs = database
        .statement_timeout_seconds
        .unwrap_or(DEFAULT_DB_STATEMENT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "database.statement_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(DatabaseSettings {
        url,
        max_connections,
        statement_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_webhook_settings(webhook: RawWebhookSettings) -> Result<WebhookSettings, LoadError> {
    let max_requests_per_hour = non_zero_u32(
        webhook
            .max_requests_per_hour
            .unwrap_or(DEFAULT_WEBHOOK_MAX_REQUESTS_PER_HOUR),
        "webhook.max_requests_per_hour",
    )?;

    Ok(WebhookSettings {
        secret: non_blank(webhook.secret),
        max_requests_per_hour,
    })
}

fn build_cms_settings(cms: RawCmsSettings) -> Result<CmsSettings, LoadError> {
    let dataset = non_blank(cms.dataset).unwrap_or_else(|| DEFAULT_CMS_DATASET.to_string());
    let api_version =
        non_blank(cms.api_version).unwrap_or_else(|| DEFAULT_CMS_API_VERSION.to_string());

    Ok(CmsSettings {
        project_id: non_blank(cms.project_id),
        dataset,
        api_version,
        token: non_blank(cms.token),
        query_timeout: positive_millis(
            cms.query_timeout_ms.unwrap_or(DEFAULT_CMS_QUERY_TIMEOUT_MS),
            "cms.query_timeout_ms",
        )?,
        language_timeout: positive_millis(
            cms.language_timeout_ms
                .unwrap_or(DEFAULT_CMS_LANGUAGE_TIMEOUT_MS),
            "cms.language_timeout_ms",
        )?,
        relation_timeout: positive_millis(
            cms.relation_timeout_ms
                .unwrap_or(DEFAULT_CMS_RELATION_TIMEOUT_MS),
            "cms.relation_timeout_ms",
        )?,
    })
}

fn build_cdn_settings(cdn: RawCdnSettings) -> Result<CdnSettings, LoadError> {
    let site_url = non_blank(cdn.site_url)
        .map(|value| parse_url(&value, "cdn.site_url"))
        .transpose()?;

    let timeout_secs = cdn
        .request_timeout_seconds
        .unwrap_or(DEFAULT_CDN_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "cdn.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_urls = cdn
        .max_urls_per_request
        .unwrap_or(DEFAULT_CDN_MAX_URLS_PER_REQUEST);
    let max_urls_per_request = NonZeroUsize::new(max_urls).ok_or_else(|| {
        LoadError::invalid("cdn.max_urls_per_request", "must be greater than zero")
    })?;

    Ok(CdnSettings {
        zone_id: non_blank(cdn.zone_id),
        api_token: non_blank(cdn.api_token),
        site_url,
        request_timeout: Duration::from_secs(timeout_secs),
        max_urls_per_request,
    })
}

fn build_image_settings(images: RawImageSettings) -> Result<ImageSettings, LoadError> {
    let cdn_base_url =
        non_blank(images.cdn_base_url).unwrap_or_else(|| DEFAULT_IMAGE_CDN_BASE_URL.to_string());
    parse_url(&cdn_base_url, "images.cdn_base_url")?;

    let variant_widths = images
        .variant_widths
        .unwrap_or_else(|| DEFAULT_IMAGE_VARIANT_WIDTHS.to_vec());
    if variant_widths.contains(&0) {
        return Err(LoadError::invalid(
            "images.variant_widths",
            "widths must be greater than zero",
        ));
    }

    Ok(ImageSettings {
        cdn_base_url,
        variant_widths,
    })
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let debounce = Duration::from_millis(
        invalidation
            .debounce_ms
            .unwrap_or(DEFAULT_INVALIDATION_DEBOUNCE_MS),
    );

    let revalidate_url = non_blank(invalidation.revalidate_url)
        .map(|value| parse_url(&value, "invalidation.revalidate_url"))
        .transpose()?;

    let languages: Vec<String> = invalidation
        .languages
        .unwrap_or_else(|| DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect())
        .into_iter()
        .map(|language| language.trim().to_string())
        .collect();
    if languages.is_empty() || languages.iter().any(String::is_empty) {
        return Err(LoadError::invalid(
            "invalidation.languages",
            "at least one non-empty language is required",
        ));
    }

    Ok(InvalidationSettings {
        debounce,
        revalidate_url,
        revalidate_secret: non_blank(invalidation.revalidate_secret),
        languages,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    admin_host: Option<String>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    statement_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWebhookSettings {
    secret: Option<String>,
    max_requests_per_hour: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCmsSettings {
    project_id: Option<String>,
    dataset: Option<String>,
    api_version: Option<String>,
    token: Option<String>,
    query_timeout_ms: Option<u64>,
    language_timeout_ms: Option<u64>,
    relation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCdnSettings {
    zone_id: Option<String>,
    api_token: Option<String>,
    site_url: Option<String>,
    request_timeout_seconds: Option<u64>,
    max_urls_per_request: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawImageSettings {
    cdn_base_url: Option<String>,
    variant_widths: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    debounce_ms: Option<u64>,
    revalidate_url: Option<String>,
    revalidate_secret: Option<String>,
    languages: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    Url::parse(value).map_err(|err| LoadError::invalid(key, format!("invalid url: {err}")))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
