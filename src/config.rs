// Configuration loading and parsing (relay.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// relay.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire relay.toml file.
#[derive(Debug, Clone, Deserialize)]
struct RelayFile {
    server: ServerConfig,
    upstream: UpstreamConfig,
    session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port the relay listens on. `0` binds an ephemeral port (used by
    /// tests). Overridden by the `PORT` environment variable when set.
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API, without a trailing slash.
    pub base_url: String,
    /// Model used for question generation and prompt refinement.
    pub chat_model: String,
    /// Model used for image generation.
    pub image_model: String,
    /// Fixed size requested for generated images.
    pub image_size: String,
    /// How many variant images to request per variation call.
    pub variation_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the relay the session controller talks to.
    pub relay_url: String,
    /// Quiet period after the last prompt edit before questions are fetched.
    pub debounce_ms: u64,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub openai_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/relay.toml` and (optionally)
/// `config/credentials.toml`, both relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults
/// or consult the environment. Prefer `load_config()` which handles both.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- relay.toml (required) ---
    let relay_path = config_dir.join("relay.toml");
    let relay_text = read_file(&relay_path)?;
    let relay_file: RelayFile =
        toml::from_str(&relay_text).map_err(|e| ConfigError::ParseError {
            path: relay_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        server: relay_file.server,
        upstream: relay_file.upstream,
        session: relay_file.session,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Apply environment overrides on top of a loaded config.
///
/// - `OPENAI_API_KEY` replaces the credential from credentials.toml.
/// - `PORT` replaces `server.port` (ignored when unparsable, with a warning).
pub(crate) fn apply_env_overrides(config: &mut Config) {
    if let Some(key) = non_empty_env("OPENAI_API_KEY") {
        config.credentials.openai_api_key = Some(key);
    }
    if let Some(port) = non_empty_env("PORT") {
        match port.parse::<u16>() {
            Ok(p) => config.server.port = p,
            Err(_) => tracing::warn!("Ignoring unparsable PORT value: {port}"),
        }
    }
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        // Without defaults/ the config must already be in place, otherwise
        // loading will fail. Surface a clear error about the missing setup.
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        // Skip .example template files
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File already exists in config/, skip it
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working
/// directory, copying default config files first and applying environment
/// overrides last.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let non_empty: &[(&str, &str)] = &[
        ("upstream.base_url", &config.upstream.base_url),
        ("upstream.chat_model", &config.upstream.chat_model),
        ("upstream.image_model", &config.upstream.image_model),
        ("upstream.image_size", &config.upstream.image_size),
        ("session.relay_url", &config.session.relay_url),
    ];
    for (name, val) in non_empty {
        if val.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    if config.upstream.base_url.ends_with('/') {
        return Err(ConfigError::ValidationError {
            field: "upstream.base_url".into(),
            message: "must not end with a trailing slash".into(),
        });
    }

    if config.upstream.variation_count == 0 {
        return Err(ConfigError::ValidationError {
            field: "upstream.variation_count".into(),
            message: "must be > 0".into(),
        });
    }

    if config.session.debounce_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "session.debounce_ms".into(),
            message: "must be > 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const RELAY_TOML: &str = r#"
[server]
port = 3001

[upstream]
base_url = "https://api.openai.com/v1"
chat_model = "gpt-3.5-turbo"
image_model = "dall-e-3"
image_size = "1024x1024"
variation_count = 3

[session]
relay_url = "http://127.0.0.1:3001"
debounce_ms = 500
"#;

    /// Helper: create a fresh temp base dir with a config/ subdirectory.
    fn temp_base(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("promptlens_config_{name}"));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        tmp
    }

    #[test]
    fn load_valid_config() {
        let tmp = temp_base("valid");
        fs::write(tmp.join("config/relay.toml"), RELAY_TOML).unwrap();

        let config = load_config_from(&tmp).expect("should load valid config");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.upstream.base_url, "https://api.openai.com/v1");
        assert_eq!(config.upstream.chat_model, "gpt-3.5-turbo");
        assert_eq!(config.upstream.image_model, "dall-e-3");
        assert_eq!(config.upstream.image_size, "1024x1024");
        assert_eq!(config.upstream.variation_count, 3);
        assert_eq!(config.session.relay_url, "http://127.0.0.1:3001");
        assert_eq!(config.session.debounce_ms, 500);
        assert!(config.credentials.openai_api_key.is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_credentials_toml_is_ok() {
        let tmp = temp_base("no_creds");
        fs::write(tmp.join("config/relay.toml"), RELAY_TOML).unwrap();

        let config = load_config_from(&tmp).expect("should load without credentials.toml");
        assert!(config.credentials.openai_api_key.is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn credentials_toml_with_api_key() {
        let tmp = temp_base("with_creds");
        fs::write(tmp.join("config/relay.toml"), RELAY_TOML).unwrap();
        fs::write(
            tmp.join("config/credentials.toml"),
            "openai_api_key = \"sk-test-key\"\n",
        )
        .unwrap();

        let config = load_config_from(&tmp).expect("should load with credentials.toml");
        assert_eq!(
            config.credentials.openai_api_key.as_deref(),
            Some("sk-test-key")
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_chat_model() {
        let tmp = temp_base("empty_model");
        let modified = RELAY_TOML.replace(
            "chat_model = \"gpt-3.5-turbo\"",
            "chat_model = \"\"",
        );
        fs::write(tmp.join("config/relay.toml"), modified).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "upstream.chat_model");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_trailing_slash_base_url() {
        let tmp = temp_base("trailing_slash");
        let modified = RELAY_TOML.replace(
            "base_url = \"https://api.openai.com/v1\"",
            "base_url = \"https://api.openai.com/v1/\"",
        );
        fs::write(tmp.join("config/relay.toml"), modified).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "upstream.base_url");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_variation_count() {
        let tmp = temp_base("zero_variations");
        let modified = RELAY_TOML.replace("variation_count = 3", "variation_count = 0");
        fs::write(tmp.join("config/relay.toml"), modified).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "upstream.variation_count");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_debounce() {
        let tmp = temp_base("zero_debounce");
        let modified = RELAY_TOML.replace("debounce_ms = 500", "debounce_ms = 0");
        fs::write(tmp.join("config/relay.toml"), modified).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "session.debounce_ms");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_relay_toml() {
        let tmp = temp_base("missing_relay");

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => {
                assert!(path.ends_with("relay.toml"));
            }
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_base("invalid_toml");
        fs::write(tmp.join("config/relay.toml"), "this is not valid [[[ toml").unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ParseError { path, .. } => {
                assert!(path.ends_with("relay.toml"));
            }
            other => panic!("expected ParseError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn env_overrides_replace_key_and_port() {
        let tmp = temp_base("env_overrides");
        fs::write(tmp.join("config/relay.toml"), RELAY_TOML).unwrap();
        let mut config = load_config_from(&tmp).unwrap();

        // No other test touches these variables.
        std::env::set_var("OPENAI_API_KEY", "sk-env-key");
        std::env::set_var("PORT", "4005");
        apply_env_overrides(&mut config);
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("PORT");

        assert_eq!(config.credentials.openai_api_key.as_deref(), Some("sk-env-key"));
        assert_eq!(config.server.port, 4005);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_files() {
        let tmp = std::env::temp_dir().join("promptlens_config_ensure_copies");
        let _ = fs::remove_dir_all(&tmp);

        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::write(defaults_dir.join("relay.toml"), RELAY_TOML).unwrap();
        // Example file that should NOT be copied
        fs::write(
            defaults_dir.join("credentials.toml.example"),
            "openai_api_key = \"sk-...\"\n",
        )
        .unwrap();

        assert!(!tmp.join("config").exists());

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(copied.len(), 1);
        assert!(tmp.join("config/relay.toml").exists());
        assert!(!tmp.join("config/credentials.toml.example").exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_skips_existing() {
        let tmp = std::env::temp_dir().join("promptlens_config_ensure_skips");
        let _ = fs::remove_dir_all(&tmp);

        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("defaults/relay.toml"), RELAY_TOML).unwrap();

        // Pre-create relay.toml in config/ with custom content
        fs::write(tmp.join("config/relay.toml"), "# custom\n").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert!(copied.is_empty());

        let content = fs::read_to_string(tmp.join("config/relay.toml")).unwrap();
        assert_eq!(content, "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("promptlens_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_files(&tmp).unwrap_err();
        match &err {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("neither defaults/ nor config/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }
}
