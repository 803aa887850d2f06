//! Client configuration.
//!
//! A [`Config`] carries everything the HTTP layer and session store need to
//! come up: where the service lives, where the token pair is persisted, and
//! the `User-Agent` this client identifies itself with.

use std::path::PathBuf;

use url::Url;

/// Default location of the persisted token pair, relative to the working
/// directory.
pub const DEFAULT_TOKENS_FILE: &str = "tokens.toml";

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    /// Base URL of the AiMusic backend; endpoint paths are joined onto it.
    pub base_url: Url,

    /// Durable storage for the access/refresh token pair.
    pub tokens_file: PathBuf,

    pub user_agent: String,
}

impl Config {
    /// Builds a configuration for the service at `base_url`.
    ///
    /// Application name and version come from crate metadata, the OS version
    /// from the system, and together they form the `User-Agent`.
    ///
    /// # Panics
    ///
    /// Panics if crate metadata or the detected OS version would produce an
    /// invalid `User-Agent`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            panic!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            );
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            panic!("os name and/or version invalid (\"{os_name}\"; \"{os_version}\")");
        }

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Headless; {app_lang})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            app_lang,

            base_url,
            tokens_file: PathBuf::from(DEFAULT_TOKENS_FILE),

            user_agent,
        }
    }
}
