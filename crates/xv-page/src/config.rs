//! Viewer configuration, read from TOML with every field defaulted.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use xv_core::XvError;
use xv_core::XvResult;
use xv_loader::Animator;
use xv_loader::InstantAnimator;
use xv_loader::LoadOptions;
use xv_loader::ReloadPolicy;
use xv_loader::TimedAnimator;
use xv_net::NetConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadPolicySetting {
    #[default]
    Queue,
    Supersede,
}

impl From<ReloadPolicySetting> for ReloadPolicy {
    fn from(setting: ReloadPolicySetting) -> Self {
        match setting {
            ReloadPolicySetting::Queue => Self::Queue,
            ReloadPolicySetting::Supersede => Self::Supersede,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimationConfig {
    pub enabled: bool,
    pub slide_ms: u64,
    /// Delay before the reload control fades in.
    pub slow_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slide_ms: 400,
            slow_ms: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub allow_plain_http: bool,
    pub max_redirects: usize,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allow_plain_http: true,
            max_redirects: 5,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    pub load_attribute: String,
    pub lazy_attribute: String,
    pub toc_container_id: String,
    pub toc_heading_tag: String,
    pub toc_refresh_on_load: bool,
    pub timestamp_tag: String,
    pub timestamp_id: String,
    pub timestamp_attribute: String,
    /// `chrono` strftime pattern.
    pub timestamp_format: String,
    pub timestamp_utc: bool,
    pub auto_refresh_secs: Option<u64>,
    pub reload_affordance: bool,
    pub source_footer: bool,
    pub reload_policy: ReloadPolicySetting,
    pub cache_stylesheets: bool,
    pub animation: AnimationConfig,
    pub network: NetworkConfig,
    pub log_filter: Option<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            load_attribute: "load".to_owned(),
            lazy_attribute: "on-request".to_owned(),
            toc_container_id: "toc".to_owned(),
            toc_heading_tag: "h2".to_owned(),
            toc_refresh_on_load: true,
            timestamp_tag: "span".to_owned(),
            timestamp_id: "convert-timestamp".to_owned(),
            timestamp_attribute: "timestamp".to_owned(),
            timestamp_format: "%-m/%-d/%Y, %-I:%M:%S %p".to_owned(),
            timestamp_utc: false,
            auto_refresh_secs: None,
            reload_affordance: true,
            source_footer: false,
            reload_policy: ReloadPolicySetting::Queue,
            cache_stylesheets: false,
            animation: AnimationConfig::default(),
            network: NetworkConfig::default(),
            log_filter: None,
        }
    }
}

const STYLESHEET_CACHE_CAPACITY: u64 = 64;

impl ViewerConfig {
    pub fn from_toml_str(input: &str) -> XvResult<Self> {
        toml::from_str(input).map_err(|error| {
            XvError::new(
                "page.config.invalid",
                format!("invalid viewer config: {error}"),
            )
        })
    }

    pub fn load(path: &Path) -> XvResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            XvError::new(
                "page.config.read_failed",
                format!("failed to read {}: {error}", path.display()),
            )
        })?;
        Self::from_toml_str(&text).map_err(|error| error.context(path.display()))
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            policy: self.reload_policy.into(),
            reload_affordance: self.reload_affordance,
            source_footer: self.source_footer,
        }
    }

    pub fn net_config(&self) -> NetConfig {
        NetConfig {
            allow_plain_http: self.network.allow_plain_http,
            max_redirects: self.network.max_redirects,
            connect_timeout: Duration::from_secs(self.network.connect_timeout_secs),
            ..NetConfig::default()
        }
    }

    pub fn stylesheet_cache_capacity(&self) -> Option<u64> {
        self.cache_stylesheets.then_some(STYLESHEET_CACHE_CAPACITY)
    }

    pub fn animator(&self) -> Arc<dyn Animator> {
        if !self.animation.enabled {
            return Arc::new(InstantAnimator);
        }
        Arc::new(TimedAnimator {
            slide: Duration::from_millis(self.animation.slide_ms),
            fade_delay: Duration::from_millis(self.animation.slow_ms),
        })
    }

    pub fn auto_refresh(&self) -> Option<Duration> {
        self.auto_refresh_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::ReloadPolicySetting;
    use super::ViewerConfig;
    use std::time::Duration;
    use xv_loader::ReloadPolicy;

    #[test]
    fn empty_document_yields_defaults() {
        let config = match ViewerConfig::from_toml_str("") {
            Ok(config) => config,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.load_options().policy, ReloadPolicy::Queue);
        assert_eq!(config.auto_refresh(), None);
        assert_eq!(config.stylesheet_cache_capacity(), None);
    }

    #[test]
    fn nested_tables_override_fields() {
        let config = match ViewerConfig::from_toml_str(
            "reload_policy = \"supersede\"\n\
             auto_refresh_secs = 60\n\
             cache_stylesheets = true\n\
             [animation]\n\
             enabled = false\n\
             [network]\n\
             connect_timeout_secs = 3\n",
        ) {
            Ok(config) => config,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(config.reload_policy, ReloadPolicySetting::Supersede);
        assert_eq!(config.load_options().policy, ReloadPolicy::Supersede);
        assert_eq!(config.auto_refresh(), Some(Duration::from_secs(60)));
        assert!(!config.animation.enabled);
        assert_eq!(config.animation.slide_ms, 400);
        assert_eq!(config.net_config().connect_timeout, Duration::from_secs(3));
        assert_eq!(config.net_config().max_redirects, 5);
        assert_eq!(config.stylesheet_cache_capacity(), Some(64));
    }

    #[test]
    fn invalid_config_is_coded() {
        for input in ["reload_policy = \"race\"", "toc_heading = \"h3\"", "load_attribute = ["] {
            if let Err(error) = ViewerConfig::from_toml_str(input) {
                assert_eq!(error.code, "page.config.invalid");
            } else {
                panic!("expected invalid config for {input}");
            }
        }
    }
}
