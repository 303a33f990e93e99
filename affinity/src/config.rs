use crate::types::Backend;
use serde::Deserialize;
use url::Url;

/// Static backend definition loaded at start-up.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub id: String,
    /// API root of the backend. Uses `url::Url` so malformed addresses are
    /// rejected during deserialization.
    pub url: Url,
    pub secret: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<BackendConfig> for Backend {
    fn from(config: BackendConfig) -> Self {
        Backend::new(config.id, config.url, config.secret).with_available(config.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_config() {
        let yaml = r#"
- id: bbb1
  url: "https://bbb1.example.com/bigbluebutton/api/"
  secret: s3cr3t
- id: bbb2
  url: "https://bbb2.example.com/bigbluebutton/api/"
  secret: other
  enabled: false
"#;
        let configs: Vec<BackendConfig> = serde_yaml::from_str(yaml).unwrap();
        let backends: Vec<Backend> = configs.into_iter().map(Backend::from).collect();

        assert_eq!(backends.len(), 2);
        assert!(backends[0].available);
        assert!(!backends[1].available);
        assert_eq!(backends[1].load, 0);
        assert_eq!(backends[0].url.host_str(), Some("bbb1.example.com"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let yaml = "{id: a, url: not-a-url, secret: s}";
        assert!(serde_yaml::from_str::<BackendConfig>(yaml).is_err());
    }
}
