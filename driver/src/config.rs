use radkit::logging;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PING_TIME: f64 = 1.0;
pub const DEFAULT_SERVER_ID: u8 = 1;

/// Network section of the settings file.
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct Net {
    /// Seconds between manager iterations.
    pub ping_time: f64,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub server_id: u8,
}

impl Default for Net {
    fn default() -> Net {
        Net {
            ping_time: DEFAULT_PING_TIME,
            host: None,
            port: None,
            server_id: DEFAULT_SERVER_ID,
        }
    }
}

/// Driver settings, loaded from a TOML file. Anything missing or
/// malformed falls back to the defaults.
#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub net: Net,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P, log: &logging::Logger) -> Settings {
        match serdeconv::from_toml_file(path.as_ref()) {
            Ok(settings) => settings,
            Err(error) => {
                logging::warn!(log, "failed to load settings, using defaults";
                               "path" => %path.as_ref().display(),
                               "error" => %error);
                Settings::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radkit::logging::{Discard, Logger};

    fn discard() -> Logger {
        Logger::root(Discard, logging::o!())
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();

        assert_eq!(settings.net.ping_time, 1.0);
        assert_eq!(settings.net.host, None);
        assert_eq!(settings.net.port, None);
        assert_eq!(settings.net.server_id, 1);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut settings = Settings::default();
        settings.net.host = Some("10.0.0.20".to_string());
        settings.net.port = Some(4040);
        settings.net.ping_time = 0.5;

        let toml = serdeconv::to_toml_string(&settings).unwrap();
        let reloaded: Settings = serdeconv::from_toml_str(&toml).unwrap();

        assert_eq!(reloaded.net.host, Some("10.0.0.20".to_string()));
        assert_eq!(reloaded.net.port, Some(4040));
        assert_eq!(reloaded.net.ping_time, 0.5);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let toml = r#"
[net]
ping_time = 2.0
"#;

        let settings: Settings = serdeconv::from_toml_str(toml).unwrap();

        assert_eq!(settings.net.ping_time, 2.0);
        assert_eq!(settings.net.server_id, 1);
        assert_eq!(settings.net.host, None);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let settings = Settings::load("/nonexistent/umirs.toml", &discard());

        assert_eq!(settings.net.ping_time, 1.0);
        assert_eq!(settings.net.server_id, 1);
    }
}
