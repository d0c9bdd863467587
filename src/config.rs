use serde::Deserialize;

/// Application settings read from `Rocket.toml` or `ROCKET_*` variables, next to
/// rocket's own keys.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    /// SQLite database file.
    #[serde(default = "default_database")]
    pub database: String,
    /// Directory served at `/` when it exists.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_database() -> String {
    "planner.db".to_string()
}

fn default_static_dir() -> String {
    "web".to_string()
}

impl Default for AppConfig {
    fn default() -> AppConfig {
        AppConfig {
            database: default_database(),
            static_dir: default_static_dir(),
        }
    }
}
