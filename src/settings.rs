use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::models::Cents;
use crate::services::ledger::DebitStrategy;

fn default_max_connections() -> u32 {
    5
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Referral {
    pub bonus_in_cents: Cents,
}

#[derive(Debug, Default, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    pub debit_strategy: DebitStrategy,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub listen: String,
}

#[derive(Debug, Deserialize)]
pub struct Admin {
    pub log_channel: i64,
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub referral: Referral,
    #[serde(default)]
    pub ledger: Ledger,
    pub http: Http,
    pub admin: Admin,
    pub postgres: Option<Postgres>,
    pub telegram: Option<Telegram>,
}

impl Settings {
    /// Reads `path`, then lets `REFLEDGER__SECTION__KEY` variables override it.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("REFLEDGER").separator("__"))
            .build()?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Settings = config.try_deserialize()?;

        if settings.referral.bonus_in_cents <= 0 {
            return Err(ConfigError::Message(format!(
                "referral.bonus_in_cents must be positive, got {}",
                settings.referral.bonus_in_cents
            )));
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Result<Settings, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Settings::from_config(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let settings = parse(
            r#"
            [referral]
            bonus_in_cents = 1000

            [http]
            listen = "0.0.0.0:8080"

            [admin]
            log_channel = -1001234
            "#,
        )
        .unwrap();

        assert_eq!(settings.referral.bonus_in_cents, 1000);
        assert_eq!(settings.ledger.debit_strategy, DebitStrategy::Conditional);
        assert!(settings.postgres.is_none());
        assert!(settings.telegram.is_none());
    }

    #[test]
    fn optional_sections_are_read() {
        let settings = parse(
            r#"
            [referral]
            bonus_in_cents = 250

            [ledger]
            debit_strategy = "compensating"

            [http]
            listen = "127.0.0.1:9000"

            [admin]
            log_channel = 1

            [postgres]
            url = "postgres://ledger@localhost/ledger"

            [telegram]
            token = "123:abc"
            "#,
        )
        .unwrap();

        assert_eq!(settings.ledger.debit_strategy, DebitStrategy::Compensating);
        let postgres = settings.postgres.unwrap();
        assert_eq!(postgres.max_connections, 5);
        assert_eq!(settings.telegram.unwrap().api_url, "https://api.telegram.org");
    }

    #[test]
    fn non_positive_bonus_is_rejected() {
        let result = parse(
            r#"
            [referral]
            bonus_in_cents = 0

            [http]
            listen = "0.0.0.0:8080"

            [admin]
            log_channel = 1
            "#,
        );

        assert!(result.is_err());
    }
}
