use std::time::Duration;

use pgchat_core::config::DatabaseConfig;
use pgchat_core::errors::ConnectionError;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

pub type DbPool = sqlx::PgPool;

pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.name)
        .username(&config.user)
        .application_name("pgchat");

    match &config.password {
        Some(password) => options.password(password.expose_secret()),
        None => options,
    }
}

/// Opens the session's database handle: a pool capped at one connection, so
/// every turn reuses the same backend and sqlx re-dials it if it drops.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, ConnectionError> {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
        .connect_with(connect_options(config))
        .await
        .map_err(|error| ConnectionError::new(error.to_string()))
}

#[cfg(test)]
mod tests {
    use pgchat_core::config::AppConfig;

    use super::connect_options;

    #[test]
    fn connect_options_follow_database_config() {
        let mut config = AppConfig::default().database;
        config.host = "db.internal".to_string();
        config.port = 6543;
        config.name = "shop".to_string();
        config.user = "analyst".to_string();

        let options = connect_options(&config);
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("shop"));
        assert_eq!(options.get_username(), "analyst");
    }
}
