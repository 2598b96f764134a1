use std::time::Duration;

use pgchat_agent::llm::LlmError;
use pgchat_agent::openai::OpenAiClient;
use pgchat_agent::session::{ConversationSession, SessionSettings};
use pgchat_core::config::AppConfig;
use pgchat_core::errors::ConnectionError;
use pgchat_db::{connect, PgSchemaSource, PgStatementRunner};
use thiserror::Error;
use tracing::info;

pub type LiveSession = ConversationSession<OpenAiClient, PgSchemaSource, PgStatementRunner>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Database(#[from] ConnectionError),
    #[error("language model client could not be built: {0}")]
    Llm(#[from] LlmError),
}

impl BootstrapError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Database(_) => "database_connect",
            Self::Llm(_) => "llm_client",
        }
    }
}

pub async fn bootstrap(config: &AppConfig) -> Result<LiveSession, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting session bootstrap");

    let pool = connect(&config.database).await?;
    info!(
        event_name = "system.bootstrap.database_connected",
        host = %config.database.host,
        database = %config.database.name,
        "database connection established"
    );

    let llm = OpenAiClient::from_config(&config.llm)?;
    let runner = PgStatementRunner::new(
        pool.clone(),
        config.agent.max_result_rows,
        Duration::from_secs(config.database.statement_timeout_secs),
    );
    info!(
        event_name = "system.bootstrap.ready",
        model = %config.llm.model,
        max_result_rows = config.agent.max_result_rows,
        "session ready"
    );

    Ok(ConversationSession::new(
        llm,
        PgSchemaSource::new(pool),
        runner,
        SessionSettings::from_config(config),
    ))
}
