use std::env;
use std::fs;
use std::path::Path;

use pgchat_core::config::{detect_config_path, AppConfig, LoadOptions};
use toml::Value;

use super::CommandResult;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("config", "config_validation", error.to_string(), 2);
        }
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
    ];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let database = &config.database;
    let llm = &config.llm;
    vec![
        Field {
            key: "database.host",
            value: database.host.clone(),
            env_keys: &["PGCHAT_DATABASE_HOST"],
        },
        Field {
            key: "database.port",
            value: database.port.to_string(),
            env_keys: &["PGCHAT_DATABASE_PORT"],
        },
        Field {
            key: "database.name",
            value: database.name.clone(),
            env_keys: &["PGCHAT_DATABASE_NAME"],
        },
        Field {
            key: "database.user",
            value: database.user.clone(),
            env_keys: &["PGCHAT_DATABASE_USER"],
        },
        Field {
            key: "database.password",
            value: redact(database.password.is_some()),
            env_keys: &["PGCHAT_DATABASE_PASSWORD"],
        },
        Field {
            key: "database.connect_timeout_secs",
            value: database.connect_timeout_secs.to_string(),
            env_keys: &["PGCHAT_DATABASE_CONNECT_TIMEOUT_SECS"],
        },
        Field {
            key: "database.statement_timeout_secs",
            value: database.statement_timeout_secs.to_string(),
            env_keys: &["PGCHAT_DATABASE_STATEMENT_TIMEOUT_SECS"],
        },
        Field {
            key: "llm.provider",
            value: format!("{:?}", llm.provider),
            env_keys: &["PGCHAT_LLM_PROVIDER"],
        },
        Field {
            key: "llm.api_key",
            value: redact(llm.api_key.is_some()),
            env_keys: &["PGCHAT_LLM_API_KEY", "OPENAI_API_KEY"],
        },
        Field {
            key: "llm.base_url",
            value: llm.effective_base_url().to_string(),
            env_keys: &["PGCHAT_LLM_BASE_URL"],
        },
        Field { key: "llm.model", value: llm.model.clone(), env_keys: &["PGCHAT_LLM_MODEL"] },
        Field {
            key: "llm.timeout_secs",
            value: llm.timeout_secs.to_string(),
            env_keys: &["PGCHAT_LLM_TIMEOUT_SECS"],
        },
        Field {
            key: "agent.max_history_messages",
            value: config.agent.max_history_messages.to_string(),
            env_keys: &["PGCHAT_AGENT_MAX_HISTORY_MESSAGES"],
        },
        Field {
            key: "agent.max_result_rows",
            value: config.agent.max_result_rows.to_string(),
            env_keys: &["PGCHAT_AGENT_MAX_RESULT_ROWS"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["PGCHAT_LOGGING_LEVEL", "PGCHAT_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["PGCHAT_LOGGING_FORMAT", "PGCHAT_LOG_FORMAT"],
        },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let overridden = env_keys
        .iter()
        .find(|key| env::var(key).is_ok_and(|value| !value.trim().is_empty()));
    if let Some(env_key) = overridden {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact(is_set: bool) -> String {
    if is_set { "<redacted>" } else { "<unset>" }.to_string()
}
