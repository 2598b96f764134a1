use std::env;
use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};

use pgchat_agent::scripted::ScriptedLlmClient;
use pgchat_agent::session::{ConversationSession, SessionSettings};
use pgchat_agent::tools::RUN_SQL;
use pgchat_cli::commands::{chat, config, doctor};
use pgchat_core::config::LoadOptions;
use pgchat_core::domain::schema::{ColumnInfo, SchemaSnapshot};
use pgchat_db::memory::{InMemorySchemaSource, InMemoryStatementRunner};
use serde_json::{json, Value};

const VALID_ENV: &[(&str, &str)] = &[
    ("PGCHAT_DATABASE_NAME", "shop"),
    ("PGCHAT_DATABASE_USER", "analyst"),
    ("PGCHAT_LLM_API_KEY", "sk-test-secret"),
];

#[test]
fn config_reports_sources_and_redacts_secrets() {
    with_env(
        &[
            ("PGCHAT_DATABASE_NAME", "shop"),
            ("PGCHAT_DATABASE_USER", "analyst"),
            ("PGCHAT_LLM_API_KEY", "sk-test-secret"),
            ("PGCHAT_DATABASE_PASSWORD", "hunter2"),
        ],
        || {
            let result = config::run(LoadOptions::default());
            assert_eq!(result.exit_code, 0);

            let output = &result.output;
            assert!(
                output.contains("- database.name = shop (source: env (PGCHAT_DATABASE_NAME))")
            );
            assert!(output.contains("- database.host = localhost (source: default)"));
            assert!(
                output.contains("- llm.api_key = <redacted> (source: env (PGCHAT_LLM_API_KEY))")
            );
            assert!(output.contains("- database.password = <redacted>"));
            assert!(!output.contains("sk-test-secret"));
            assert!(!output.contains("hunter2"));
        },
    );
}

#[test]
fn config_ignores_blank_env_overrides_when_reporting_sources() {
    let mut vars = VALID_ENV.to_vec();
    vars.extend([("PGCHAT_DATABASE_HOST", ""), ("PGCHAT_LLM_MODEL", "   ")]);
    with_env(&vars, || {
        let result = config::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0);

        let output = &result.output;
        assert!(output.contains("- database.host = localhost (source: default)"), "{output}");
        assert!(!output.contains("env (PGCHAT_DATABASE_HOST)"));
        assert!(!output.contains("env (PGCHAT_LLM_MODEL)"));
    });
}

#[test]
fn config_attributes_values_to_explicit_file() {
    with_env(VALID_ENV, || {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[agent]\nmax_result_rows = 25").expect("write config");

        let options = LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            ..LoadOptions::default()
        };
        let result = config::run(options);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains(&format!(
            "- agent.max_result_rows = 25 (source: file ({}))",
            file.path().display()
        )));
    });
}

#[test]
fn config_fails_without_required_values() {
    with_env(&[], || {
        let result = config::run(LoadOptions::default());
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn chat_fails_fast_on_invalid_config() {
    with_env(&[], || {
        let result = chat::run(LoadOptions::default());
        assert_eq!(result.exit_code, 2, "missing config is a startup-time fatal error");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[], || {
        let result = doctor::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["name"], "config_validation");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_reports_unreachable_database() {
    let mut vars = VALID_ENV.to_vec();
    vars.extend([
        ("PGCHAT_DATABASE_HOST", "127.0.0.1"),
        ("PGCHAT_DATABASE_PORT", "1"),
        ("PGCHAT_DATABASE_CONNECT_TIMEOUT_SECS", "1"),
    ]);
    with_env(&vars, || {
        let result = doctor::run(LoadOptions::default(), false);
        assert_eq!(result.exit_code, 4);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [ok] config_validation"));
        assert!(result.output.contains("- [ok] llm_settings"));
        assert!(result.output.contains("- [fail] database_connectivity"));
        assert!(result.output.contains("- [skip] schema_access"));
    });
}

#[tokio::test]
async fn repl_runs_turns_and_handles_control_words() {
    let mut schema = SchemaSnapshot::new();
    schema.push_column("orders", ColumnInfo::new("id", "integer", false));

    let llm = ScriptedLlmClient::new()
        .tool_call(RUN_SQL, json!({"query": "SELECT COUNT(*) FROM orders"}))
        .answer("There are 42 orders.")
        .answer("Hello again!");
    let runner = InMemoryStatementRunner::new(100).with_rows(
        "SELECT COUNT(*) FROM orders",
        &["count"],
        vec![vec![json!(42)]],
    );
    let mut session = ConversationSession::new(
        Arc::new(llm),
        InMemorySchemaSource::new(schema),
        runner,
        SessionSettings {
            max_history_messages: 40,
            model_timeout: std::time::Duration::from_secs(5),
        },
    );

    let input: &[u8] = b"how many orders?\n\n  \nCLEAR\nhi\nexit\nnever read\n";
    let mut output = Vec::new();
    chat::repl(&mut session, input, &mut output).await.expect("repl io");

    let transcript = String::from_utf8(output).expect("utf8");
    assert!(transcript.contains("There are 42 orders."));
    assert!(transcript.contains("Conversation cleared."));
    assert!(transcript.contains("Hello again!"));
    assert_eq!(session.history().len(), 3, "history holds only the turn after `clear`");
}

#[tokio::test]
async fn repl_reports_turn_failures_and_continues() {
    let llm = ScriptedLlmClient::new();
    let mut session = ConversationSession::new(
        llm,
        InMemorySchemaSource::new(SchemaSnapshot::new()),
        InMemoryStatementRunner::new(10),
        SessionSettings {
            max_history_messages: 40,
            model_timeout: std::time::Duration::from_secs(5),
        },
    );

    let input: &[u8] = b"first question\nsecond question\n";
    let mut output = Vec::new();
    chat::repl(&mut session, input, &mut output).await.expect("repl io");

    let transcript = String::from_utf8(output).expect("utf8");
    assert_eq!(transcript.matches("couldn't get a response from the language model").count(), 2);
    assert_eq!(session.history().len(), 1);
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PGCHAT_DATABASE_HOST",
        "PGCHAT_DATABASE_PORT",
        "PGCHAT_DATABASE_NAME",
        "PGCHAT_DATABASE_USER",
        "PGCHAT_DATABASE_PASSWORD",
        "PGCHAT_DATABASE_CONNECT_TIMEOUT_SECS",
        "PGCHAT_DATABASE_STATEMENT_TIMEOUT_SECS",
        "PGCHAT_LLM_PROVIDER",
        "PGCHAT_LLM_API_KEY",
        "PGCHAT_LLM_BASE_URL",
        "PGCHAT_LLM_MODEL",
        "PGCHAT_LLM_TIMEOUT_SECS",
        "OPENAI_API_KEY",
        "PGCHAT_AGENT_MAX_HISTORY_MESSAGES",
        "PGCHAT_AGENT_MAX_RESULT_ROWS",
        "PGCHAT_LOGGING_LEVEL",
        "PGCHAT_LOGGING_FORMAT",
        "PGCHAT_LOG_LEVEL",
        "PGCHAT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
