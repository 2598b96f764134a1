use std::future::Future;

use anyhow::Context;
use pgchat_agent::llm::LlmClient;
use pgchat_agent::session::ConversationSession;
use pgchat_core::config::{AppConfig, LoadOptions};
use pgchat_db::executor::StatementRunner;
use pgchat_db::introspection::SchemaSource;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Runtime;
use tracing::{info, warn};

use super::CommandResult;
use crate::bootstrap::{bootstrap, BootstrapError};

const PROMPT: &str = "pgchat> ";
const GREETING: &str =
    "Connected. Ask a question about your data, `clear` to start over, `exit` to quit.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Skip,
    Clear,
    Exit,
    Utterance(&'a str),
}

pub fn parse_input(line: &str) -> ReplInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplInput::Skip;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "clear" => ReplInput::Clear,
        "exit" | "quit" => ReplInput::Exit,
        _ => ReplInput::Utterance(trimmed),
    }
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chat", "config_validation", error.to_string(), 2);
        }
    };
    crate::init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                1,
            );
        }
    };

    match run_until_complete(runtime, chat_session(&config)) {
        Ok(()) => CommandResult::quiet(),
        Err(error) => {
            let (error_class, exit_code) = match error.downcast_ref::<BootstrapError>() {
                Some(bootstrap_error) => (bootstrap_error.error_class(), 3),
                None => ("io", 1),
            };
            CommandResult::failure("chat", error_class, format!("{error:#}"), exit_code)
        }
    }
}

/// Drives `future` to completion, then shuts the runtime down without
/// waiting on blocking-pool work. A stdin read left pending by Ctrl-C would
/// otherwise hold the process open until the next line arrives.
fn run_until_complete<F: Future>(runtime: Runtime, future: F) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    output
}

async fn chat_session(config: &AppConfig) -> anyhow::Result<()> {
    let mut session = bootstrap(config).await?;

    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();
    tokio::select! {
        result = repl(&mut session, input, output) => result.context("console I/O failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!(event_name = "system.chat.interrupted", "interrupted");
        }
    }
    Ok(())
}

/// Reads lines until EOF or `exit`, sending each utterance through one turn.
/// Turn failures are reported and the loop carries on.
pub async fn repl<L, S, R, I, O>(
    session: &mut ConversationSession<L, S, R>,
    mut input: I,
    mut output: O,
) -> std::io::Result<()>
where
    L: LlmClient,
    S: SchemaSource,
    R: StatementRunner,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    output.write_all(format!("{GREETING}\n").as_bytes()).await?;

    let mut line = String::new();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        line.clear();
        if input.read_line(&mut line).await? == 0 {
            output.write_all(b"\n").await?;
            break;
        }

        match parse_input(&line) {
            ReplInput::Skip => continue,
            ReplInput::Exit => break,
            ReplInput::Clear => {
                session.clear();
                output.write_all(b"Conversation cleared.\n").await?;
            }
            ReplInput::Utterance(utterance) => match session.turn(utterance).await {
                Ok(reply) => output.write_all(format!("{reply}\n").as_bytes()).await?,
                Err(error) => {
                    warn!(event_name = "system.chat.turn_failed", error = %error, "turn failed");
                    output.write_all(format!("{}\n", error.user_message()).as_bytes()).await?;
                }
            },
        }
    }

    info!(event_name = "system.chat.ended", "session ended");
    output.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use super::{parse_input, run_until_complete, ReplInput};

    #[test]
    fn pending_blocking_reads_do_not_hold_shutdown() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let (release, pending_read) = mpsc::channel::<()>();

        let started = Instant::now();
        let value = run_until_complete(runtime, async move {
            tokio::task::spawn_blocking(move || pending_read.recv().ok());
            7
        });

        assert_eq!(value, 7);
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(release);
    }

    #[test]
    fn control_words_are_case_insensitive() {
        assert_eq!(parse_input("  CLEAR \n"), ReplInput::Clear);
        assert_eq!(parse_input("Exit"), ReplInput::Exit);
        assert_eq!(parse_input("quit\n"), ReplInput::Exit);
    }

    #[test]
    fn blank_lines_are_skipped_and_text_is_trimmed() {
        assert_eq!(parse_input("   \n"), ReplInput::Skip);
        assert_eq!(parse_input("  how many orders?\n"), ReplInput::Utterance("how many orders?"));
        assert_eq!(
            parse_input("clear the orders table"),
            ReplInput::Utterance("clear the orders table")
        );
    }
}
