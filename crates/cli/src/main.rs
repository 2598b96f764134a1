use std::process::ExitCode;

fn main() -> ExitCode {
    pgchat_cli::run()
}
