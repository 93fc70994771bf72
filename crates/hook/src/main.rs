// crates/hook/src/main.rs
use std::process::ExitCode;

use anyhow::{Context, Result};
use nous_core::launcher::SUBPROCESS_ENV;
use nous_core::{logger, EventLog, LoadedConfig, NousConfig};
use nous_hook::cli::{Command, Invocation};
use nous_hook::{dispatch, flush_project, session_usage, HookContext};
use tokio::io::AsyncReadExt;
use tracing::{error, warn};

const BACKTRACE_MAX_CHARS: usize = 500;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Extraction agents inherit our hooks; their events must not recurse.
    // The payload is still read so the host never writes into a closed pipe.
    if std::env::var_os(SUBPROCESS_ENV).is_some() {
        let _ = tokio::io::copy(&mut tokio::io::stdin(), &mut tokio::io::sink()).await;
        return ExitCode::SUCCESS;
    }

    let invocation = Invocation::from_args(std::env::args_os());
    if let Invocation::Info(e) = &invocation {
        let _ = e.print();
        return ExitCode::SUCCESS;
    }

    let LoadedConfig { config, warnings } = NousConfig::load();
    logger::init(EventLog::from_config(&config));
    for warning in &warnings {
        warn!(%warning, "config_warning");
    }
    install_panic_hook();

    let command = match invocation {
        Invocation::Run(command) => command,
        Invocation::Fallback(e) => {
            warn!(error = %e.kind(), detail = %e, "bad_arguments");
            Command::Hook
        }
        Invocation::Info(_) => return ExitCode::SUCCESS,
    };

    if let Err(e) = run(command, HookContext::from_config(config)).await {
        error!(error = %format!("{e:#}"), "nous_failed");
    }
    // The host treats a non-zero exit as a hook failure; never report one.
    ExitCode::SUCCESS
}

async fn run(command: Command, ctx: HookContext) -> Result<()> {
    match command {
        Command::Hook => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("reading hook payload from stdin")?;

            // A panic in dispatch ends this task, not the process.
            let output = tokio::spawn(async move { dispatch(&raw, &ctx).await })
                .await
                .context("hook dispatch aborted")?;
            if let Some(text) = output {
                println!("{text}");
            }
        }
        Command::Flush { project } => {
            println!("{}", flush_project(&project, &ctx).await);
        }
        Command::Usage { project, session } => {
            if let Some(pct) = session_usage(&project, &session, &ctx).await {
                println!("{pct}");
            }
        }
    }
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace: String = std::backtrace::Backtrace::force_capture()
            .to_string()
            .chars()
            .take(BACKTRACE_MAX_CHARS)
            .collect();
        error!(panic = %info, %backtrace, "panic");
    }));
}
