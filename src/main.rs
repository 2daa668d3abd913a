type Result<T> = color_eyre::eyre::Result<T>;

mod cli;
mod signals;

use clap::Parser;
use muxpect::{Error, Pattern, PatternStream, ShellProcess};
use std::sync::Arc;
use tokio::select;
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Config};
use signals::Signals;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Every pattern matched; carries the command's exit code when it was
    /// waited for
    Matched(Option<i32>),
    Timeout,
    EndOfStream,
    Interrupted,
}

impl Outcome {
    fn exit_code(self) -> i32 {
        match self {
            Outcome::Matched(code) => code.unwrap_or(0),
            Outcome::Timeout => 124,
            Outcome::EndOfStream => 125,
            Outcome::Interrupted => 130,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    let outcome = run(config).await?;
    info!("muxpect exiting: {:?}", outcome);
    std::process::exit(outcome.exit_code());
}

/// Spawns the command, feeds it input, and expects every pattern in order
async fn run(config: Config) -> Result<Outcome> {
    let stream = Arc::new(PatternStream::open(1, 1, config.stream.clone())?);
    let process = ShellProcess::spawn(config.command.clone())?;
    process.start_forwarding(Arc::clone(&stream))?;

    for line in &config.sends {
        process.send(line.as_str())?;
    }

    let mut signals = Signals::new()?;
    let expect_stream = Arc::clone(&stream);
    let patterns = config.patterns.clone();
    let mut session = spawn_blocking(move || expect_all(&expect_stream, &patterns));

    let outcome = select! {
        result = &mut session => result??,
        signal = signals.next() => {
            info!("received signal: {:?}", signal);
            stream.terminate(true);
            process.kill()?;
            let _ = session.await;
            return Ok(Outcome::Interrupted);
        }
    };

    let outcome = match outcome {
        Outcome::Matched(_) if config.kill_after => {
            process.kill()?;
            Outcome::Matched(None)
        }
        Outcome::Matched(_) => {
            process.close_stdin();
            let waiter = Arc::clone(&process);
            let status = select! {
                status = spawn_blocking(move || waiter.wait()) => status??,
                signal = signals.next() => {
                    info!("received signal: {:?}", signal);
                    process.kill()?;
                    stream.terminate(true);
                    return Ok(Outcome::Interrupted);
                }
            };
            info!("Process exited with status: {:?}", status);
            Outcome::Matched(status.code())
        }
        other => {
            process.kill()?;
            other
        }
    };

    stream.terminate(false);
    Ok(outcome)
}

fn expect_all(stream: &PatternStream, patterns: &[Pattern]) -> muxpect::Result<Outcome> {
    for (index, pattern) in patterns.iter().enumerate() {
        match stream.expect(pattern.clone(), None) {
            Ok(found) => info!("matched pattern {}: {:?}", index, found.matched),
            Err(Error::Timeout(timeout)) => {
                error!("pattern {} ({:?}) not seen within {:?}", index, pattern, timeout);
                return Ok(Outcome::Timeout);
            }
            Err(Error::EndOfStream(reason)) => {
                warn!("stream closed before pattern {} matched: {}", index, reason);
                return Ok(Outcome::EndOfStream);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Outcome::Matched(None))
}
