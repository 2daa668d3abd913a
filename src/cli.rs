use clap::Parser;
use eyre::eyre;
use muxpect::{DecodeMode, Pattern, StreamConfig};
use std::time::Duration;

type Result<T> = color_eyre::eyre::Result<T>;

/// Run a shell command and wait for patterns in its output
#[derive(Parser)]
#[command(name = "muxpect")]
#[command(about = "Run a shell command and wait for patterns in its output")]
#[command(version)]
pub struct Cli {
    /// Line to send to the command's stdin before expecting (repeatable)
    #[arg(long = "send")]
    pub send: Vec<String>,

    /// Pattern to wait for, matched in the order given (repeatable)
    #[arg(long = "expect")]
    pub expect: Vec<String>,

    /// Treat expected patterns as regular expressions
    #[arg(long)]
    pub regex: bool,

    /// Timeout for each expected pattern (seconds)
    #[arg(long, default_value = "30")]
    pub timeout_secs: u64,

    /// Largest chunk read from the stream at once
    #[arg(long, default_value = "2000")]
    pub max_read_size: usize,

    /// Fail on malformed UTF-8 instead of replacing it
    #[arg(long)]
    pub strict_decoding: bool,

    /// Kill the command once every pattern matched instead of waiting for it
    #[arg(long)]
    pub kill_after: bool,

    /// Command to execute through the shell
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Configuration for one run
#[derive(Debug, Clone)]
pub struct Config {
    /// Shell command line
    pub command: String,
    /// Lines sent to the command's stdin
    pub sends: Vec<String>,
    /// Patterns expected in order
    pub patterns: Vec<Pattern>,
    /// Stream timeout and decoding settings
    pub stream: StreamConfig,
    /// Whether to kill the command after the last match
    pub kill_after: bool,
}

impl Config {
    /// Parse command line arguments into configuration
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.max_read_size == 0 {
            return Err(eyre!("--max-read-size must be greater than zero"));
        }

        let patterns = cli
            .expect
            .iter()
            .map(|text| {
                if cli.regex {
                    Pattern::regex(text).map_err(|e| eyre!("Invalid pattern '{}': {}", text, e))
                } else {
                    Ok(Pattern::exact(text.as_str()))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Config {
            command: cli.command.join(" "),
            sends: cli.send,
            patterns,
            stream: StreamConfig {
                timeout: Duration::from_secs(cli.timeout_secs),
                max_read_size: cli.max_read_size,
                search_window: None,
                decode: if cli.strict_decoding {
                    DecodeMode::Strict
                } else {
                    DecodeMode::Replace
                },
            },
            kill_after: cli.kill_after,
        })
    }
}
