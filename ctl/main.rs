#![forbid(unsafe_code)]

//! `command-bridge-ctl`: local CLI companion for the command server.
//!
//! Opens one connection to a running command server, sends a single
//! command, and prints the result. Useful for checking that the
//! application side is reachable before pointing an agent at the relay.

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use command_bridge::channel::TransactionChannel;
use command_bridge::config::ClientConfig;
use command_bridge::models::command::{Command, CommandResult};
use command_bridge::relay::tools;

#[derive(Debug, Parser)]
#[command(
    name = "command-bridge-ctl",
    about = "Send commands to a command-bridge server",
    version,
    long_about = None
)]
struct Cli {
    /// Command server host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Command server port.
    #[arg(long, default_value_t = 9877)]
    port: u16,

    /// Seconds to wait for the response.
    #[arg(long, default_value_t = 15)]
    timeout: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Check the server answers `get_scene_info`.
    Ping,

    /// Send a raw command.
    Send {
        /// Command name (the `type` field).
        command: String,
        /// Parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Translate a relay tool call and send the resulting command.
    Tool {
        /// Tool name from the relay's tool table.
        tool: String,
        /// Tool parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Print the relay's tool table.
    Tools,
}

fn main() {
    let args = Cli::parse();

    let command = match &args.action {
        Action::Tools => {
            println!("{}", serde_json::to_string_pretty(&tools::list()).unwrap_or_default());
            return;
        }
        Action::Ping => Command::bare("get_scene_info"),
        Action::Send { command, params } => match parse_object(params) {
            Ok(params) => Command::new(command.clone(), params),
            Err(err) => fail(&format!("Invalid --params: {err}")),
        },
        Action::Tool { tool, params } => {
            let parameters = match serde_json::from_str::<Value>(params) {
                Ok(parameters) => parameters,
                Err(err) => fail(&format!("Invalid --params: {err}")),
            };
            match tools::translate(tool, &parameters) {
                Ok(command) => command,
                Err(err) => fail(&err.to_string()),
            }
        }
    };

    let config = ClientConfig {
        host: args.host.clone(),
        port: args.port,
        timeout_seconds: args.timeout,
        ..ClientConfig::default()
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => fail(&format!("Failed to start runtime: {err}")),
    };

    match runtime.block_on(send(&config, &command)) {
        Ok(CommandResult::Success { result }) => {
            if matches!(args.action, Action::Ping) {
                println!("OK");
            } else {
                println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
            }
        }
        Ok(CommandResult::Error { message }) => fail(&format!("Error: {message}")),
        Err(err) => {
            eprintln!("Failed to talk to server: {err}");
            eprintln!("Is command-bridge serving on {}?", config.address());
            std::process::exit(1);
        }
    }
}

async fn send(config: &ClientConfig, command: &Command) -> command_bridge::Result<CommandResult> {
    let mut channel = TransactionChannel::connect(config).await?;
    let result = channel.send_command(command).await;
    channel.close().await;
    result
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(err) => Err(err.to_string()),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}
