use clap::{App, Arg};
use colored::*;
use pypilot_bridge::agent::AutopilotError;
use pypilot_bridge::units::{degrees_to_radians, radians_to_degrees};
use pypilot_bridge::{
    AgentHandle, AgentRuntime, AutopilotAgent, AutopilotDelta, BridgeConfig, Host, TackDirection, TcpConnector,
};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const HELP_TEXT: &str = "commands: engage | disengage | mode <name> | target <deg> | adjust <deg> | \
tack port|starboard | dodge <deg> | cancel | data | quit";

/// Prints everything the agent reports to the terminal.
#[derive(Debug, Default)]
struct ConsoleHost;

impl Host for ConsoleHost {
    fn publish(&mut self, delta: &AutopilotDelta) {
        for (path, value) in delta.values() {
            println!("{} {} = {}", "📡".bright_blue(), path.bright_white(), value.to_string().bright_cyan());
        }
    }

    fn set_status(&mut self, message: &str) {
        println!("{} {}", "ℹ️ ".bright_blue(), message.bright_green());
    }

    fn set_error(&mut self, message: &str) {
        eprintln!("{} {}", "❌".red(), message.bright_red());
    }

    fn set_active_pilot(&mut self, href: Option<&str>) {
        match href {
            Some(href) => println!("{} active pilot: {}", "🧭".bright_blue(), href.bright_white()),
            None => println!("{} active pilot cleared", "🧭".bright_blue()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Engage,
    Disengage,
    Mode(String),
    Target(f64),
    Adjust(f64),
    Tack(TackDirection),
    Dodge(f64),
    Cancel,
    Data,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let arg = words.next();

    let degrees = |arg: Option<&str>| -> Result<f64, String> {
        arg.ok_or_else(|| format!("'{verb}' needs a value in degrees"))?
            .parse::<f64>()
            .map_err(|e| format!("invalid number: {e}"))
    };

    match verb {
        "engage" => Ok(ConsoleCommand::Engage),
        "disengage" => Ok(ConsoleCommand::Disengage),
        "mode" => arg
            .map(|m| ConsoleCommand::Mode(m.to_string()))
            .ok_or_else(|| "'mode' needs a mode name".to_string()),
        "target" => degrees(arg).map(ConsoleCommand::Target),
        "adjust" => degrees(arg).map(ConsoleCommand::Adjust),
        "tack" => arg
            .ok_or_else(|| "'tack' needs port or starboard".to_string())?
            .parse::<TackDirection>()
            .map(ConsoleCommand::Tack)
            .map_err(|e| e.to_string()),
        "dodge" => degrees(arg).map(ConsoleCommand::Dodge),
        "cancel" => Ok(ConsoleCommand::Cancel),
        "data" => Ok(ConsoleCommand::Data),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

async fn run_command(handle: &AgentHandle, command: ConsoleCommand) -> Result<(), AutopilotError> {
    match command {
        ConsoleCommand::Engage => handle.engage().await?,
        ConsoleCommand::Disengage => handle.disengage().await?,
        ConsoleCommand::Mode(mode) => handle.set_mode(&mode).await?,
        ConsoleCommand::Target(deg) => handle.set_target(degrees_to_radians(deg)).await?,
        ConsoleCommand::Adjust(deg) => handle.adjust_target(degrees_to_radians(deg)).await?,
        ConsoleCommand::Tack(direction) => handle.tack(direction).await?,
        ConsoleCommand::Dodge(deg) => match handle.dodge(Some(degrees_to_radians(deg))).await? {
            Some(dodge) => println!("{} dodge {} started", "✅".green(), dodge.id()),
            None => println!("{} zero dodge ignored", "⚠️ ".yellow()),
        },
        ConsoleCommand::Cancel => {
            if handle.cancel_dodge().await? {
                println!("{} dodge cancelled", "✅".green());
            } else {
                println!("{} no dodge in progress", "⚠️ ".yellow());
            }
        }
        ConsoleCommand::Data => print_data(handle).await?,
        ConsoleCommand::Help => println!("{}", HELP_TEXT.bright_white()),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

async fn print_data(handle: &AgentHandle) -> Result<(), AutopilotError> {
    let data = handle.get_data().await?;

    println!("{}", "🧭 Autopilot".bright_blue().bold());
    let state = data.state.map_or("unknown", |s| s.as_str());
    let engaged = if data.engaged { "yes".green() } else { "no".yellow() };
    println!("  state:   {} (engaged: {})", state.bright_white(), engaged);
    println!("  mode:    {}", data.mode.as_deref().unwrap_or("unknown").bright_white());
    match data.target {
        Some(target) => println!("  target:  {:.1}°", radians_to_degrees(target)),
        None => println!("  target:  {}", "none".bright_black()),
    }
    println!("  modes:   {}", data.options.modes.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pypilot-bridge")
        .version("0.1.0")
        .author("Marine Systems Engineering Team")
        .about("🧭 PyPilot autopilot bridge")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON options file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("pypilot daemon host (overrides the options file)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("pypilot daemon port (overrides the options file)")
                .takes_value(true)
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Port must be a number between 0 and 65535".into()),
                }),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let default_level = if matches.is_present("verbose") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = match matches.value_of("config") {
        Some(path) => BridgeConfig::load(Path::new(path)).await?,
        None => BridgeConfig::default(),
    };
    if let Some(host) = matches.value_of("host") {
        config.pypilot.host = host.to_string();
    }
    if let Some(port) = matches.value_of("port") {
        config.pypilot.port = port.parse()?;
    }
    config.validate()?;

    println!("{}", "🧭 PyPilot Autopilot Bridge".bright_blue().bold());
    println!("{}", "==========================".bright_blue());
    println!("{}", HELP_TEXT.bright_black());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut connector = TcpConnector::new(events_tx, config.reconnect_interval());

    let mut agent = AutopilotAgent::new(ConsoleHost);
    agent.initialise(&mut connector, config.endpoint());

    let (runtime, handle) = AgentRuntime::new(agent, events_rx);
    let runtime_task = tokio::spawn(runtime.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = run_command(&handle, command).await {
                            println!("{} {}", "❌".red(), e.to_string().bright_red());
                        }
                    }
                    Err(message) => println!("{} {}", "⚠️ ".yellow(), message),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    let agent = runtime_task.await?;
    info!(counters = ?agent.get_state_counters(), "Bridge stopped");
    println!("{}", "🧭 PyPilot bridge stopped".bright_green());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_degree_commands() {
        assert_eq!(parse_command("target 100"), Ok(ConsoleCommand::Target(100.0)));
        assert_eq!(parse_command("adjust -10"), Ok(ConsoleCommand::Adjust(-10.0)));
        assert_eq!(parse_command("dodge 3"), Ok(ConsoleCommand::Dodge(3.0)));
        assert!(parse_command("target").is_err());
        assert!(parse_command("target north").is_err());
    }

    #[test]
    fn test_parse_words() {
        assert_eq!(parse_command("  engage "), Ok(ConsoleCommand::Engage));
        assert_eq!(parse_command("mode wind"), Ok(ConsoleCommand::Mode("wind".to_string())));
        assert_eq!(parse_command("tack port"), Ok(ConsoleCommand::Tack(TackDirection::Port)));
        assert!(parse_command("tack astern").is_err());
        assert!(parse_command("jibe").is_err());
    }
}
