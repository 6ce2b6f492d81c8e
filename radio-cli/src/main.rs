use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use radio_sdk::{DeviceEvent, Lifecycle, ListOrigin, Origin, Radio, RadioConfig};
use tracing::{debug, info, warn};

/// Control an FSAPI internet radio
#[derive(Parser, Debug)]
#[command(name = "radio-cli")]
#[command(about = "Connect to one FSAPI radio, watch it and change its settings")]
#[command(version)]
pub struct Args {
    /// Radio address, host or host:port
    #[arg(short, long, env = "RADIO_ADDRESS")]
    pub address: String,

    /// Device pin (overrides the config file)
    #[arg(short, long, env = "RADIO_PIN")]
    pub pin: Option<String>,

    /// JSON config file; defaults to the per-user config path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// First index used when paging lists
    #[arg(long, value_enum)]
    pub list_origin: Option<OriginArg>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Seconds to wait for the initial refresh
    #[arg(long, default_value = "10")]
    pub ready_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print connectivity and property updates until Ctrl-C
    Watch,
    /// Print one property, or all of them
    Get {
        property: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a property
    Set { property: String, value: String },
    /// Run an action: next, previous, play, pause, stop
    Action { name: String },
    /// Print the modes the radio reports
    Modes,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginArg {
    MinusOne,
    Zero,
}

impl From<OriginArg> for ListOrigin {
    fn from(arg: OriginArg) -> Self {
        match arg {
            OriginArg::MinusOne => ListOrigin::MinusOne,
            OriginArg::Zero => ListOrigin::Zero,
        }
    }
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(anyhow!("Address must not be empty"));
        }

        if self.ready_timeout == 0 {
            return Err(anyhow!("Ready timeout must be positive"));
        }

        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(anyhow!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.log_level
                ));
            }
        }

        Ok(())
    }

    /// Config file (if any) with command line overrides applied
    pub fn radio_config(&self) -> Result<RadioConfig> {
        let mut config = match &self.config {
            Some(path) => RadioConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => match RadioConfig::default_path() {
                Some(path) => RadioConfig::load_or_default(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?,
                None => RadioConfig::default(),
            },
        };

        if let Some(pin) = &self.pin {
            config.pin = pin.clone();
        }
        if let Some(origin) = self.list_origin {
            config.list_origin = origin.into();
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(log_level: &str) {
    let filter = match log_level.to_lowercase().as_str() {
        "error" => "error",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "warn",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Block until the first full refresh has landed
async fn wait_ready(radio: &Radio, timeout: Duration) -> Result<()> {
    let mut lifecycle = radio.engine().watch_lifecycle();
    tokio::time::timeout(timeout, lifecycle.wait_for(|l| *l == Lifecycle::Live))
        .await
        .context("Timed out waiting for the radio to refresh")?
        .map_err(|_| anyhow!("Radio stopped before it was ready"))?;
    Ok(())
}

fn print_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::ConnectivityChanged { connected } => {
            println!("* {}", if *connected { "connected" } else { "disconnected" });
        }
        DeviceEvent::PropertyUpdated { name, value, origin } => {
            let marker = match origin {
                Origin::Remote => ' ',
                Origin::Local => '>',
            };
            let rendered = value.to_string().replace('\n', " | ");
            println!("{}{:<13} {}", marker, name, rendered.trim_end_matches(" | "));
        }
        DeviceEvent::ModeOptionsChanged { options } => {
            println!("* modes: {}", options.join(", "));
        }
    }
}

async fn watch(radio: &Radio) -> Result<()> {
    let mut events = radio.subscribe();

    for (name, value) in radio.properties() {
        println!(" {:<13} {}", name, value.to_string().replace('\n', " | "));
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn get(radio: &Radio, property: Option<&str>, json: bool) -> Result<()> {
    let values = match property {
        Some(key) => {
            let value = radio
                .get_property(key)?
                .ok_or_else(|| anyhow!("'{}' has no value on this radio", key))?;
            vec![(key.to_string(), value)]
        }
        None => radio
            .properties()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    };

    if json {
        let map: serde_json::Map<_, _> = values
            .into_iter()
            .map(|(name, value)| serde_json::to_value(value).map(|json| (name, json)))
            .collect::<Result<_, serde_json::Error>>()?;
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (name, value) in values {
            println!("{:<13} {}", name, value.to_string().replace('\n', " | "));
        }
    }
    Ok(())
}

fn modes(radio: &Radio) {
    let caps = radio.capabilities();
    println!("{} ({})", radio.name, radio.id);
    for entry in caps.modes.entries() {
        println!(
            "{:>3}  {:<10} {:<20} {}",
            entry.index,
            entry.id,
            entry.label,
            if entry.selectable { "selectable" } else { "" }
        );
    }
    if let Some(range) = &caps.fm_range {
        println!(
            "FM {:.2}-{:.2} MHz, step {} kHz",
            range.lower as f64 / 1000.0,
            range.upper as f64 / 1000.0,
            range.step
        );
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.radio_config()?;
    debug!(?config, "effective configuration");

    let radio = Radio::connect(&args.address, &args.address, &config)
        .await
        .with_context(|| format!("Failed to connect to {}", args.address))?;
    info!(id = %radio.id, name = %radio.name, "connected");

    let result = async {
        wait_ready(&radio, Duration::from_secs(args.ready_timeout)).await?;

        match &args.command {
            Command::Watch => watch(&radio).await,
            Command::Get { property, json } => get(&radio, property.as_deref(), *json),
            Command::Set { property, value } => {
                let applied = radio.set_property_str(property, value).await?;
                println!("{} = {}", property, applied);
                Ok(())
            }
            Command::Action { name } => {
                radio.invoke_action(name).await?;
                Ok(())
            }
            Command::Modes => {
                modes(&radio);
                Ok(())
            }
        }
    }
    .await;

    radio.stop();
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;
    init_tracing(&args.log_level);

    run(args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[rstest]
    #[case(&["radio-cli", "-a", "10.0.0.5", "watch"], Command::Watch)]
    #[case(&["radio-cli", "-a", "10.0.0.5", "modes"], Command::Modes)]
    #[case(
        &["radio-cli", "-a", "10.0.0.5", "get", "volume"],
        Command::Get { property: Some("volume".into()), json: false }
    )]
    #[case(
        &["radio-cli", "-a", "10.0.0.5", "get", "--json"],
        Command::Get { property: None, json: true }
    )]
    #[case(
        &["radio-cli", "-a", "10.0.0.5", "set", "mode", "Internet radio"],
        Command::Set { property: "mode".into(), value: "Internet radio".into() }
    )]
    #[case(
        &["radio-cli", "-a", "10.0.0.5", "action", "next"],
        Command::Action { name: "next".into() }
    )]
    fn test_commands(#[case] argv: &[&str], #[case] expected: Command) {
        assert_eq!(parse(argv).command, expected);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let dir = std::env::temp_dir().join(format!("radio-cli-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{ "pin": "1111", "volume_limit_percent": 50 }"#).unwrap();

        let args = parse(&[
            "radio-cli",
            "-a",
            "10.0.0.5",
            "--config",
            path.to_str().unwrap(),
            "--pin",
            "9999",
            "--list-origin",
            "zero",
            "watch",
        ]);
        let config = args.radio_config().unwrap();

        assert_eq!(config.pin, "9999");
        assert_eq!(config.list_origin, ListOrigin::Zero);
        assert_eq!(config.volume_limit_percent, 50);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_validation() {
        let mut args = parse(&["radio-cli", "-a", "10.0.0.5", "modes"]);
        assert!(args.validate().is_ok());

        args.log_level = "verbose".into();
        assert!(args.validate().is_err());

        args.log_level = "info".into();
        args.ready_timeout = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_address_is_required() {
        assert!(Args::try_parse_from(["radio-cli", "watch"]).is_err());
    }
}
