use clap::Parser;
use rustbac_bridge::{BridgeConfig, Coordinator, SimulatedNetwork};
use rustbac_bridge_tools::{forward_updates, ConsoleCommand, PollPropertyArg};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "bacnet-bridge")]
struct Args {
    /// JSON configuration file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Priority for writes that do not carry one (1-16).
    #[arg(long)]
    default_priority: Option<u8>,
    /// Seconds between full polls.
    #[arg(long)]
    poll_interval: Option<u64>,
    /// Properties to poll; may be repeated.
    #[arg(long = "poll-property", value_enum)]
    poll_properties: Vec<PollPropertyArg>,
    #[arg(long)]
    log_level: Option<log::LevelFilter>,
    /// Skip the Who-Is and object walk at startup.
    #[arg(long)]
    no_discovery: bool,
    /// Print every registry update as a JSON line.
    #[arg(long)]
    watch: bool,
    /// Number of simulated devices.
    #[arg(long, default_value_t = 3)]
    devices: u32,
    #[arg(long, default_value_t = 1000)]
    first_device_id: u32,
    /// Analog-value objects per simulated device.
    #[arg(long, default_value_t = 4)]
    analog_values: u32,
    /// Binary-value objects per simulated device.
    #[arg(long, default_value_t = 2)]
    binary_values: u32,
}

impl Args {
    fn load_config(&self) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_json_str(&std::fs::read_to_string(path)?)?,
            None => BridgeConfig::default(),
        };
        if let Some(priority) = self.default_priority {
            config.default_priority = priority;
        }
        if let Some(seconds) = self.poll_interval {
            config = config.with_poll_interval(Duration::from_secs(seconds));
        }
        if !self.poll_properties.is_empty() {
            config = config.with_poll_properties(
                self.poll_properties
                    .iter()
                    .map(|arg| arg.into_property_id())
                    .collect(),
            );
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.no_discovery {
            config = config.with_discovery(false);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.load_config()?;
    env_logger::Builder::new()
        .filter_level(config.log_level)
        .parse_default_env()
        .init();

    let network = SimulatedNetwork::fleet(
        args.first_device_id,
        args.devices,
        args.analog_values,
        args.binary_values,
    )
    .await;
    let mut coordinator = Coordinator::new(network, config)?;

    if args.watch {
        let updates = coordinator.registry().subscribe_updates();
        tokio::spawn(forward_updates(updates, |line| println!("{line}")));
    }

    coordinator.start().await?;
    let requests = coordinator.requests();
    println!(
        "Coordinating {} simulated device(s) from {}. JSON requests on stdin, EOF or Ctrl+C to stop.",
        args.devices, args.first_device_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match ConsoleCommand::parse(line) {
            Ok(ConsoleCommand::Snapshot) => {
                let snapshot = coordinator.registry().snapshot().await;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            Ok(ConsoleCommand::Subscriptions) => {
                let active = coordinator.subscriptions().active().await;
                println!("{}", serde_json::to_string_pretty(&active)?);
            }
            Ok(ConsoleCommand::Submit(request)) => {
                if let Err(err) = requests.submit(request) {
                    eprintln!("rejected: {err}");
                }
            }
            Err(err) => eprintln!("{err}"),
        }
    }

    let report = coordinator.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
