use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
#[rustfmt::skip]
use log::{error, info};
use tokio::signal;
use xsksteer::config::DEFAULT_CONFIG_PATH;
use xsksteer::{Config, SocketLayout, SteeringControl, SteeringProgram, XdpMode};

#[derive(Debug, Parser)]
#[clap(name = "xsksteer", about = "Steer UDP flows into per-queue AF_XDP sockets")]
struct Opt {
    /// Configuration file; defaults are used when it does not exist
    #[clap(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the program, write its configuration, pin its maps and attach it
    Run(SteeringArgs),
    /// Print the routing table index of every socket slot
    Layout {
        #[clap(flatten)]
        steering: SteeringArgs,
        /// Print the layout as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Overrides for values of the configuration file.
#[derive(Debug, Args)]
struct SteeringArgs {
    #[clap(short, long)]
    iface: Option<String>,
    #[clap(short, long, value_enum)]
    mode: Option<XdpMode>,
    #[clap(short, long)]
    address: Option<Ipv4Addr>,
    #[clap(short, long)]
    port: Option<u16>,
    #[clap(short, long)]
    sockets_per_queue: Option<u32>,
    /// Comma separated receive queue indices
    #[clap(short, long, value_delimiter = ',')]
    queues: Option<Vec<u32>>,
    #[clap(long)]
    pin_path: Option<PathBuf>,
}

impl SteeringArgs {
    fn apply_to(self, config: &mut Config) {
        if let Some(iface) = self.iface {
            config.interface.name = iface;
        }
        if let Some(mode) = self.mode {
            config.interface.mode = mode;
        }
        if let Some(address) = self.address {
            config.steering.address = address;
        }
        if let Some(port) = self.port {
            config.steering.port = port;
        }
        if let Some(sockets_per_queue) = self.sockets_per_queue {
            config.steering.sockets_per_queue = sockets_per_queue;
        }
        if let Some(queues) = self.queues {
            config.steering.queues = queues;
        }
        if let Some(pin_path) = self.pin_path {
            config.bpf.pin_path = pin_path;
        }
    }
}

fn init_logging(config: &Config) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
}

fn print_layout(layout: &SocketLayout) {
    println!("{} socket(s) per queue", layout.sockets_per_queue());
    println!("{:>6} {:>6} {:>6}", "queue", "slot", "index");
    for slot in layout.slots() {
        println!("{:>6} {:>6} {:>6}", slot.queue, slot.slot, slot.index);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    let layout = config.layout()?;

    let mut program = SteeringProgram::load().context("failed to load the steering program")?;
    program
        .pin_maps(&config.bpf.pin_path)
        .with_context(|| format!("failed to pin maps under {}", config.bpf.pin_path.display()))?;

    let mut controller = program.controller().context("failed to open steering maps")?;
    controller
        .apply(&config.settings())
        .context("failed to write steering configuration")?;
    info!(
        "Steering {}:{} across {} socket(s) per queue",
        config.steering.address, config.steering.port, config.steering.sockets_per_queue
    );

    let Config { interface, .. } = &config;
    program
        .attach(&interface.name, interface.mode)
        .with_context(|| {
            format!(
                "failed to attach the XDP program to {} - try --mode skb",
                interface.name
            )
        })?;

    for slot in layout.slots() {
        info!(
            "queue {} slot {} -> register socket at index {}",
            slot.queue, slot.slot, slot.index
        );
    }

    println!("Steering program is running. Press Ctrl-C to stop.");
    signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    info!("Shutting down");
    program.detach().context("failed to detach the XDP program")?;
    program.unpin_maps();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let mut config = Config::load(&opt.config)
        .with_context(|| format!("failed to load {}", opt.config.display()))?;

    match opt.command {
        Command::Run(args) => {
            args.apply_to(&mut config);
            init_logging(&config);
            if let Err(e) = run(config).await {
                error!("{e:#}");
                return Err(e);
            }
            Ok(())
        }
        Command::Layout { steering, json } => {
            steering.apply_to(&mut config);
            init_logging(&config);
            let layout = config.layout()?;
            if json {
                println!("{}", layout.to_json()?);
            } else {
                print_layout(&layout);
            }
            Ok(())
        }
    }
}
