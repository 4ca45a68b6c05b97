//! Tern - DSR Network Simulation
//!
//! Runs the routing node state machine over simulated meshes in virtual
//! time.

use clap::{Parser, Subcommand, ValueEnum};
use tern_logging::{LogConfig, TernSubscriberBuilder};
use tern_routing::CacheType;

use tern_simulation::{scenarios, topology};

#[derive(Parser)]
#[command(
    name = "tern-sim",
    about = "Discrete-event simulation of DSR route discovery and maintenance",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSONL instead of human-readable logs
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover a route across a five-node line
    Line,

    /// Break a link on an established route
    Break,

    /// Salvage a packet at an intermediate node
    Salvage,

    /// Learn a shorter route from a gratuitous reply
    Shortcut,

    /// Partition the network and heal it
    Partition,

    /// Random flows over a random mesh
    Random {
        /// Number of nodes
        #[arg(short, long, default_value = "12")]
        nodes: u16,

        /// Connection probability
        #[arg(short, long, default_value = "0.3")]
        prob: f64,

        /// Virtual seconds to run
        #[arg(short, long, default_value = "20")]
        seconds: u64,

        /// Route cache strategy
        #[arg(short, long, value_enum, default_value = "link")]
        cache: CacheArg,

        /// Seed for topology, flows and jitter
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Create and visualize a topology
    Topology {
        #[arg(short, long, value_enum, default_value = "ring")]
        kind: TopologyKind,

        /// Number of nodes
        #[arg(short, long, default_value = "6")]
        nodes: u16,

        /// Connection probability for random topology
        #[arg(short, long, default_value = "0.4")]
        prob: f64,

        /// Columns for grid topology
        #[arg(long, default_value = "3")]
        columns: u16,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CacheArg {
    Path,
    Link,
}

impl From<CacheArg> for CacheType {
    fn from(arg: CacheArg) -> Self {
        match arg {
            CacheArg::Path => CacheType::Path,
            CacheArg::Link => CacheType::Link,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyKind {
    Line,
    Ring,
    Grid,
    Star,
    Full,
    Random,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.json {
        LogConfig::default()
    } else {
        LogConfig::development()
    };
    config.default_level = if cli.verbose { "debug" } else { "info" }.to_string();
    let _guard = TernSubscriberBuilder::new().with_config(config).init()?;

    match cli.command {
        Commands::Line => {
            scenarios::run_line_discovery_scenario();
        }
        Commands::Break => {
            scenarios::run_broken_link_scenario();
        }
        Commands::Salvage => {
            scenarios::run_salvage_scenario();
        }
        Commands::Shortcut => {
            scenarios::run_shortcut_scenario();
        }
        Commands::Partition => {
            scenarios::run_partition_scenario();
        }
        Commands::Random {
            nodes,
            prob,
            seconds,
            cache,
            seed,
        } => {
            scenarios::run_random_flows_scenario(nodes, prob, seconds, cache.into(), seed);
        }
        Commands::Topology {
            kind,
            nodes,
            prob,
            columns,
        } => {
            let builder = topology::MeshBuilder::new(nodes);
            let mesh = match kind {
                TopologyKind::Line => builder.line(),
                TopologyKind::Ring => builder.ring(),
                TopologyKind::Grid => builder.grid(columns),
                TopologyKind::Star => builder.star(),
                TopologyKind::Full => builder.full_mesh(),
                TopologyKind::Random => builder.random(prob, 0),
            };
            println!("{}", mesh.visualize());
        }
    }

    Ok(())
}
