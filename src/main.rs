use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, LevelFilter};
use signal_hook::consts::SIGINT;
use simple_logger::SimpleLogger;

use grayscott::driver::{RunSummary, SimulationDriver};
use grayscott::io::cbor::CborStore;
use grayscott::io::memory::MemoryStore;
use grayscott::io::null::NullWriter;
use grayscott::io::{Reader, Writer};
use grayscott::launch;
use grayscott::message::comm::Communicator;
use grayscott::message::tcp::TcpCommunicator;
use grayscott::settings::Settings;
use grayscott::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// All ranks are threads of this process
    Local,
    /// This process is one rank; the others are reached over TCP
    Tcp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Engine {
    /// One CBOR file per rank and output step
    Cbor,
    /// Keep output in memory (round-trip checks only)
    Memory,
    /// Discard output
    Null,
}

#[derive(Debug, Parser)]
#[clap(version, about = "Gray-Scott reaction-diffusion on a decomposed 3D grid")]
struct Opts {
    /// Settings file (JSON)
    settings: PathBuf,

    /// Number of ranks to start with the local transport
    #[clap(short = 'n', long, default_value = "1")]
    ranks: usize,

    #[clap(long, value_enum, default_value = "local")]
    transport: Transport,

    /// Rank of this process with the TCP transport
    #[clap(long)]
    rank: Option<usize>,

    /// Address of a rank, once per rank in rank order (TCP transport)
    #[clap(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Seconds to wait for a peer message before giving up (0 waits forever)
    #[clap(long, default_value = "600")]
    timeout: u64,

    #[clap(long, value_enum, default_value = "cbor")]
    engine: Engine,

    /// Override the number of steps in the settings file
    #[clap(long)]
    steps: Option<u64>,

    /// Override the output name in the settings file
    #[clap(long)]
    output: Option<String>,

    /// Pin rank threads to cores
    #[clap(long)]
    pin_threads: bool,

    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

fn simulate<C: Communicator>(
    settings: &Settings,
    comm: C,
    engine: Engine,
    memory: &MemoryStore,
    stop: &Arc<AtomicBool>,
) -> Result<RunSummary> {
    let writer: Box<dyn Writer> = match engine {
        Engine::Cbor => Box::new(CborStore::new()),
        Engine::Memory => Box::new(memory.clone()),
        Engine::Null => Box::new(NullWriter::new()),
    };
    let reader: Option<Box<dyn Reader>> = match engine {
        Engine::Cbor => Some(Box::new(CborStore::new())),
        Engine::Memory => Some(Box::new(memory.clone())),
        Engine::Null => None,
    };

    let mut driver = SimulationDriver::new(settings.clone(), comm, writer)?.with_stop_flag(Arc::clone(stop));
    if let Some(reader) = reader {
        driver = driver.with_reader(reader);
    }
    driver.run()
}

fn run(opts: Opts) -> Result<()> {
    let mut settings = Settings::from_json(&opts.settings)?;

    if let Some(steps) = opts.steps {
        settings.steps = steps;
    }
    if let Some(output) = opts.output.clone() {
        settings.output = output;
    }

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&stop))?;
    let memory = MemoryStore::new();

    match opts.transport {
        Transport::Local => {
            launch::run_local(opts.ranks, opts.pin_threads, |comm| {
                simulate(&settings, comm, opts.engine, &memory, &stop)
            })?;
        }
        Transport::Tcp => {
            let rank = opts
                .rank
                .ok_or_else(|| Error::config("--rank is required with the TCP transport"))?;
            let timeout = Some(Duration::from_secs(opts.timeout)).filter(|t| !t.is_zero());
            let comm = TcpCommunicator::connect(rank, opts.peers.clone(), timeout)?;
            simulate(&settings, comm, opts.engine, &memory, &stop)?;
        }
    }
    Ok(())
}

fn main() {
    let opts = Opts::parse();

    if let Err(e) = SimpleLogger::new().with_level(opts.log_level).init() {
        eprintln!("could not start the logger: {}", e);
    }
    if let Err(e) = run(opts) {
        let kind = if e.is_configuration() {
            "configuration error"
        } else if e.is_communication() {
            "communication error"
        } else if e.is_round_trip() {
            "output round trip failed"
        } else {
            "I/O error"
        };
        error!("{}: {}", kind, e);
        std::process::exit(1);
    }
}
