use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use lattice_vmc::config;
use lattice_vmc::driver;
use lattice_vmc::error::Result;

#[derive(Parser, Debug)]
#[command(version, about = "Variational Monte Carlo optimization of lattice wavefunctions")]
struct Args {
    /// Configuration document (JSON, or YAML by extension)
    config: PathBuf,

    /// Number of SPMD workers run as threads
    #[arg(short, long, default_value_t = 1)]
    workers: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = try_main(&args) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn try_main(args: &Args) -> Result<()> {
    let input = config::load_input(&args.config)?;
    driver::run(&input, args.workers.max(1))
}
