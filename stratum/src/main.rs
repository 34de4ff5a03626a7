use clap::Parser;
use stratum::cli::Cli;
use stratum::logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_file.as_deref());
    stratum::run(cli)
}
