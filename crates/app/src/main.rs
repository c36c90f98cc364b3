use clap::Parser;

mod cli;

fn main() {
    if let Err(err) = cli::run(cli::Cli::parse()) {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}
