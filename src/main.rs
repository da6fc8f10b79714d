// logrelay - main.rs
// Parses the command line and hands off to the CLI dispatcher; any setup error exits non-zero.

use clap::Parser;
use logrelay::cli::{dispatch, Cli};

fn main() -> anyhow::Result<()> {
    dispatch(Cli::parse())
}
