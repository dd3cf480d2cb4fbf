use anyhow::Result;
use clap::Parser;
use log::info;

use deduprs::args::Args;
use deduprs::driver;
use deduprs::recab::{NullRecalibrator, Recalibrator};

#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if args.params {
        info!("parameters: {args:?}");
    }

    let mut hook = NullRecalibrator::default();
    let recalibrator: Option<&mut dyn Recalibrator> = if args.recab {
        Some(&mut hook)
    } else {
        None
    };

    driver::run(&args, recalibrator)
}
