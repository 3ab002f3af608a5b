use clap::Parser;
use fcn_training::telemetry::init_tracing;
use fcn_training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = TrainArgs::parse();
    run_train(args)
}
