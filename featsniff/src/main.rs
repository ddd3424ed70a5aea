use clap::Parser;
use env_logger::Env;
use featsniff::{app, cmd::Cmd};
use log::error;

#[tokio::main]
async fn main() {
    let cmd = Cmd::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cmd.verbose)).init();

    if let Err(e) = app::run(cmd).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
