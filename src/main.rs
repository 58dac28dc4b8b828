use ringhub::Hub;
use ringhub_core::HubConfig;
use std::process::ExitCode;

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let uid: u64 = args
        .next()
        .ok_or("usage: ringhub <identifier> [config.toml]")?
        .parse()
        .map_err(|_| "identifier must be a decimal u64")?;
    let config = match args.next() {
        Some(path) => HubConfig::load(&path)?,
        None => HubConfig::default(),
    };

    tracing::info!(uid, "starting overlay hub");
    let mut hub = Hub::new(uid, config)?;
    hub.execute()?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
