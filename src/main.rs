use anyhow::Result;
use clap::Parser;

use contentforge::cli::{Cli, Command};
use contentforge::memory::{MemorySink, SledMemoryStore};
use contentforge::settings::Settings;
use contentforge::{server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    telemetry::init(&settings.logging)?;

    match cli.command {
        Command::Serve { addr } => server::serve(settings, addr).await,
        Command::Memory { id } => {
            let store = SledMemoryStore::open(&settings.memory.path)?;
            match store.get(id).await? {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(())
                }
                None => {
                    eprintln!("no memory record with id {id}");
                    std::process::exit(1);
                }
            }
        }
    }
}
