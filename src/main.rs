use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use handsign::{
    config::{Config, ServerConfig},
    server::Server,
    service::Service,
};

#[derive(Parser)]
#[command(name = "handsign", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve `POST /recognize` over HTTP.
    Serve {
        #[command(flatten)]
        config: Config,
        #[command(flatten)]
        server: ServerConfig,
    },
    /// Recognize the gestures in image files and print one label per image.
    Classify {
        #[command(flatten)]
        config: Config,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    handsign::init_logger!();

    match Cli::parse().command {
        Command::Serve { config, server } => {
            server.validate()?;
            let service = Service::load(&config)?;
            Server::bind(server)?.run(Arc::new(service))
        }
        Command::Classify { config, images } => {
            let service = Service::load(&config)?;
            let mut recognizer = service.recognizer();
            for path in images {
                let data = std::fs::read(&path)
                    .with_context(|| format!("failed to read '{}'", path.display()))?;
                let recognition = recognizer.recognize(&data);
                match recognition.error {
                    Some(e) => println!("{}\t{}\t({e})", path.display(), recognition.label),
                    None => println!("{}\t{}", path.display(), recognition.label),
                }
            }
            Ok(())
        }
    }
}
