use clap::Parser;
use neon::cli::{Cli, Commands};
use neon::error::Error;
use neon::{config, init, logging, server};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(logging::debug_enabled());

    if let Err(e) = run_command(cli).await {
        print_error(&e);
        std::process::exit(1);
    }
}

async fn run_command(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Serve { config: path } => {
            let path = config::resolve_config_path(path.as_deref());
            let loaded = config::load(&path)?;
            config::validate(&loaded)?;
            server::serve(&loaded).await
        }
        Commands::Init { dir } => {
            init::scaffold(&dir)?;
            println!("Scaffolded configuration in {}", dir.display());
            Ok(())
        }
        Commands::Check { config: path } => {
            let path = config::resolve_config_path(path.as_deref());
            let loaded = config::load(&path)?;
            config::validate(&loaded)?;
            println!("Configuration {} is valid.", path.display());
            Ok(())
        }
    }
}

fn print_error(error: &Error) {
    match error {
        Error::Config(report) => {
            eprintln!("Configuration error\n{report}");
        }
        Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
            eprintln!(
                "File not found\n{io_err}\n\nHint: check the configuration path or run 'neon init' first."
            );
        }
        Error::Yaml(yaml_err) => {
            eprintln!("YAML error\n{yaml_err}\n\nHint: check the configuration file syntax.");
        }
        other => {
            eprintln!("Error\n{other}");
        }
    }
}
