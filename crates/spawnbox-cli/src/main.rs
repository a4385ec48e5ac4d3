//! spawnbox - run commands in ephemeral systemd-nspawn containers

mod commands;

use clap::{Parser, Subcommand};
use spawnbox_config::AppConfig;
use spawnbox_core::LifecycleError;
use spawnbox_exec::ExecError;
use spawnbox_image::ImageError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "spawnbox")]
#[command(author, version, about = "Ephemeral systemd-nspawn containers", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot an image and run a command inside it
    Run {
        /// Curated image label, e.g. debian-bullseye or debian-11
        image: String,

        /// Command to run inside the container
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,

        /// Connect the command to the current terminal
        #[arg(short, long)]
        interactive: bool,

        /// Allocate a pseudo-terminal inside the container
        #[arg(short, long)]
        tty: bool,

        /// Remove the container afterwards. Accepted for familiarity
        /// with other runtimes; containers are always ephemeral here.
        #[arg(long)]
        rm: bool,
    },

    /// Download and provision container images
    Pull {
        /// Image labels to pull
        #[arg(required_unless_present = "all")]
        images: Vec<String>,

        /// Pull every curated image
        #[arg(long)]
        all: bool,

        /// Discard cached artifacts and acquire from scratch
        #[arg(long)]
        force: bool,
    },

    /// List all curated images
    ListImages,

    /// Boot an image and run the basic readiness probe
    Probe {
        /// Curated image label
        image: String,
    },

    /// Boot an image, install a package, and verify its units and ports
    Pkgprobe {
        /// Curated image label
        image: String,

        /// HTTP(S) URL of the package to install
        #[arg(long)]
        package: String,

        /// Unit that must report active after installation (repeatable)
        #[arg(long = "unit-is-active", value_name = "UNIT")]
        units: Vec<String>,

        /// TCP endpoint that must accept connections (repeatable)
        #[arg(long = "tcp-is-listening", value_name = "HOST:PORT")]
        listen: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The run subcommand relays container output on the caller's
    // streams, so its own chatter defaults to warnings only.
    let default_level = if cli.verbose {
        "debug"
    } else if matches!(&cli.command, Commands::Run { .. }) {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

async fn dispatch(command: Commands) -> anyhow::Result<i32> {
    let config = AppConfig::load()?;

    match command {
        Commands::Run {
            image,
            cmd,
            interactive,
            tty,
            rm: _,
        } => commands::run(config, &image, cmd, interactive, tty).await,
        Commands::Pull { images, all, force } => {
            commands::pull(config, images, all, force).await?;
            Ok(0)
        }
        Commands::ListImages => {
            commands::list_images();
            Ok(0)
        }
        Commands::Probe { image } => {
            commands::probe(config, &image).await?;
            Ok(0)
        }
        Commands::Pkgprobe {
            image,
            package,
            units,
            listen,
        } => {
            commands::pkgprobe(config, &image, &package, units, listen).await?;
            Ok(0)
        }
    }
}

/// Map failures to the documented exit codes. The payload's own exit
/// code passes through untouched, including the launcher's 203 for a
/// missing executable.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(image) = err.downcast_ref::<ImageError>() {
        if matches!(image, ImageError::UnknownImage(_)) {
            return 4;
        }
        return 1;
    }
    if let Some(lifecycle) = err.downcast_ref::<LifecycleError>() {
        return match lifecycle {
            LifecycleError::ImageNotFound(_) => 4,
            LifecycleError::BootTimeout { .. } => 5,
            LifecycleError::MachineExists { .. } => 6,
            LifecycleError::Exec(ExecError::CommandFailed { exit_code, .. }) => *exit_code,
            _ => 1,
        };
    }
    1
}
