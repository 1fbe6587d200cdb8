use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.facegate.Facegate1",
    default_service = "org.facegate.Facegate1",
    default_path = "/org/facegate/Facegate1"
)]
trait Facegate {
    fn register(&self, image: &[u8], name: &str, identifier: &str) -> zbus::Result<String>;
    fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    fn lookup(&self, identifier: &str) -> zbus::Result<String>;
    fn list_persons(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face registration and recognition CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register (or re-register) a face under an identifier
    Register {
        /// Unique person identifier (e.g. national ID)
        #[arg(short, long)]
        identifier: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Image file containing the face
        image: PathBuf,
    },
    /// Identify the face in an image
    Recognize {
        /// Image file containing the face
        image: PathBuf,
    },
    /// Show one registered person
    Lookup {
        identifier: String,
    },
    /// List registered people
    List,
    /// Show daemon status
    Status,
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    let proxy = FacegateProxy::new(&conn).await.context("facegated not reachable")?;
    tracing::debug!(session = cli.session, "connected to facegated");

    let reply = match cli.command {
        Commands::Register { identifier, name, image } => {
            let bytes = read_image(&image)?;
            proxy.register(&bytes, &name, &identifier).await
        }
        Commands::Recognize { image } => {
            let bytes = read_image(&image)?;
            proxy.recognize(&bytes).await
        }
        Commands::Lookup { identifier } => proxy.lookup(&identifier).await,
        Commands::List => proxy.list_persons().await,
        Commands::Status => proxy.status().await,
    };

    match reply {
        Ok(json) => print_json(&json),
        Err(zbus::Error::MethodError(name, detail, _)) => {
            let detail = detail.unwrap_or_default();
            anyhow::bail!("{}: {detail}", name.as_str().trim_start_matches("org.facegate.Error."))
        }
        Err(err) => Err(err).context("D-Bus call failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_register_args() {
        let cli = Cli::try_parse_from(["facegate", "register", "-i", "A001", "-n", "Alice", "alice.jpg"]).unwrap();
        match cli.command {
            Commands::Register { identifier, name, image } => {
                assert_eq!(identifier, "A001");
                assert_eq!(name, "Alice");
                assert_eq!(image, PathBuf::from("alice.jpg"));
            }
            _ => panic!("expected register"),
        }
        assert!(!cli.session);
    }

    #[test]
    fn test_register_requires_identifier() {
        assert!(Cli::try_parse_from(["facegate", "register", "-n", "Alice", "alice.jpg"]).is_err());
    }

    #[test]
    fn test_session_flag_is_global() {
        let cli = Cli::try_parse_from(["facegate", "status", "--session"]).unwrap();
        assert!(cli.session);
    }
}
