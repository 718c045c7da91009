//! genl - inspect generic netlink families.
//!
//! Queries the generic netlink controller for registered families and
//! follows multicast notifications.

mod output;

use std::time::Duration;

use clap::{Parser, Subcommand};
use nlwire::netlink::RequestOptions;
use nlwire::netlink::genl::{GenlConnection, GenlEvent, GenlFrame};
use output::{OutputFormat, OutputOptions, print_all};
use tokio_stream::StreamExt;

#[derive(Parser)]
#[command(name = "genl", version, about = "Generic netlink family inspector")]
struct Cli {
    /// Output JSON.
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Pretty print JSON.
    #[arg(short = 'p', long, global = true)]
    pretty: bool,

    /// Show operations and multicast groups.
    #[arg(short = 'd', long, global = true)]
    details: bool,

    /// Give up on the controller after this many milliseconds.
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List all registered families.
    #[command(visible_alias = "ls")]
    List,

    /// Show a single family.
    Family {
        /// Family name.
        name: String,
    },

    /// Print notifications from a family's multicast group.
    #[command(visible_alias = "mon")]
    Monitor {
        /// Family name.
        family: String,

        /// Multicast group name.
        group: String,

        /// Stop after this many messages.
        #[arg(short = 'c', long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let opts = OutputOptions {
        details: cli.details,
        pretty: cli.pretty,
    };
    let request = RequestOptions::new().timeout(Duration::from_millis(cli.timeout_ms));

    let conn = GenlConnection::new()?;

    let result = match cli.command.unwrap_or(Command::List) {
        Command::List => {
            let mut families = conn.list_families_with(request).await?;
            families.sort_by_key(|f| f.id);
            print_all(&families, format, &opts).map_err(anyhow::Error::from)
        }
        Command::Family { name } => {
            let family = conn.resolve_family_with(&name, request).await?;
            print_all(&[family], format, &opts).map_err(anyhow::Error::from)
        }
        Command::Monitor {
            family,
            group,
            count,
        } => monitor(&conn, &family, &group, count, request).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn monitor(
    conn: &GenlConnection,
    family: &str,
    group: &str,
    count: Option<usize>,
    request: RequestOptions,
) -> anyhow::Result<()> {
    let info = conn.resolve_family_with(family, request).await?;
    let group_id = info
        .mcast_group(group)
        .ok_or_else(|| anyhow::anyhow!("family {} has no multicast group {}", family, group))?;

    let mut events = conn
        .events()
        .ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
    conn.connection().add_membership(group_id)?;
    conn.connection().set_persistent(true);

    let mut seen = 0;
    while let Some(event) = events.next().await {
        match event {
            GenlEvent::Message { frames, info } => {
                for frame in frames {
                    match frame {
                        GenlFrame::Genl(msg) => println!(
                            "[{}] family {:#x} cmd {} version {} ({} bytes) from port {}",
                            group, msg.family, msg.cmd, msg.version, msg.payload.len(), info.port
                        ),
                        GenlFrame::Raw(msg) => {
                            println!("[{}] type {} ({} bytes)", group, msg.msg_type(), msg.payload.len())
                        }
                    }
                    seen += 1;
                }
            }
            GenlEvent::Invalid { error, data, .. } => {
                tracing::warn!(%error, len = data.len(), "dropping undecodable datagram");
            }
            GenlEvent::Error(error) => return Err(error.into()),
            GenlEvent::Closed => break,
        }
        if count.is_some_and(|limit| seen >= limit) {
            break;
        }
    }

    conn.connection().set_persistent(false);
    Ok(())
}
