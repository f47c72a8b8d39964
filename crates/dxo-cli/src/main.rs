use clap::{Parser, Subcommand};
use dxo_core::config::resolve_ledger_path;
use dxo_core::{DatasetSource, DirectoryDatasetSource, OrderId, OrderLedger, SubjectId};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dxo")]
#[command(about = "Inspect and edit the local diagnostic order ledger")]
struct Cli {
    /// Ledger file (defaults to diagnostic_orders.config in the documents directory)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracked orders
    List {
        /// Print the raw ledger document
        #[arg(long)]
        json: bool,
    },
    /// Show the subject for one order
    Show {
        /// Order ID
        order_id: String,
    },
    /// Track an order for a subject
    Add {
        /// Order ID issued by the analysis service
        order_id: String,
        /// Subject (patient or dataset) ID
        subject_id: String,
    },
    /// Stop tracking an order
    Remove {
        /// Order ID
        order_id: String,
    },
    /// Print the resolved ledger path
    Path,
    /// List datasets available for submission under a directory
    Datasets {
        /// Directory holding one folder per subject
        root: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dxo_core=warn".parse()?)
                .add_directive("dxo=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}

fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    let ledger_path = resolve_ledger_path(cli.ledger);
    tracing::debug!("using ledger {}", ledger_path.display());

    match cli.command {
        Some(Commands::List { json }) => {
            let ledger = OrderLedger::load(&ledger_path)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(ledger.entries())?)?;
            } else if ledger.is_empty() {
                writeln!(out, "No orders found.")?;
            } else {
                for (order_id, subject_id) in ledger.iter() {
                    writeln!(out, "Order: {}, Subject: {}", order_id, subject_id)?;
                }
            }
        }
        Some(Commands::Show { order_id }) => {
            let ledger = OrderLedger::load(&ledger_path)?;
            match ledger.get(tracked_key(&ledger, &order_id)) {
                Some(subject_id) => writeln!(out, "{}", subject_id)?,
                None => writeln!(out, "No order found.")?,
            }
        }
        Some(Commands::Add {
            order_id,
            subject_id,
        }) => {
            let order_id = OrderId::new(order_id)?;
            let subject_id = SubjectId::new(subject_id)?;
            let mut ledger = OrderLedger::load(&ledger_path)?;
            match ledger.add(order_id.clone(), subject_id.clone())? {
                Some(previous) => writeln!(
                    out,
                    "Order {} reassigned from {} to {}",
                    order_id, previous, subject_id
                )?,
                None => writeln!(out, "Order {} saved for {}", order_id, subject_id)?,
            }
            tracing::info!("order {} tracked for {}", order_id, subject_id);
        }
        Some(Commands::Remove { order_id }) => {
            let mut ledger = OrderLedger::load(&ledger_path)?;
            let order_id = tracked_key(&ledger, &order_id).to_owned();
            match ledger.remove(&order_id)? {
                Some(subject_id) => {
                    tracing::info!("order {} for {} deleted", order_id, subject_id);
                    writeln!(out, "Order {} deleted.", order_id)?
                }
                None => writeln!(out, "Order {} was not tracked.", order_id)?,
            }
        }
        Some(Commands::Path) => {
            writeln!(out, "{}", ledger_path.display())?;
        }
        Some(Commands::Datasets { root }) => {
            let datasets = DirectoryDatasetSource::new(root).datasets()?;
            if datasets.is_empty() {
                writeln!(out, "No datasets found.")?;
            }
            for dataset in datasets {
                writeln!(out, "{}\t{}", dataset.subject, dataset.path.display())?;
            }
        }
        None => {
            writeln!(out, "Use 'dxo --help' for commands")?;
        }
    }

    Ok(())
}

/// Resolves a typed order id to a ledger key.
///
/// Keys are matched exactly first, so entries stored with surrounding whitespace stay
/// reachable; otherwise the trimmed input is used, as `add` stores it.
fn tracked_key<'a>(ledger: &OrderLedger, input: &'a str) -> &'a str {
    if ledger.contains(input) {
        input
    } else {
        input.trim()
    }
}
