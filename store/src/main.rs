//! Thin inspection CLI for a store database: list collections, dump the raw
//! JSON rows of one collection. Generic `Record` access needs a concrete
//! Rust type at compile time, so this tool only talks to the raw `records`
//! table — it is a debugging aid, not a substitute for `benchrunner`'s own
//! commands.

use clap::{Parser, Subcommand};
use rusqlite::{Connection, params};

#[derive(Parser)]
#[command(name = "store", about = "Inspect a benchrunner store database")]
struct Cli {
    /// Path to the sqlite database file
    #[arg(short, long)]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the distinct collection names present in the database
    Collections,
    /// Dump every row's raw JSON for a collection
    Dump {
        collection: String,
    },
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let conn = Connection::open(&cli.db)?;

    match cli.command {
        Command::Collections => {
            let mut stmt = conn.prepare("SELECT DISTINCT collection FROM records ORDER BY collection")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                println!("{}", row?);
            }
        }
        Command::Dump { collection } => {
            let mut stmt = conn.prepare("SELECT id, data FROM records WHERE collection = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, data) = row?;
                println!("{id}\t{data}");
            }
        }
    }

    Ok(())
}
