//! querygate CLI Entry Point
//!
//! Subcommands map one-to-one onto gateway operations:
//! - `query` - classify and run one read-only statement
//! - `tables` / `describe` / `relationships` / `stats` / `info` - schema introspection
//! - `init` - interactively save a connection profile
//! - `mcp` - MCP server mode (hidden, for AI agent integration)
//!
//! Stdout carries exactly one JSON envelope per invocation (unless `query --format text` is
//! asked for). Logs go to stderr, filtered by `QUERYGATE_LOG` (default `warn`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Input, Password, Select};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use querygate::config::store::{self, save_connection};
use querygate::{
    ConfigLocation, ConnectionConfig, ConnectionSelector, DatabaseGateway, DatabaseType, Envelope,
    ErrorEnvelope, Metadata, StoredConnection, TableRef,
};

/// querygate - read-only SQL and schema introspection for agents
#[derive(Parser)]
#[command(name = "querygate")]
#[command(about = "Read-only query gateway and schema introspection for PostgreSQL, MySQL and SQLite")]
#[command(version)]
struct Cli {
    /// Named connection from .querygate/config.json or the global config
    #[arg(long, global = true)]
    connection: Option<String>,

    /// Connection URL (postgres://, mysql://, sqlite://); overrides --connection
    #[arg(long, global = true, env = "QUERYGATE_DATABASE_URL", hide_env_values = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one read-only SQL statement
    Query {
        sql: String,

        /// Maximum rows to return
        #[arg(long)]
        limit: Option<usize>,

        /// Statement timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },

    /// List tables and views
    Tables {
        #[arg(long)]
        schema: Option<String>,
    },

    /// Describe tables (`users`, `sales.orders`) or every table with --all
    Describe {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        tables: Vec<TableRef>,

        #[arg(long)]
        all: bool,

        /// Schema for --all and for unqualified table names
        #[arg(long)]
        schema: Option<String>,
    },

    /// Show incoming and outgoing foreign keys of a table
    Relationships { table: TableRef },

    /// Row counts, sizes and per-column null/distinct counts
    Stats {
        #[arg(required = true)]
        tables: Vec<TableRef>,
    },

    /// Engine version, database size and object counts
    Info,

    /// Interactively create and save a connection profile
    Init,

    /// Start MCP server (hidden from help, for AI agent integration)
    #[command(hide = true)]
    Mcp,
}

impl Commands {
    const fn operation(&self) -> &'static str {
        match self {
            Self::Query { .. } => "run_query",
            Self::Tables { .. } => "list_tables",
            Self::Describe { .. } => "describe_table",
            Self::Relationships { .. } => "relationships",
            Self::Stats { .. } => "table_stats",
            Self::Info => "database_info",
            Self::Init => "init",
            Self::Mcp => "mcp",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_env("QUERYGATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("querygate: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let selector = ConnectionSelector { url: cli.url, name: cli.connection };
    let operation = cli.command.operation();

    match cli.command {
        Commands::Init => return run_init().await,
        Commands::Mcp => {
            let gateway = open_gateway(&selector).context("could not start the MCP server")?;
            querygate::mcp::serve(gateway).await?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let gateway = match open_gateway(&selector) {
        Ok(gateway) => gateway,
        Err(e) => return emit::<()>(&Envelope::Error(ErrorEnvelope::new("", operation, &e))),
    };
    let engine = gateway.engine().as_str();
    let started = Instant::now();

    match cli.command {
        Commands::Query { sql, limit, timeout_ms, format } => {
            let result = gateway.run_query(&sql, limit, timeout_ms).await;
            match (format, result) {
                (Format::Text, Ok(result)) => {
                    println!("{}", gateway.render_text(&result));
                    Ok(ExitCode::SUCCESS)
                }
                (_, result) => {
                    let envelope =
                        Envelope::from_result(engine, operation, started, result, |r, ms| {
                            Metadata::for_query(ms, r)
                        });
                    emit(&envelope)
                }
            }
        }
        Commands::Tables { schema } => {
            let result = gateway.list_tables(schema.as_deref()).await;
            emit(&Envelope::from_result(engine, operation, started, result, plain))
        }
        Commands::Describe { all: true, schema, .. } => {
            let result = gateway.describe_schema(schema.as_deref()).await;
            emit(&Envelope::from_result(engine, "describe_schema", started, result, plain))
        }
        Commands::Describe { tables, schema, .. } => {
            let tables: Vec<TableRef> = tables
                .into_iter()
                .map(|t| TableRef { schema: t.schema.or_else(|| schema.clone()), table: t.table })
                .collect();
            if let [table] = tables.as_slice() {
                let result = gateway.describe_table(table.schema.as_deref(), &table.table).await;
                emit(&Envelope::from_result(engine, operation, started, result, plain))
            } else {
                let items = gateway.describe_tables(&tables).await;
                emit(&Envelope::from_result(engine, "describe_tables", started, Ok(items), plain))
            }
        }
        Commands::Relationships { table } => {
            let result = gateway.relationships(table.schema.as_deref(), &table.table).await;
            emit(&Envelope::from_result(engine, operation, started, result, plain))
        }
        Commands::Stats { tables } => {
            if let [table] = tables.as_slice() {
                let result = gateway.table_stats(table.schema.as_deref(), &table.table).await;
                emit(&Envelope::from_result(engine, operation, started, result, plain))
            } else {
                let items = gateway.table_stats_many(&tables).await;
                emit(&Envelope::from_result(engine, "table_stats_many", started, Ok(items), plain))
            }
        }
        Commands::Info => {
            let result = gateway.database_info().await;
            emit(&Envelope::from_result(engine, operation, started, result, plain))
        }
        Commands::Init | Commands::Mcp => Ok(ExitCode::SUCCESS),
    }
}

fn open_gateway(selector: &ConnectionSelector) -> querygate::Result<DatabaseGateway> {
    let (connection, config) = store::resolve(selector)?;
    DatabaseGateway::connect(&connection, config)
}

fn plain<T>(_: &T, execution_ms: u64) -> Metadata {
    Metadata::new(execution_ms)
}

/// Print the envelope; exit status 1 for error envelopes
fn emit<T: Serialize>(envelope: &Envelope<T>) -> anyhow::Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(if envelope.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ============================================================================
// init
// ============================================================================

const LOCATIONS: [&str; 2] = ["local (.querygate/config.json)", "global (user config directory)"];

async fn run_init() -> anyhow::Result<ExitCode> {
    let started = Instant::now();
    let engines = [DatabaseType::Postgres, DatabaseType::MySQL, DatabaseType::SQLite];
    let labels: Vec<&str> = engines.iter().map(DatabaseType::as_str).collect();
    let choice =
        Select::new().with_prompt("Database engine").items(&labels[..]).default(0).interact()?;
    let engine = engines[choice];

    let stored = match engine {
        DatabaseType::SQLite => {
            let file: String = Input::new().with_prompt("Database file").interact_text()?;
            StoredConnection {
                config: ConnectionConfig::sqlite(PathBuf::from(file)),
                password_env: None,
            }
        }
        DatabaseType::Postgres | DatabaseType::MySQL => prompt_server(engine)?,
    };

    let name: String = Input::new()
        .with_prompt("Connection name")
        .default("default".to_string())
        .interact_text()?;
    let location = match Select::new()
        .with_prompt("Save to")
        .items(&LOCATIONS[..])
        .default(0)
        .interact()?
    {
        0 => ConfigLocation::Local,
        _ => ConfigLocation::Global,
    };

    if Confirm::new().with_prompt("Test the connection now?").default(true).interact()? {
        let config = stored.resolve()?;
        let checked = match DatabaseGateway::connect(&config, querygate::GatewayConfig::default()) {
            Ok(gateway) => gateway.database_info().await,
            Err(e) => Err(e),
        };
        if let Err(e) = checked {
            return emit::<()>(&Envelope::Error(ErrorEnvelope::new(engine.as_str(), "init", &e)));
        }
    }

    let result = save_connection(&name, stored, location)
        .map(|path| serde_json::json!({ "connection": name, "saved_to": path }));
    emit(&Envelope::from_result(engine.as_str(), "init", started, result, plain))
}

fn prompt_server(engine: DatabaseType) -> anyhow::Result<StoredConnection> {
    let default_port: u16 = if engine == DatabaseType::Postgres { 5432 } else { 3306 };

    let host: String =
        Input::new().with_prompt("Host").default("localhost".to_string()).interact_text()?;
    let port: u16 = Input::new().with_prompt("Port").default(default_port).interact_text()?;
    let user: String = Input::new().with_prompt("User").interact_text()?;
    let database: String = Input::new().with_prompt("Database").interact_text()?;
    let password_env: String = Input::new()
        .with_prompt("Password environment variable (empty to store the password)")
        .allow_empty(true)
        .interact_text()?;

    let (password, password_env) = if password_env.trim().is_empty() {
        let password =
            Password::new().with_prompt("Password").allow_empty_password(true).interact()?;
        (password, None)
    } else {
        (String::new(), Some(password_env.trim().to_string()))
    };

    let mut config = match engine {
        DatabaseType::MySQL => ConnectionConfig::mysql(host, port, user, password, database),
        _ => ConnectionConfig::postgres(host, port, user, password, database),
    };
    if password_env.is_some() {
        config.password = None;
    }
    Ok(StoredConnection { config, password_env })
}
