use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dba::ast::FunctionWhitelist;
use dba::{dialect, translate, Config, Global, Schema, Value};

/// Run portable SQL against pooled database connections
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a query and print its rows as tab-separated values
    Query {
        /// Connection descriptor or saved connection name
        conn: String,
        sql: String,
        /// Bind parameters, in order (NULL, integers, floats, else text)
        params: Vec<String>,
    },
    /// Execute a statement and print the affected row count
    Exec {
        conn: String,
        sql: String,
        params: Vec<String>,
    },
    /// Print the dialect SQL for portable SQL without connecting
    Translate {
        /// Target dialect: postgres, sqlite or mssql
        #[arg(long, short)]
        dialect: String,
        /// JSON schema used for field resolution and casts
        #[arg(long)]
        schema: Option<PathBuf>,
        sql: String,
    },
    /// Verify a filter expression against the function whitelist
    Check { expr: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_default().context("loading config")?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let global = Global::new(config);
    global.initialize();
    let result = run(&global, cli.command);
    global.shutdown();
    result
}

fn run(global: &Global, command: Command) -> Result<()> {
    match command {
        Command::Query { conn, sql, params } => {
            let desc = global.config().resolve(&conn)?;
            let conn = global.open(&desc)?;
            let params: Vec<Value> = params.iter().map(|p| Value::parse_loose(p)).collect();
            let rows = conn.query(&sql, &params);
            let result = rows.map_err(anyhow::Error::from).and_then(|rows| {
                println!("{}", rows.columns().join("\t"));
                for row in rows {
                    let row = row?;
                    let cells: Vec<String> = row.values().iter().map(Value::to_string).collect();
                    println!("{}", cells.join("\t"));
                }
                Ok(())
            });
            global.close(&conn);
            result
        }
        Command::Exec { conn, sql, params } => {
            let desc = global.config().resolve(&conn)?;
            let conn = global.open(&desc)?;
            let params: Vec<Value> = params.iter().map(|p| Value::parse_loose(p)).collect();
            let result = conn.exec(&sql, &params);
            global.close(&conn);
            println!("{}", result?);
            Ok(())
        }
        Command::Translate {
            dialect: name,
            schema,
            sql,
        } => {
            let Some(target) = dialect::by_name(&name) else {
                bail!("unknown dialect '{}'", name);
            };
            let schema: Option<Schema> = match schema {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    Some(serde_json::from_str(&text).context("parsing schema")?)
                }
                None => None,
            };
            let field_map = schema.as_ref().map(Schema::short_name_map);
            let cache = global.cache()?;
            let out = translate::translate(
                &cache,
                &sql,
                field_map.as_ref(),
                schema.as_ref(),
                target,
            )?;
            println!("{}", out);
            Ok(())
        }
        Command::Check { expr } => {
            let cache = global.cache()?;
            translate::verify_expression(&cache, &expr, &FunctionWhitelist::default())?;
            println!("ok");
            Ok(())
        }
    }
}
