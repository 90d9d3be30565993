//! Socrata CLI
//!
//! Command-line interface for inspecting and filtering a Socrata view.

use clap::{Parser, Subcommand};
use socrata_client::expr::{and, col, contains, greater_than, less_than, or, val};
use socrata_client::{ClientConfig, Condition, SocrataClient};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "socrata")]
#[command(version, about = "Query Socrata dataset views", long_about = None)]
struct Cli {
    /// Domain of the data source (e.g. data.seattle.gov)
    #[arg(long, default_value = "data.seattle.gov", global = true)]
    host: String,

    /// View id of the dataset
    #[arg(long, default_value = "it8u-sznv", global = true)]
    view: String,

    /// Application token sent with every request
    #[arg(long, env = "SOCRATA_APP_TOKEN", global = true, hide_env_values = true)]
    app_token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the view's columns
    Columns,

    /// Fetch rows whose id is in a range and whose text columns contain a term
    Search {
        /// Text to look for
        term: String,

        /// Column holding the row id
        #[arg(long, default_value = "objectid")]
        id_column: String,

        /// Exclusive lower bound on the id
        #[arg(long, default_value_t = 0)]
        min: i64,

        /// Exclusive upper bound on the id
        #[arg(long, default_value_t = 20)]
        max: i64,

        /// Columns to search for the term
        #[arg(long, value_delimiter = ',', default_value = "customtext,categoryde")]
        columns: Vec<String>,
    },

    /// Fetch rows matching a condition given as JSON
    Query {
        /// Condition, e.g. '{"operator":{"op":"EQUALS","children":[{"column":"objectid"},{"literal":1}]}}'
        condition: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = ClientConfig::builder(cli.host, cli.view)
        .timeout(Duration::from_secs(cli.timeout));
    if let Some(token) = cli.app_token {
        builder = builder.app_token(token);
    }
    let client = SocrataClient::new(builder.build()?)?;

    match cli.command {
        Commands::Columns => {
            let schema = client.columns().await?;
            for column in schema.columns() {
                println!("{:>10}  {}", column.id, column.field_name);
            }
        }
        Commands::Search {
            term,
            id_column,
            min,
            max,
            columns,
        } => {
            let condition = search_condition(&term, &id_column, min, max, &columns);
            print_records(&client, &condition).await?;
        }
        Commands::Query { condition } => {
            let condition: Condition = serde_json::from_str(&condition)?;
            print_records(&client, &condition).await?;
        }
    }

    Ok(())
}

fn search_condition(
    term: &str,
    id_column: &str,
    min: i64,
    max: i64,
    columns: &[String],
) -> Condition {
    and([
        greater_than([col(id_column), val(min)]),
        less_than([col(id_column), val(max)]),
        or(columns
            .iter()
            .map(|c| contains([col(c.as_str()), val(term)]))),
    ])
}

async fn print_records(
    client: &SocrataClient,
    condition: &Condition,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = client.query(condition).await?;
    tracing::info!(view_id = %client.view_id(), rows = records.len(), "Query finished");
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_condition_shape() {
        let condition = search_condition(
            "PARK",
            "objectid",
            0,
            20,
            &["customtext".to_string(), "categoryde".to_string()],
        );
        assert_eq!(
            condition.column_names(),
            vec!["objectid", "objectid", "customtext", "categoryde"]
        );
    }

    #[test]
    fn test_parse_search_args() {
        let cli = Cli::try_parse_from([
            "socrata",
            "search",
            "PARK",
            "--columns",
            "a,b",
            "--max",
            "50",
        ])
        .unwrap();

        match cli.command {
            Commands::Search { columns, max, .. } => {
                assert_eq!(columns, vec!["a", "b"]);
                assert_eq!(max, 50);
            }
            _ => panic!("Expected search command"),
        }
        assert_eq!(cli.view, "it8u-sznv");
    }
}
