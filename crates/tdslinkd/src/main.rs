//! tdslinkd: command-line access to the Kusto and SQL Server connectors.
//!
//! Each backend reads its catalog properties from `--config` (or the
//! `KUSTO_*` / `SQLSERVER_*` environment variables when no file is given)
//! and runs one metadata command on behalf of `--user`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tdslink_core::{Identity, JdbcClient, JdbcColumnHandle, JdbcTableHandle, Properties, SchemaTableName};
use tdslink_kusto::{KustoClient, KustoConfig};
use tdslink_sqlserver::{SqlServerClient, SqlServerConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "tdslinkd", about = "Kusto and SQL Server catalog tool")]
struct Cli {
    /// Catalog properties file
    #[arg(long, global = true, env = "TDSLINK_CONFIG")]
    config: Option<PathBuf>,

    /// User the operations run for
    #[arg(long, global = true, default_value = "tdslink", env = "TDSLINK_USER")]
    user: String,

    /// Extra credential passed to the connector, as NAME=VALUE (repeatable)
    #[arg(long = "extra-credential", global = true, value_parser = parse_key_val)]
    extra_credentials: Vec<(String, String)>,

    #[command(subcommand)]
    backend: Backend,
}

#[derive(Subcommand)]
enum Backend {
    /// Azure Data Explorer cluster
    Kusto {
        #[command(subcommand)]
        command: KustoCommand,
    },
    /// SQL Server instance
    Sqlserver {
        #[command(subcommand)]
        command: CatalogCommand,
    },
}

#[derive(Subcommand)]
enum KustoCommand {
    /// Acquire an access token and print its expiry
    Token,

    #[command(flatten)]
    Catalog(CatalogCommand),
}

#[derive(Subcommand)]
enum CatalogCommand {
    /// List schema names
    Schemas,

    /// List tables, optionally in one schema
    Tables {
        #[arg(long)]
        schema: Option<String>,
    },

    /// Rename a table within its schema
    RenameTable {
        #[arg(long)]
        schema: String,

        /// Catalog holding the table (defaults to the configured one)
        #[arg(long)]
        catalog: Option<String>,

        from: String,
        to: String,
    },

    /// Rename a column
    RenameColumn {
        #[arg(long)]
        schema: String,

        #[arg(long)]
        table: String,

        #[arg(long)]
        catalog: Option<String>,

        from: String,
        to: String,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty credential name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_properties(path: &Path) -> anyhow::Result<Properties> {
    Properties::load(path).with_context(|| format!("loading {}", path.display()))
}

async fn run_catalog_command(
    client: &dyn JdbcClient,
    identity: &Identity,
    command: CatalogCommand,
) -> anyhow::Result<()> {
    match command {
        CatalogCommand::Schemas => {
            for schema in client.get_schema_names(identity).await? {
                println!("{}", schema);
            }
        }
        CatalogCommand::Tables { schema } => {
            for table in client.get_table_names(identity, schema.as_deref()).await? {
                println!("{}", table);
            }
        }
        CatalogCommand::RenameTable {
            schema,
            catalog,
            from,
            to,
        } => {
            client
                .rename_table(
                    identity,
                    catalog.as_deref(),
                    &SchemaTableName::new(&schema, from),
                    &SchemaTableName::new(&schema, to),
                )
                .await
                .context("rename table")?;
            info!("Renamed table in schema {}", schema);
        }
        CatalogCommand::RenameColumn {
            schema,
            table,
            catalog,
            from,
            to,
        } => {
            let handle = JdbcTableHandle::new(client.connector_id(), catalog, schema, table);
            let column = JdbcColumnHandle::new(client.connector_id(), from);
            client
                .rename_column(identity, &handle, &column, &to)
                .await
                .context("rename column")?;
            info!("Renamed column on {}", handle.schema_table_name);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let identity = cli
        .extra_credentials
        .into_iter()
        .fold(Identity::new(cli.user), |identity, (name, value)| {
            identity.with_extra_credential(name, value)
        });

    match cli.backend {
        Backend::Kusto { command } => {
            let config = match &cli.config {
                Some(path) => KustoConfig::from_properties(&load_properties(path)?)?,
                None => KustoConfig::from_env()?,
            };
            let client = KustoClient::connect("kusto", config)?;
            match command {
                KustoCommand::Token => {
                    let token = client.factory().acquire_token(&identity).await?;
                    println!(
                        "token for {} valid until {}",
                        client.factory().config().host_name,
                        token.expires_at().to_rfc3339()
                    );
                }
                KustoCommand::Catalog(command) => {
                    run_catalog_command(&client, &identity, command).await?;
                }
            }
        }
        Backend::Sqlserver { command } => {
            let config = match &cli.config {
                Some(path) => SqlServerConfig::from_properties(&load_properties(path)?)?,
                None => SqlServerConfig::from_env()?,
            };
            let client = SqlServerClient::connect("sqlserver", &config)?;
            run_catalog_command(&client, &identity, command).await?;
        }
    }

    Ok(())
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
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("kusto_app_id=abc=def").unwrap(),
            ("kusto_app_id".to_string(), "abc=def".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_parse_kusto_catalog_subcommand() {
        let cli = Cli::try_parse_from([
            "tdslinkd",
            "--user",
            "alice",
            "--extra-credential",
            "kusto_app_id=app",
            "kusto",
            "tables",
            "--schema",
            "Samples",
        ])
        .unwrap();
        assert_eq!(cli.user, "alice");
        assert_eq!(cli.extra_credentials, vec![("kusto_app_id".to_string(), "app".to_string())]);
        match cli.backend {
            Backend::Kusto {
                command: KustoCommand::Catalog(CatalogCommand::Tables { schema }),
            } => assert_eq!(schema.as_deref(), Some("Samples")),
            _ => panic!("expected kusto tables"),
        }
    }

    #[test]
    fn test_token_only_for_kusto() {
        assert!(Cli::try_parse_from(["tdslinkd", "kusto", "token"]).is_ok());
        assert!(Cli::try_parse_from(["tdslinkd", "sqlserver", "token"]).is_err());
    }
}
