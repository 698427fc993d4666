//! `quarry` command line.
//!
//! Documents are parse trees serialized as JSON. Table and SQL block schemas
//! come from a JSON file mapping schema keys (`connection:path`) to columns.
//!
//! Usage:
//!   quarry compile <file> [--query <name> | --run <n>] [--dialect <dialect>] [--schemas <file>]
//!   quarry list <file> [--schemas <file>]
//!   quarry validate <file> [--schemas <file>]
//!
//! Examples:
//!   quarry compile flights.json --query by_carrier --schemas schemas.json
//!   quarry compile flights.json --run 1 --dialect bigquery
//!   quarry validate flights.json

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use quarry::compile::{compile_query, resolve_query, CompileOptions, QueryRef};
use quarry::config::Settings;
use quarry::dsl::{has_errors, Diagnostic, JsonParseTree};
use quarry::model::{ModelDef, NamedEntity, TableSchema};
use quarry::sql::Dialect;
use quarry::translation::{Translation, TranslationStatus, Translator, UpdateData};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Compile semantic model documents to SQL")]
#[command(version)]
struct Cli {
    /// Path to quarry.toml (defaults to $QUARRY_CONFIG, then ./quarry.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query of a model to SQL
    Compile {
        /// Path to the model document
        file: PathBuf,

        /// Name of the query to compile
        #[arg(short, long, conflicts_with = "run")]
        query: Option<String>,

        /// Unnamed query to compile, counted from 1 (default: the first)
        #[arg(short, long)]
        run: Option<usize>,

        /// duckdb, postgres, bigquery, snowflake or mysql (default: from quarry.toml)
        #[arg(short, long)]
        dialect: Option<Dialect>,

        /// JSON file with table and SQL block schemas
        #[arg(short, long)]
        schemas: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// List sources, queries and SQL blocks in a model
    List {
        /// Path to the model document
        file: PathBuf,

        /// JSON file with table and SQL block schemas
        #[arg(short, long)]
        schemas: Option<PathBuf>,
    },

    /// Translate a model and report its diagnostics without generating SQL
    Validate {
        /// Path to the model document
        file: PathBuf,

        /// JSON file with table and SQL block schemas
        #[arg(short, long)]
        schemas: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Sql,
    /// SQL preceded by a comment naming the query and its columns
    Verbose,
    /// SQL, result schema and diagnostics in one JSON object
    Json,
}

/// Contents of the `--schemas` file.
#[derive(Debug, Default, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    tables: BTreeMap<String, TableSchema>,
    #[serde(default)]
    sql: BTreeMap<String, TableSchema>,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("quarry: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    let settings = match cli.config.as_deref() {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
    .map_err(|e| e.to_string())?;

    match cli.command {
        Commands::Compile {
            file,
            query,
            run,
            dialect,
            schemas,
            output,
        } => {
            let query = match (query, run) {
                (Some(name), _) => QueryRef::Named(name),
                (None, Some(0)) => return Err("--run counts from 1".into()),
                (None, Some(n)) => QueryRef::Anonymous(n - 1),
                (None, None) => QueryRef::Anonymous(0),
            };
            cmd_compile(settings, &file, query, dialect, schemas.as_deref(), output)
        }
        Commands::List { file, schemas } => cmd_list(settings, &file, schemas.as_deref()),
        Commands::Validate { file, schemas } => cmd_validate(settings, &file, schemas.as_deref()),
    }
}

/// Logs go to stderr; `QUARRY_LOG` takes precedence over `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUARRY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_compile(
    settings: Settings,
    file: &Path,
    query: QueryRef,
    dialect: Option<Dialect>,
    schemas: Option<&Path>,
    output: OutputFormat,
) -> Result<ExitCode, String> {
    let mut options = CompileOptions::from_settings(&settings, None);
    let translation = translate_file(settings.clone(), file, schemas)?;
    let TranslationStatus::Done(model) = translation.status else {
        return Err("translation stopped before the model was complete".into());
    };

    options.dialect = dialect
        .unwrap_or_else(|| settings.dialect_for_connection(query_connection(&model, &query)));

    let compiled = compile_query(&model, &query, &options).map_err(|e| format!("{query}: {e}"))?;
    match output {
        OutputFormat::Sql => println!("{}", compiled.sql),
        OutputFormat::Verbose => {
            println!("-- {} / {query} ({})", file.display(), compiled.dialect);
            println!("-- columns: {}", compiled.result_schema.names().join(", "));
            println!("{}", compiled.sql);
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "sql": compiled.sql,
                "dialect": compiled.dialect,
                "schema": compiled.result_schema,
                "diagnostics": compiled.diagnostics,
            });
            let text = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
            println!("{text}");
        }
    }
    print_diagnostics(&compiled.diagnostics);
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(settings: Settings, file: &Path, schemas: Option<&Path>) -> Result<ExitCode, String> {
    let translation = translate_file(settings, file, schemas)?;
    let model = translation
        .model()
        .ok_or("translation stopped before the model was complete")?;

    let mut sources = Vec::new();
    let mut queries = Vec::new();
    let mut sql_blocks = Vec::new();
    for name in &model.exports {
        match model.entities.get(name) {
            Some(NamedEntity::Source(source)) => {
                sources.push(format!("{name}  {} fields", source.fields.len()))
            }
            Some(NamedEntity::Query(query)) => {
                queries.push(format!("{name}  {} stages", query.pipeline.stages.len()))
            }
            Some(NamedEntity::Sql(_)) => sql_blocks.push(name.clone()),
            None if model.is_invalid(name) => queries.push(format!("{name}  invalid")),
            None => {}
        }
    }

    print_section("sources", &sources);
    print_section("queries", &queries);
    print_section("sql", &sql_blocks);
    if !model.queries.is_empty() {
        println!("unnamed queries: {}", model.queries.len());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(
    settings: Settings,
    file: &Path,
    schemas: Option<&Path>,
) -> Result<ExitCode, String> {
    let translation = translate_file(settings, file, schemas)?;
    print_diagnostics(&translation.diagnostics);
    if has_errors(&translation.diagnostics) {
        return Ok(ExitCode::FAILURE);
    }
    println!("{}: ok", file.display());
    Ok(ExitCode::SUCCESS)
}

fn print_section(title: &str, items: &[String]) {
    if !items.is_empty() {
        println!("{title}");
        items.iter().for_each(|item| println!("  {item}"));
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    diagnostics.iter().for_each(|diag| eprintln!("{diag}"));
}

/// Connection of the source the query reads.
fn query_connection<'m>(model: &'m ModelDef, query: &QueryRef) -> Option<&'m str> {
    resolve_query(model, query).ok()?.source.connection()
}

// =============================================================================
// Translation driver
// =============================================================================

/// Run the translate/update loop against the file system.
///
/// Documents are read from `file://` URLs; schemas come only from the
/// `--schemas` file, after which schemas are declared final.
fn translate_file(
    settings: Settings,
    file: &Path,
    schemas: Option<&Path>,
) -> Result<Translation, String> {
    let schemas = match schemas {
        Some(path) => {
            read_schema_file(path).map_err(|e| format!("{}: {e}", path.display()))?
        }
        None => SchemaFile::default(),
    };
    let root = file_url(file).map_err(|e| format!("{}: {e}", file.display()))?;

    let translator = Translator::new(JsonParseTree, settings);
    let mut state = translator.start(root);
    loop {
        let translation = translator.translate(&state);
        let data = match &translation.status {
            TranslationStatus::Done(_) => return Ok(translation),
            TranslationStatus::AwaitingImports(urls) => {
                urls.iter()
                    .fold(UpdateData::new(), |data, url| match read_url(url) {
                        Ok(text) => data.with_url(url, text),
                        Err(e) => data.with_url_error(url, e),
                    })
            }
            TranslationStatus::AwaitingSchemas { tables, sql } => {
                let mut data = UpdateData::new().schemas_final();
                for table in tables {
                    let key = table.key();
                    if let Some(schema) = schemas.tables.get(&key) {
                        data = data.with_table(key, schema.clone());
                    }
                }
                for block in sql {
                    let key = block.key();
                    if let Some(schema) = schemas.sql.get(&key) {
                        data = data.with_sql_schema(key, schema.clone());
                    }
                }
                data
            }
        };
        state = translator.update(state, data);
    }
}

fn read_schema_file(path: &Path) -> Result<SchemaFile, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn file_url(path: &Path) -> Result<String, String> {
    let absolute = fs::canonicalize(path).map_err(|e| e.to_string())?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| format!("cannot turn {} into a URL", absolute.display()))
}

fn read_url(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;
    let path = parsed
        .to_file_path()
        .map_err(|_| format!("only file:// URLs can be read, got {}", url))?;
    fs::read_to_string(&path).map_err(|e| e.to_string())
}
