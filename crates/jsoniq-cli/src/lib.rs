use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use jsoniq_engine::{
    LibraryModules, LocalFileReader, QueryResult, RuntimeConfiguration, compile_query_with, evaluate_compiled,
};

mod output;

pub use output::{render, write_output};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON item per line.
    Lines,
    /// All items as one JSON array.
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "jsoniq", version, about = "Run JSONiq queries over JSON data")]
pub struct Cli {
    /// Query text. Read from --query-path when omitted.
    #[arg(value_name = "QUERY")]
    pub query: Option<String>,
    #[arg(long = "query-path", value_name = "FILE")]
    pub query_path: Option<PathBuf>,
    /// Library modules available for `import module`.
    #[arg(long = "library", value_name = "FILE")]
    pub libraries: Vec<PathBuf>,
    #[arg(long = "output-path", value_name = "FILE")]
    pub output_path: Option<PathBuf>,
    #[arg(long)]
    pub overwrite: bool,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Lines)]
    pub format: OutputFormat,
    /// Maximum number of items to output; 0 disables the cap.
    #[arg(long = "result-size", value_name = "N")]
    pub result_size: Option<usize>,
    #[arg(long, value_name = "N")]
    pub parallelism: Option<usize>,
    /// Value of an external variable.
    #[arg(long = "variable", value_name = "NAME=VALUE", value_parser = parse_variable)]
    pub variables: Vec<(String, String)>,
    #[arg(long = "print-iterator-tree")]
    pub print_iterator_tree: bool,
    #[arg(long = "show-error-info")]
    pub show_error_info: bool,
    #[arg(long = "log-level", value_name = "FILTER", default_value = "warn")]
    pub log_level: String,
    #[arg(long = "log-path", value_name = "FILE")]
    pub log_path: Option<PathBuf>,
}

fn parse_variable(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim().trim_start_matches('$');
    if name.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

impl Cli {
    /// Engine configuration carrying the same settings as the arguments.
    pub fn configuration(&self) -> RuntimeConfiguration {
        let mut builder = RuntimeConfiguration::builder();
        if let Some(cap) = self.result_size {
            builder = builder.result_size_cap(cap);
        }
        if let Some(partitions) = self.parallelism {
            builder = builder.parallelism(partitions);
        }
        if let Some(path) = &self.query_path {
            builder = builder.set("query-path", path.display().to_string());
        }
        if let Some(path) = &self.output_path {
            builder = builder.set("output-path", path.display().to_string());
        }
        if let Some(path) = &self.log_path {
            builder = builder.set("log-path", path.display().to_string());
        }
        if self.overwrite {
            builder = builder.set("overwrite", "yes");
        }
        if self.print_iterator_tree {
            builder = builder.set("print-iterator-tree", "yes");
        }
        if self.show_error_info {
            builder = builder.set("show-error-info", "yes");
        }
        for (name, value) in &self.variables {
            builder = builder.variable(name, value.clone());
        }
        builder.build()
    }

    fn query_text(&self) -> anyhow::Result<String> {
        match (&self.query, &self.query_path) {
            (Some(text), None) => Ok(text.clone()),
            (None, Some(path)) => {
                std::fs::read_to_string(path).with_context(|| format!("cannot read query file {}", path.display()))
            }
            (Some(_), Some(_)) => bail!("pass either a query or --query-path, not both"),
            (None, None) => bail!("no query given; pass it as an argument or with --query-path"),
        }
    }
}

/// Compile and evaluate the query described by `cli`.
pub fn execute(cli: &Cli) -> anyhow::Result<QueryResult> {
    let text = cli.query_text()?;
    let mut libraries = LibraryModules::new();
    for path in &cli.libraries {
        let source =
            std::fs::read_to_string(path).with_context(|| format!("cannot read library module {}", path.display()))?;
        libraries.add_source(&source).with_context(|| format!("invalid library module {}", path.display()))?;
    }
    let config = cli.configuration();
    let query = compile_query_with(&text, &libraries)?;
    let result = evaluate_compiled(&query, Arc::new(config), Arc::new(LocalFileReader))?;
    tracing::info!(items = result.items.len(), truncated = result.truncated, "query finished");
    Ok(result)
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    // a subscriber may already be installed when running inside tests
    let _ = match &cli.log_path {
        Some(path) => {
            let file = std::fs::File::create(path).with_context(|| format!("cannot create log file {}", path.display()))?;
            builder.with_writer(std::sync::Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;
    let result = execute(&cli).map_err(|error| describe_failure(error, cli.show_error_info))?;
    let rendered = render(&result, cli.format)?;
    write_output(&rendered, cli.output_path.as_deref(), cli.overwrite)
}

/// Engine errors are reported by code and message; the cause chain is only
/// added with `--show-error-info`.
fn describe_failure(error: anyhow::Error, show_error_info: bool) -> anyhow::Error {
    if show_error_info {
        return error;
    }
    match error.downcast_ref::<jsoniq_engine::Error>() {
        Some(engine_error) => anyhow::anyhow!("{engine_error}"),
        None => error,
    }
}
