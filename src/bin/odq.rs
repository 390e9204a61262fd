//! odq: compile method-chain queries into OData request paths.
//!
//! # Usage
//!
//! ```bash
//! # Compile against the model in ./odq.toml
//! odq "Products.Where(p => p.Price > 10).Take(5)"
//!
//! # Show every pipeline stage
//! odq explain "Products.Where(p => p.Id == 1).Select(p => p.Category)"
//!
//! # Bind a variable
//! odq "Products.Where(p => p.Price > \$min)" --var min=10
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use odata_query::prelude::*;
use odata_query::compiler::Explanation;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "odq")]
#[command(version)]
#[command(about = "Compile LINQ-style queries into OData request paths", long_about = None)]
#[command(after_help = "EXAMPLES:
    odq 'Products.Where(p => p.Price > 10).OrderBy(p => p.Name).Take(20)'
    odq explain 'Customers.Where(c => c.Id == 1).SelectMany(c => c.Orders)'
    odq model --config northwind.toml")]
struct Cli {
    /// The query to compile
    query: Option<String>,

    /// Configuration file (defaults to ./odq.toml, then the user config dir)
    #[arg(short, long, global = true, env = "ODQ_CONFIG")]
    config: Option<PathBuf>,

    /// Service root to resolve the path against
    #[arg(short, long, global = true, env = "ODQ_BASE_URI")]
    base_uri: Option<String>,

    /// Variable bindings for $name references (name=value)
    #[arg(long = "var", global = true, value_delimiter = ',')]
    vars: Vec<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query to its request path
    Compile {
        query: String,
    },
    /// Show every stage of compiling a query
    Explain {
        query: String,
    },
    /// List the entity sets and types of the configured model
    Model,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = CompilerConfig::discover(cli.config.as_deref()).context("loading configuration")?;
    let base = match &cli.base_uri {
        Some(uri) => Some(Url::parse(uri).with_context(|| format!("invalid base URI '{}'", uri))?),
        None => config.base_url()?,
    };

    match &cli.command {
        Some(Commands::Compile { query }) => compile_query(query, cli, &config, base.as_ref()),
        Some(Commands::Explain { query }) => explain_query(query, cli, &config, base.as_ref()),
        Some(Commands::Model) => show_model(&config.model, cli.format),
        None => match &cli.query {
            Some(query) => compile_query(query, cli, &config, base.as_ref()),
            None => {
                println!("{}", "odq: LINQ-style queries to OData paths".cyan().bold());
                println!();
                println!("Usage: odq <QUERY> [OPTIONS]");
                println!();
                println!("Try: odq --help");
                Ok(())
            }
        },
    }
}

/// `name=value` pairs; values are read as query literals.
fn parse_vars(raw: &[String]) -> Result<Variables> {
    let mut vars = Variables::new();
    for pair in raw {
        let Some((name, text)) = pair.split_once('=') else {
            bail!("variable '{}' is not name=value", pair);
        };
        vars.insert(name.trim().to_string(), parse_value(text.trim()));
    }
    Ok(vars)
}

fn parse_value(text: &str) -> Value {
    if text == "null" {
        return Value::Null;
    }
    if let Ok(b) = text.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = text.parse::<i32>() {
        return Value::Int32(n);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Int64(n);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Double(f);
    }
    Value::String(text.trim_matches('\'').to_string())
}

fn prepare(query: &str, cli: &Cli, config: &CompilerConfig) -> Result<ExprRef> {
    if cli.verbose {
        eprintln!("{} {}", "Input:".dimmed(), query.yellow());
    }
    let vars = parse_vars(&cli.vars)?;
    Ok(parse_query(query, &config.model, &vars)?)
}

fn compile_query(query: &str, cli: &Cli, config: &CompilerConfig, base: Option<&Url>) -> Result<()> {
    let expr = prepare(query, cli, config)?;
    let compiled = QueryCompiler::new(&config.model)
        .leaf_parens(config.leaf_parens)
        .compile(&expr)?;
    let summary = compiled.summary(base)?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!("{}", summary.uri.as_deref().unwrap_or(&summary.path).green().bold());
            println!("{} {}", "DataServiceVersion:".dimmed(), summary.version.cyan());
            if let Some(projection) = &summary.projection {
                println!("{} {}", "Projection:".dimmed(), projection);
            }
        }
    }
    Ok(())
}

fn explain_query(query: &str, cli: &Cli, config: &CompilerConfig, base: Option<&Url>) -> Result<()> {
    let expr = prepare(query, cli, config)?;
    let explanation = QueryCompiler::new(&config.model)
        .leaf_parens(config.leaf_parens)
        .explain(&expr, base)?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&explanation)?),
        OutputFormat::Text => print_explanation(&explanation),
    }
    Ok(())
}

fn print_explanation(e: &Explanation) {
    println!("{}", "Input:".cyan().bold());
    println!("  {}", e.input);
    println!("{}", "Evaluated:".cyan().bold());
    println!("  {}", e.evaluated);
    println!("{}", "Normalized:".cyan().bold());
    println!("  {}", e.normalized);
    if !e.rewrites.is_empty() {
        println!("{}", "Rewrites:".cyan().bold());
        for (rewritten, original) in &e.rewrites {
            println!("  {} {} {}", original.dimmed(), "→".yellow(), rewritten);
        }
    }
    println!("{}", "Resources:".cyan().bold());
    for line in e.resources.lines() {
        println!("  {}", line);
    }
    println!("{}", "Result:".green().bold());
    println!("  {}", e.summary.uri.as_deref().unwrap_or(&e.summary.path).white());
    println!("  {} {}", "DataServiceVersion:".dimmed(), e.summary.version);
}

fn show_model(model: &Model, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(model)?);
        return Ok(());
    }
    if model.entity_sets.is_empty() && model.types.is_empty() {
        println!("{}", "No model configured. Add a [model] table to odq.toml.".yellow());
        return Ok(());
    }
    println!("{} {}", "Namespace:".cyan().bold(), model.namespace);
    println!();
    println!("{}", "Entity sets:".cyan().bold());
    for (set, element) in model.entity_sets() {
        println!("  {} {} {}", set.green(), "→".dimmed(), element);
    }
    println!();
    println!("{}", "Types:".cyan().bold());
    for (name, def) in &model.types {
        let kind = if model.is_entity_type(&Type::named(name.as_str())) {
            "entity"
        } else {
            "complex"
        };
        let base = def.base.as_deref().map(|b| format!(" : {}", b)).unwrap_or_default();
        println!("  {}{} {}", name.green().bold(), base, format!("({})", kind).dimmed());
        for (prop, spec) in &def.properties {
            let key = if def.keys.contains(prop) { " key".yellow().to_string() } else { String::new() };
            println!("    {}: {}{}", prop, spec, key);
        }
    }
    Ok(())
}
