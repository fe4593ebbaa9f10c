mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::search::SearchArgs;
use product_finder::core::logging;
use product_finder::search::Modality;
use product_finder::SearchMode;

#[derive(Parser)]
#[command(name = "finder")]
#[command(about = "Find catalog products by image, text, or both", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding the catalog table and embedding containers
    #[arg(long, global = true, env = "MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Products that look like an image
    Image {
        image: PathBuf,
        #[arg(long, short = 'k', help = "Number of results")]
        top_k: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Products matching a text description
    Text {
        query: String,
        #[arg(long, short = 'k', help = "Number of results")]
        top_k: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Weighted image + text search
    Combined {
        image: PathBuf,
        query: String,
        #[arg(long, help = "Weight of the image similarity")]
        weight_image: Option<f32>,
        #[arg(long, help = "Weight of the text similarity")]
        weight_text: Option<f32>,
        #[arg(long, short = 'k', help = "Number of results")]
        top_k: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show one catalog product
    Product {
        index: usize,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show loaded catalog, embeddings and models
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Copy the matrices of an .npz archive into an SQLite container
    Import {
        archive: PathBuf,
        #[arg(long, short = 'm', help = "Which side the matrices embed: image or text")]
        modality: Modality,
        #[arg(long, short = 'o', help = "Container to write (default: <models-dir>/embeddings_<modality>.sqlite)")]
        output: Option<PathBuf>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== MCP Server =====
    /// Start MCP server exposing catalog search tools
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show Claude configuration instructions")]
        install: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);
    let models_dir = cli.models_dir.as_deref();

    match cli.command {
        Commands::Image { image, top_k, json } => commands::search::run(
            models_dir,
            SearchArgs {
                mode: SearchMode::Image,
                image: Some(image),
                text: None,
                weight_image: None,
                weight_text: None,
                top_k,
                json,
            },
        ),
        Commands::Text { query, top_k, json } => commands::search::run(
            models_dir,
            SearchArgs {
                mode: SearchMode::Text,
                image: None,
                text: Some(query),
                weight_image: None,
                weight_text: None,
                top_k,
                json,
            },
        ),
        Commands::Combined {
            image,
            query,
            weight_image,
            weight_text,
            top_k,
            json,
        } => commands::search::run(
            models_dir,
            SearchArgs {
                mode: SearchMode::Combined,
                image: Some(image),
                text: Some(query),
                weight_image,
                weight_text,
                top_k,
                json,
            },
        ),
        Commands::Product { index, json } => commands::product::run(models_dir, index, json),
        Commands::Status { json } => commands::status::run(models_dir, json),
        Commands::Import {
            archive,
            modality,
            output,
            json,
        } => commands::import::run(models_dir, &archive, modality, output, json),

        // MCP Server
        #[cfg(feature = "mcp")]
        Commands::Mcp { install } => {
            if install {
                print_mcp_install_instructions(models_dir);
                Ok(())
            } else {
                run_mcp_server(models_dir)
            }
        }
    }
}

#[cfg(feature = "mcp")]
fn run_mcp_server(models_dir: Option<&std::path::Path>) -> anyhow::Result<()> {
    let (config, engine) = commands::open_engine(models_dir)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(mcp::run_mcp_server(engine, config))
}

#[cfg(feature = "mcp")]
fn print_mcp_install_instructions(models_dir: Option<&std::path::Path>) {
    use colored::Colorize;

    let models_dir = product_finder::resolve_models_dir(models_dir)
        .to_string_lossy()
        .to_string();

    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "finder".to_string());

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your MCP client configuration:");
    println!();
    println!(r#"{{
  "mcpServers": {{
    "catalog-search": {{
      "command": "{}",
      "args": ["mcp"],
      "env": {{ "MODELS_DIR": "{}" }}
    }}
  }}
}}"#, binary_path, models_dir);
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Products matching a text description", "catalog_search_text".green());
    println!("  • {} - Products that look like an image file", "catalog_search_image".green());
    println!("  • {} - Weighted image + text search", "catalog_search_combined".green());
    println!("  • {} - One product by index", "catalog_product".green());
    println!("  • {} - Loaded catalog and models", "catalog_status".green());
}
