//! Status command - show what the engine loaded

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use super::open_engine;

pub fn run(models_dir: Option<&Path>, json: bool) -> Result<()> {
    let (config, engine) = open_engine(models_dir)?;
    let status = engine.status();

    if json {
        let mut output = serde_json::to_value(&status)?;
        output["models_dir"] = serde_json::json!(config.models_dir.display().to_string());
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "Catalog Status".bold());
    println!();
    println!(
        "  {} Models dir: {}",
        "→".dimmed(),
        config.models_dir.display()
    );
    println!(
        "  {} {} products",
        "→".dimmed(),
        status.products.to_string().cyan()
    );
    println!(
        "  {} Image: {} against {}",
        "→".dimmed(),
        status.image_model.green(),
        status.image_variant.cyan()
    );
    println!(
        "  {} Text: {} against {}",
        "→".dimmed(),
        status.text_model.green(),
        status.text_variant.cyan()
    );
    if status.degraded_text_fallback {
        println!(
            "  {} Text encode failures return zero vectors",
            "!".yellow()
        );
    }
    println!();
    println!("{}", "Embedding variants".bold());
    for variant in &status.variants {
        println!(
            "  {} {:<5} {} ({} dims, {} rows)",
            "→".dimmed(),
            variant.modality,
            variant.variant,
            variant.dimension,
            variant.rows
        );
    }
    println!();
    println!(
        "  {} Loaded at: {}",
        "→".dimmed(),
        status.loaded_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(())
}
