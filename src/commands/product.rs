//! Product command - look up one catalog record by index

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use super::open_engine;

pub fn run(models_dir: Option<&Path>, index: usize, json: bool) -> Result<()> {
    let (_, engine) = open_engine(models_dir)?;
    let record = engine.product_info(index);

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    match record {
        Some(record) => {
            println!("{}", record.title.bold().cyan());
            println!("  {} Index: {}", "→".dimmed(), record.index);
            println!("  {} Price: {}", "→".dimmed(), record.price);
            println!("  {} Category: {}", "→".dimmed(), record.category);
            println!("  {} Code: {}", "→".dimmed(), record.product_code);
            if !record.image_url.is_empty() {
                println!("  {} Image: {}", "→".dimmed(), record.image_url);
            }
        }
        None => {
            println!(
                "{} No product at index {} (catalog has {} products)",
                "!".yellow().bold(),
                index,
                engine.catalog().len()
            );
        }
    }

    Ok(())
}
