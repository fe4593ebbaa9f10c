//! Search commands - image, text and combined retrieval

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use unicode_width::UnicodeWidthChar;

use product_finder::{FusionWeights, ResolvedResult, SearchMode, SearchRequest};

use super::open_engine;

/// Query as given on the command line
pub struct SearchArgs {
    pub mode: SearchMode,
    pub image: Option<PathBuf>,
    pub text: Option<String>,
    pub weight_image: Option<f32>,
    pub weight_text: Option<f32>,
    pub top_k: Option<usize>,
    pub json: bool,
}

/// Run a search in any mode
pub fn run(models_dir: Option<&Path>, args: SearchArgs) -> Result<()> {
    let (config, engine) = open_engine(models_dir)?;

    let image = match &args.image {
        Some(path) => Some(
            image::open(path).with_context(|| format!("Failed to read image {}", path.display()))?,
        ),
        None => None,
    };

    let weights = FusionWeights::new(
        args.weight_image.unwrap_or(config.weights.image),
        args.weight_text.unwrap_or(config.weights.text),
    );

    let request = SearchRequest {
        mode: args.mode,
        image,
        text: args.text.clone(),
        weights,
        top_k: args.top_k.unwrap_or(config.default_top_k),
    };

    let results = engine.execute(&request)?;
    let resolved = engine.resolve(&results);

    if args.json {
        let output = serde_json::json!({
            "mode": args.mode,
            "weights": if args.mode == SearchMode::Combined { Some(weights) } else { None },
            "results": resolved,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let label = describe(&args);
    if resolved.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), label.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {}",
        "→".dimmed(),
        resolved.len(),
        label.cyan()
    );
    if args.mode == SearchMode::Combined {
        println!(
            "  {} weights: image {:.2}, text {:.2}",
            "→".dimmed(),
            weights.image,
            weights.text
        );
    }
    println!();

    for result in &resolved {
        print_result(result);
    }

    Ok(())
}

fn describe(args: &SearchArgs) -> String {
    let image = args
        .image
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let text = args.text.clone().unwrap_or_default();

    match args.mode {
        SearchMode::Image => image,
        SearchMode::Text => text,
        SearchMode::Combined => format!("{} + \"{}\"", image, text),
    }
}

fn print_result(result: &ResolvedResult) {
    let record = &result.record;

    let percent = (result.score * 100.0) as i32;
    let score_str = format!("{:>3}%", percent);
    let score_colored = if percent >= 80 {
        score_str.green()
    } else if percent >= 60 {
        score_str.yellow()
    } else {
        score_str.red()
    };

    println!(
        "{}. [{}] {}",
        result.rank.to_string().bold(),
        score_colored,
        truncate_to_width(&record.title, 60).cyan()
    );

    let mut details = Vec::new();
    if record.price != "N/A" {
        details.push(format!("price {}", record.price));
    }
    if record.category != "N/A" {
        details.push(record.category.clone());
    }
    if record.product_code != "N/A" {
        details.push(format!("#{}", record.product_code));
    }
    if !details.is_empty() {
        println!("   {}", details.join(" | "));
    }
    if !record.image_url.is_empty() {
        println!("   {}", record.image_url.dimmed());
    }
    println!();
}

/// Truncate by display width so wide (CJK) titles line up
fn truncate_to_width(text: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if width + w > max_width.saturating_sub(3) {
            out.push_str("...");
            return out;
        }
        width += w;
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_title_unchanged() {
        assert_eq!(truncate_to_width("Classic Flap Bag", 60), "Classic Flap Bag");
    }

    #[test]
    fn test_truncate_wide_characters() {
        let title = "샤넬 클래식 플랩 백 블랙 캐비어 레더";
        let truncated = truncate_to_width(title, 12);
        assert!(truncated.ends_with("..."));
        assert!(unicode_width::UnicodeWidthStr::width(truncated.as_str()) <= 12);
    }
}
