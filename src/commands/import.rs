//! Import command - package an `.npz` archive as an SQLite container

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

use product_finder::search::{import_npz, Modality};
use product_finder::resolve_models_dir;

/// Container written when no `--output` is given
pub fn default_output(models_dir: &Path, modality: Modality) -> PathBuf {
    models_dir.join(format!("embeddings_{}.sqlite", modality.as_str()))
}

pub fn run(
    models_dir: Option<&Path>,
    archive: &Path,
    modality: Modality,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let output = output.unwrap_or_else(|| default_output(&resolve_models_dir(models_dir), modality));
    if output.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("npz")) {
        bail!("Output {} must be an SQLite container, not an archive", output.display());
    }

    let set = import_npz(archive, modality, &output)
        .with_context(|| format!("Failed to import {}", archive.display()))?;

    if json {
        let matrices: Vec<_> = set
            .matrices()
            .iter()
            .map(|m| {
                serde_json::json!({
                    "variant": m.variant,
                    "rows": m.rows(),
                    "dimension": m.dimension,
                })
            })
            .collect();
        let output = serde_json::json!({
            "archive": archive.display().to_string(),
            "container": output.display().to_string(),
            "modality": modality,
            "matrices": matrices,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{} Imported {} {} matrices into {}",
        "✓".green(),
        set.matrices().len(),
        modality,
        output.display().to_string().cyan()
    );
    for matrix in set.matrices() {
        println!(
            "  {} {} ({} rows × {})",
            "→".dimmed(),
            matrix.variant,
            matrix.rows(),
            matrix.dimension
        );
    }
    println!();
    println!(
        "  Point {} at it in retrieval.yaml to use it.",
        match modality {
            Modality::Image => "visual_container",
            Modality::Text => "textual_container",
        }
        .cyan()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_per_modality() {
        let dir = Path::new("/app/models");
        assert_eq!(
            default_output(dir, Modality::Image),
            PathBuf::from("/app/models/embeddings_image.sqlite")
        );
        assert_eq!(
            default_output(dir, Modality::Text),
            PathBuf::from("/app/models/embeddings_text.sqlite")
        );
    }

    #[test]
    fn test_refuses_archive_output() {
        let err = run(
            None,
            Path::new("/nonexistent/in.npz"),
            Modality::Text,
            Some(PathBuf::from("/tmp/out.npz")),
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("SQLite container"));
    }
}
