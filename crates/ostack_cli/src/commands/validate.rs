//! Validate command - Check deployment documents.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use tracing::{debug, info};
use walkdir::WalkDir;

use ostack_components::{ConfigFormat, Deployment};

#[derive(Args)]
pub struct ValidateArgs {
    /// Deployment file to validate
    #[arg(short, long, conflicts_with = "dir", required_unless_present = "dir")]
    file: Option<PathBuf>,

    /// Validate every deployment file under this directory
    #[arg(long)]
    dir: Option<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let files = match (&args.file, &args.dir) {
        (Some(file), _) => vec![file.clone()],
        (None, Some(dir)) => {
            if !dir.is_dir() {
                anyhow::bail!("Directory not found: {}", dir.display());
            }
            collect_files(dir)
        }
        (None, None) => anyhow::bail!("Missing argument: --file or --dir"),
    };

    info!("Validating {} deployment files", files.len());

    let mut failed = 0;
    for path in &files {
        match validate_file(path) {
            Ok(count) => println!("✅ {} ({} components)", path.display(), count),
            Err(e) => {
                failed += 1;
                println!("❌ {}", path.display());
                println!("   - {}", e);
            }
        }
    }

    println!();
    if failed > 0 {
        anyhow::bail!("Validation failed for {} of {} files", failed, files.len());
    }
    println!("✅ All deployments are valid!");
    Ok(())
}

fn validate_file(path: &Path) -> Result<usize> {
    let deployment = Deployment::from_file(path)?;
    deployment.validate()?;
    Ok(deployment.component_count())
}

/// Deployment files under `dir`, sorted by path.
fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| ConfigFormat::is_supported(p))
        .collect();
    files.sort();
    debug!("Found {} deployment files under {:?}", files.len(), dir);
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const VALID: &str = "base:\n  env: dev\n  project: shop\nsecurity_groups:\n  - name: web\n    allow_self_ipv4: true\n";

    #[test]
    fn test_collect_files_filters_extensions() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.yaml"), VALID).unwrap();
        fs::write(dir.path().join("nested/a.toml"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();

        let files = collect_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| p.extension().unwrap() != "md"));
    }

    #[test]
    fn test_validate_file_counts_components() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        fs::write(&path, VALID).unwrap();

        assert_eq!(validate_file(&path).unwrap(), 1);
    }

    #[test]
    fn test_execute_fails_on_invalid_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good.yml"), VALID).unwrap();
        fs::write(
            dir.path().join("bad.yml"),
            "base:\n  env: dev\n  project: shop\ninstances:\n  - name: web\n",
        )
        .unwrap();

        let err = execute(ValidateArgs {
            file: None,
            dir: Some(dir.path().to_path_buf()),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "Validation failed for 1 of 2 files");
    }
}
