//! The `check` command: report on runtime OCR dependencies.

use console::style;

use crate::cli::helpers::check_dependencies;

pub async fn cmd_check() -> anyhow::Result<()> {
    println!("Checking OCR dependencies...\n");

    let mut missing_required = false;
    for tool in check_dependencies() {
        match (&tool.path, tool.required) {
            (Some(path), _) => {
                println!(
                    "  {} {:<12} {}",
                    style("✓").green().bold(),
                    tool.name,
                    style(path.display()).dim()
                );
            }
            (None, true) => {
                println!(
                    "  {} {:<12} {}",
                    style("✗").red().bold(),
                    tool.name,
                    style("not found (required)").red()
                );
                missing_required = true;
            }
            (None, false) => {
                println!(
                    "  {} {:<12} {}",
                    style("-").yellow().bold(),
                    tool.name,
                    style("not found (optional)").yellow()
                );
            }
        }
    }

    println!();
    if missing_required {
        anyhow::bail!("required OCR tools are missing");
    }
    println!("All required tools are available.");
    Ok(())
}
