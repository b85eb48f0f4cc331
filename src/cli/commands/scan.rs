//! The `scan` command: discovery preview without queueing.

use std::path::PathBuf;

use console::style;

use crate::discovery;

pub async fn cmd_scan(paths: &[PathBuf], recursive: bool) -> anyhow::Result<()> {
    let report = discovery::discover_pdfs(paths, recursive);
    for path in &report.paths {
        println!("{}", path.display());
    }

    if report.paths.is_empty() {
        println!("No PDF files found.");
        return Ok(());
    }
    println!();
    println!("{} PDF file(s).", report.paths.len());
    if report.hit_file_cap {
        println!(
            "{} discovery stopped at the file cap; not everything was listed",
            style("warning:").yellow().bold()
        );
    }
    if report.hit_depth_cap {
        println!(
            "{} some directories were too deeply nested and were skipped",
            style("warning:").yellow().bold()
        );
    }
    Ok(())
}
