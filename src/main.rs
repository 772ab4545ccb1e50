use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use simplelog::{Config, WriteLogger};

use folio::render::MupdfRasterizer;
use folio::{DocumentSession, SessionConfig};

#[derive(Parser)]
#[command(name = "folio", about = "Render document pages to PNG files")]
struct Cli {
    /// Document to open
    file: PathBuf,

    /// Render scale factor
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Render only this page (1-indexed) instead of the whole document
    #[arg(long)]
    page: Option<u32>,

    /// Output directory
    #[arg(long, default_value = "pages")]
    out: PathBuf,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    WriteLogger::init(level, Config::default(), File::create("folio.log")?)?;

    let session = DocumentSession::new(Arc::new(MupdfRasterizer), SessionConfig::default());
    let info = session
        .open_document(&cli.file)
        .with_context(|| format!("opening {:?}", cli.file))?;
    println!("{}: {} pages", info.file_name, info.page_count);

    fs::create_dir_all(&cli.out)
        .with_context(|| format!("creating output directory {:?}", cli.out))?;

    let pages: Vec<u32> = match cli.page {
        Some(page) => vec![page],
        None => (1..=info.page_count).collect(),
    };

    let mut failures = 0u32;
    for page in pages {
        match session.get_page(page, cli.scale) {
            Ok(artifact) => {
                let path = cli.out.join(format!("page-{page}.png"));
                fs::write(&path, &artifact.png)
                    .with_context(|| format!("writing {path:?}"))?;
                println!(
                    "page {page}: {}x{} -> {path:?}",
                    artifact.width, artifact.height
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("page {page}: {e}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} page(s) failed to render");
    }
    Ok(())
}
