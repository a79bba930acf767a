//! Batch CLI: scrape one or more keywords straight to CSV.
//!
//! ```text
//! scrape -s "cafe kathmandu, gym kathmandu" -t 25
//! ```
//!
//! Each keyword gets its own `results_<keyword>.csv`; re-running appends
//! only listings not already on file.

use clap::Parser;
use dotenv::dotenv;

use maps_crawler::proxy::ProxyRotator;
use maps_crawler::runner::{scrape_keyword, ScrapeSettings};
use maps_crawler::store::CsvRow;

#[derive(Parser, Debug)]
#[command(name = "scrape", about = "Scrape maps listings for keywords")]
struct Cli {
    /// Comma-separated search terms (e.g. "cafe, gym")
    #[arg(short, long)]
    search: String,

    /// Results needed per keyword
    #[arg(short, long)]
    total: usize,

    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,

    /// Directory for the results CSVs
    #[arg(short, long, default_value = ".")]
    output: String,
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let keywords: Vec<&str> = cli
        .search
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let mut settings = ScrapeSettings::from_env();
    settings.output_dir = cli.output.into();
    if cli.headed {
        settings.headless = false;
    }
    let rotator = ProxyRotator::from_env()?;

    println!("{}", "#".repeat(60));
    println!("# Maps scraper");
    println!("# Keywords: {}", keywords.len());
    println!("# Target per keyword: {}", cli.total);
    println!("{}", "#".repeat(60));

    let mut failures = 0;
    for keyword in keywords {
        let outcome = scrape_keyword(keyword, cli.total, &settings, &rotator, |record| {
            let row = CsvRow::from(record);
            println!("✓ Collected: {} ({})", row.name, row.contact);
        });
        if let Err(e) = outcome {
            eprintln!("❌ '{keyword}' failed: {e}");
            failures += 1;
        }
    }

    println!("{}", "#".repeat(60));
    println!("# Scraping complete");
    println!("{}", "#".repeat(60));

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
