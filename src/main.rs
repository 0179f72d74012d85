use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "rustle",
    version,
    about = "Extract translatable text and generate per-locale translation files"
)]
struct Cli {
    /// Source directory to scan
    #[arg(long = "src", default_value = "./src")]
    src: String,

    /// Output directory for the master record and locale files
    #[arg(long = "output", default_value = "./public/rustle")]
    output: String,

    /// Source language code
    #[arg(long = "source-lang", default_value = "en")]
    source_lang: String,

    /// Target language codes, comma separated
    #[arg(long = "target-langs", default_value = "es,fr,de,it,pt")]
    target_langs: String,

    /// Read extra settings from a local TOML file
    #[arg(long = "settings")]
    settings: Option<String>,

    /// Scan and write the master record without calling the translation API
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(long = "debug")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    rustle::logging::init(cli.debug)?;

    let summary = rustle::run(rustle::Config {
        src: cli.src,
        output: cli.output,
        source_lang: cli.source_lang,
        target_langs: cli.target_langs,
        settings_path: cli.settings,
        dry_run: cli.dry_run,
    })
    .await?;

    println!(
        "scanned {} files: {} new, {} updated, {} unchanged; {} locale files written",
        summary.files_scanned,
        summary.new_entries,
        summary.updated_entries,
        summary.unchanged_entries,
        summary.locales_written
    );
    Ok(())
}
