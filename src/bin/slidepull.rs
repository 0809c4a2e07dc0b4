//! CLI binary for slidepull.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service,
//! `convert` runs the conversion pipeline against a local directory.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use slidepull::server::{self, AppState};
use slidepull::storage::azure::AzureBlobStore;
use slidepull::storage::local::LocalBlobStore;
use slidepull::storage::BlobStore;
use slidepull::{
    ConversionProgressCallback, Database, LocalConverter, LocalSet, NoopProgressCallback,
    PageSelection, Pipeline, RenderQuality, ServiceConfig, Stage, StorageSettings,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the office suite runs, then a page bar once the page count
/// is known.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: std::sync::Mutex<Instant>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading deck…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: std::sync::Mutex::new(Instant::now()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} slides  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn lap(&self) -> f64 {
        let mut started = match self.page_started.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let secs = started.elapsed().as_secs_f64();
        *started = Instant::now();
        secs
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        let msg = match stage {
            Stage::Queued => "Waiting…",
            Stage::Converting => "Converting to PDF…",
            Stage::Rendering => "Opening PDF…",
            Stage::Saving => "Building slide set…",
        };
        self.bar.set_message(msg);
    }

    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.lap();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total_pages} slides…"))
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize) {
        self.bar.println(format!(
            "  {} Slide {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{:.1}s", self.lap())),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, _deck_id: i64, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} slides rendered successfully",
            green("✔"),
            bold(&total_pages.to_string())
        );
    }

    fn on_conversion_failed(&self, error: &str) {
        self.bar.abandon();
        eprintln!("{} {}", red("✘"), red(error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the service with local blob storage
  SLIDEPULL_SIGNING_KEY=change-me slidepull serve --public-url https://slides.example.com

  # Run the service against Azure Blob Storage
  AZURE_STORAGE_ACCOUNT_NAME=acct AZURE_STORAGE_ACCOUNT_KEY=... \
  AZURE_BLOB_CONTAINER_NAME=slides slidepull serve

  # Convert a deck into ./out (PDF, slide images, thumbnails)
  slidepull convert talk.pptx -o out

  # Also build a slide set from slides 2-5 with a QR code
  slidepull convert talk.pptx -o out --pages 2-5 --set-name highlights

  # Lighter renders, JSON summary on stdout
  slidepull convert talk.odp -o out --quality mid --json

ENVIRONMENT VARIABLES:
  SOFFICE_PATH                 Office-suite binary (default: soffice)
  PDFIUM_LIB_PATH              libpdfium file or directory
  AZURE_STORAGE_ACCOUNT_NAME   Azure storage account (enables the Azure backend)
  AZURE_STORAGE_ACCOUNT_KEY    Azure storage account key (base64)
  AZURE_BLOB_CONTAINER_NAME    Azure container
  SLIDEPULL_SIGNING_KEY        HMAC key for local blob URLs
  RUST_LOG                     Log filter, overrides -v / -q

IDENTITY:
  The service trusts the x-slidepull-user header. Run it behind a proxy that
  authenticates users and sets that header.
"#;

/// Slide-deck conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "slidepull",
    version,
    about = "Convert slide decks to PDFs and slide images, build shareable slide sets",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SLIDEPULL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SLIDEPULL_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Convert one deck into a local directory.
    Convert(ConvertArgs),
}

/// Settings shared by both subcommands.
#[derive(Args, Debug)]
struct EngineArgs {
    /// Office-suite binary used to convert decks to PDF.
    #[arg(long, env = "SOFFICE_PATH", default_value = "soffice")]
    soffice: PathBuf,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium: Option<PathBuf>,

    /// Render quality: standard (1x), mid (1.5x), max (2x).
    #[arg(long, env = "SLIDEPULL_QUALITY", value_enum, default_value = "max")]
    quality: QualityArg,

    /// Seconds allowed per conversion attempt.
    #[arg(long, env = "SLIDEPULL_CONVERSION_TIMEOUT", default_value_t = 120)]
    conversion_timeout: u64,

    /// Largest accepted deck in MiB.
    #[arg(long, env = "SLIDEPULL_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: u64,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Address to listen on.
    #[arg(long, env = "SLIDEPULL_ADDR", default_value = "0.0.0.0:8000")]
    addr: SocketAddr,

    /// Externally reachable base URL, used in share links and QR codes.
    #[arg(long, env = "SLIDEPULL_PUBLIC_URL", default_value = "http://localhost:8000")]
    public_url: String,

    /// SQLite database file.
    #[arg(long, env = "SLIDEPULL_DATABASE", default_value = "slidepull.db")]
    database: PathBuf,

    /// Office-suite processes allowed at once.
    #[arg(long, env = "SLIDEPULL_MAX_CONVERSIONS", default_value_t = 2)]
    max_conversions: usize,

    /// Root directory of the local blob backend.
    #[arg(long, env = "SLIDEPULL_STORAGE_DIR", default_value = "blobs")]
    storage_dir: PathBuf,

    /// HMAC key for local blob URLs.
    #[arg(long, env = "SLIDEPULL_SIGNING_KEY", hide_env_values = true)]
    signing_key: Option<String>,

    /// Azure storage account. Selects the Azure backend when set.
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_NAME")]
    azure_account: Option<String>,

    /// Azure storage account key.
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_KEY", hide_env_values = true)]
    azure_key: Option<String>,

    /// Azure blob container.
    #[arg(long, env = "AZURE_BLOB_CONTAINER_NAME")]
    azure_container: Option<String>,

    /// Lifetime of signed URLs in hours.
    #[arg(long, env = "SLIDEPULL_SAS_TTL_HOURS", default_value_t = 168)]
    sas_ttl_hours: u64,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Deck to convert (.pptx, .ppt, .pps, .ppsx, .odp, .key or .pdf).
    input: PathBuf,

    /// Output directory.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Pages for a slide set: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, requires = "set_name")]
    pages: Option<String>,

    /// Name of the slide set to build from --pages.
    #[arg(long)]
    set_name: Option<String>,

    /// Print the result as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SLIDEPULL_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    Standard,
    Mid,
    Max,
}

impl From<QualityArg> for RenderQuality {
    fn from(v: QualityArg) -> Self {
        match v {
            QualityArg::Standard => RenderQuality::Standard,
            QualityArg::Mid => RenderQuality::Mid,
            QualityArg::Max => RenderQuality::Max,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for interactive conversions.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Convert(args) => run_convert(args, show_progress, cli.quiet).await,
    }
}

fn engine_config(engine: &EngineArgs) -> slidepull::ServiceConfigBuilder {
    let mut builder = ServiceConfig::builder()
        .soffice_path(engine.soffice.clone())
        .quality(engine.quality.into())
        .conversion_timeout_secs(engine.conversion_timeout)
        .max_upload_bytes(engine.max_upload_mb.saturating_mul(1024 * 1024));
    if let Some(ref lib) = engine.pdfium {
        builder = builder.pdfium_lib_path(lib.clone());
    }
    builder
}

// ── serve ────────────────────────────────────────────────────────────────

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = engine_config(&args.engine)
        .public_base_url(args.public_url.clone())
        .max_concurrent_conversions(args.max_conversions)
        .sas_ttl_secs(args.sas_ttl_hours.saturating_mul(3600))
        .build()
        .context("Invalid configuration")?;

    let settings = storage_settings(&args)?;
    info!("Storage backend: {:?}", settings);
    let (store, local): (Arc<dyn BlobStore>, Option<Arc<LocalBlobStore>>) = match settings {
        StorageSettings::Local { root, signing_key } => {
            let local = Arc::new(
                LocalBlobStore::new(&root, signing_key, &config.public_base_url)
                    .with_context(|| format!("Failed to open blob directory {}", root.display()))?,
            );
            (local.clone(), Some(local))
        }
        StorageSettings::Azure {
            account,
            access_key,
            container,
        } => {
            let azure = AzureBlobStore::new(&account, &access_key, &container)
                .context("Failed to configure Azure Blob Storage")?;
            (Arc::new(azure), None)
        }
    };

    let db = Database::open(&args.database)
        .with_context(|| format!("Failed to open database {}", args.database.display()))?;

    let pipeline = Arc::new(Pipeline::new(config, store, db));
    let mut state = AppState::new(pipeline);
    if let Some(local) = local {
        state = state.with_local_blobs(local);
    }

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.addr))?;
    server::serve(state, listener, server::shutdown_signal())
        .await
        .context("Server failed")?;
    Ok(())
}

fn storage_settings(args: &ServeArgs) -> Result<StorageSettings> {
    if let Some(ref account) = args.azure_account {
        let (Some(key), Some(container)) = (&args.azure_key, &args.azure_container) else {
            bail!("AZURE_STORAGE_ACCOUNT_KEY and AZURE_BLOB_CONTAINER_NAME are required with an Azure account");
        };
        return Ok(StorageSettings::Azure {
            account: account.clone(),
            access_key: key.clone(),
            container: container.clone(),
        });
    }

    let Some(ref key) = args.signing_key else {
        bail!("SLIDEPULL_SIGNING_KEY is required for the local blob backend");
    };
    Ok(StorageSettings::Local {
        root: args.storage_dir.clone(),
        signing_key: key.as_bytes().to_vec(),
    })
}

// ── convert ──────────────────────────────────────────────────────────────

async fn run_convert(args: ConvertArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let config = engine_config(&args.engine)
        .build()
        .context("Invalid configuration")?;

    let set = match (&args.set_name, &args.pages) {
        (Some(name), pages) => Some(LocalSet {
            name: name.clone(),
            selection: parse_pages(pages.as_deref().unwrap_or("all"))?,
        }),
        (None, _) => None,
    };

    tokio::fs::create_dir_all(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let converter = LocalConverter::new(config);
    let progress: Arc<dyn ConversionProgressCallback> = if show_progress {
        CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>
    } else {
        Arc::new(NoopProgressCallback)
    };
    let output = converter
        .convert(&args.input, &args.output, set.as_ref(), progress.as_ref())
        .await
        .context("Conversion failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if !quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {} slides  {}ms  →  {}",
            green("✔"),
            stats.page_count,
            stats.total_duration_ms,
            bold(&output.pdf_path.display().to_string()),
        );
        eprintln!(
            "   {} convert  /  {} render",
            dim(&format!("{}ms", stats.convert_duration_ms)),
            dim(&format!("{}ms", stats.render_duration_ms)),
        );
        if let (Some(pdf), Some(qr)) = (&output.set_pdf_path, &output.qrcode_path) {
            eprintln!("   set {}  qr {}", bold(&pdf.display().to_string()), qr.display());
        }
    }

    Ok(())
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_selections() {
        assert_eq!(parse_pages("all").unwrap(), PageSelection::All);
        assert_eq!(parse_pages(" 4 ").unwrap(), PageSelection::Single(4));
        assert_eq!(parse_pages("2-5").unwrap(), PageSelection::Range(2, 5));
        assert_eq!(parse_pages("1,3, 7").unwrap(), PageSelection::Set(vec![1, 3, 7]));
    }

    #[test]
    fn rejects_bad_page_selections() {
        for bad in ["0", "5-2", "0-3", "a", "1,x", "1,0"] {
            assert!(parse_pages(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
