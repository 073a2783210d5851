use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use toujo::config::{DEFAULT_DATA_DIR, DEFAULT_OUTPUT_DIR, SEED_CATEGORY};
use toujo::extract::{self, ExtractConfig};
use toujo::filter::ExcludeList;
use toujo::heuristics::Heuristics;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "toujo")]
#[command(about = "Mine fictional-character name candidates from Japanese Wikipedia dumps")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the dumps and write candidate CSVs, page bodies and metadata
    Extract(ExtractArgs),
    /// Re-mine page bodies written by an earlier extract run
    MinePages(MinePagesArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// JSON exclude list ({"exact": [...]})
    #[arg(long)]
    exclude_list: Option<PathBuf>,

    /// JSON file overriding the default heuristics
    #[arg(long)]
    heuristics: Option<PathBuf>,

    /// Number of worker threads (values below 1 mean 1)
    #[arg(long, env = "WIKI_WORKERS", default_value_t = 1, allow_negative_numbers = true)]
    workers: i64,
}

impl CommonArgs {
    fn workers(&self) -> usize {
        self.workers.max(1) as usize
    }

    fn load(&self) -> Result<(Heuristics, ExcludeList)> {
        let heuristics = match &self.heuristics {
            Some(path) => Heuristics::load(path)?,
            None => Heuristics::default(),
        };
        let exclude = ExcludeList::load(self.exclude_list.as_deref(), &heuristics)?;
        Ok((heuristics, exclude))
    }
}

#[derive(Args)]
struct ExtractArgs {
    /// Directory holding the page, categorylinks, linktarget and pages-articles dumps
    #[arg(long, env = "WIKI_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Output directory for CSVs, page bodies and the index cache
    #[arg(long, env = "WIKI_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Root category of the closure
    #[arg(long, default_value = SEED_CATEGORY)]
    seed_category: String,

    /// Force rebuild of index cache
    #[arg(long)]
    no_cache: bool,

    /// Do not write pages/<id>.txt bodies
    #[arg(long)]
    no_pages: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct MinePagesArgs {
    /// Output directory of an earlier extract run
    #[arg(long, env = "WIKI_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let (heuristics, exclude) = args.common.load()?;
    let config = ExtractConfig {
        data_dir: args.data_dir,
        output_dir: args.output_dir,
        workers: args.common.workers(),
        seed: args.seed_category,
        use_cache: !args.no_cache,
        write_pages: !args.no_pages,
    };

    let summary = extract::run_extraction(&config, &heuristics, &exclude)?;
    let stats = &summary.stats;

    println!();
    println!("=== Summary ===");
    println!(
        "Indexing time:        {:.2}s{}",
        summary.index_duration.as_secs_f64(),
        if summary.from_cache { " (cached)" } else { "" }
    );
    println!(
        "Extraction time:      {:.2}s",
        summary.extract_duration.as_secs_f64()
    );
    println!(
        "Total time:           {:.2}s",
        (summary.index_duration + summary.extract_duration).as_secs_f64()
    );
    println!();
    println!("Closure categories:   {}", summary.closure_categories);
    println!("Closure pages:        {}", summary.closure_members);
    println!("Category candidates:  {}", summary.category_candidates);
    println!("Pages read:           {}", stats.pages());
    println!("Character lists:      {}", stats.character_lists());
    println!("Character sections:   {}", stats.sections());
    println!("Pages written:        {}", stats.written());
    println!("Names mined:          {}", stats.mined());
    println!("Names rejected:       {}", stats.rejected());
    println!("Page failures:        {}", stats.failures());
    println!("Candidates:           {}", summary.total_candidates);
    println!("  accepted:           {}", summary.counts.accepted);
    println!("  excluded:           {}", summary.counts.excluded);

    Ok(())
}

fn run_mine_pages(args: MinePagesArgs) -> Result<()> {
    let (heuristics, exclude) = args.common.load()?;
    let summary = extract::mine_page_files(
        &args.output_dir,
        args.common.workers(),
        &heuristics,
        &exclude,
    )?;

    println!();
    println!("=== Summary ===");
    println!("Page files:           {}", summary.pages);
    println!("Character lists:      {}", summary.stats.character_lists());
    println!("Names mined:          {}", summary.stats.mined());
    println!("Names rejected:       {}", summary.stats.rejected());
    println!("Page failures:        {}", summary.stats.failures());
    println!("Candidates:           {}", summary.total_candidates);
    println!("  accepted:           {}", summary.counts.accepted);
    println!("  excluded:           {}", summary.counts.excluded);

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::MinePages(args) => run_mine_pages(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
