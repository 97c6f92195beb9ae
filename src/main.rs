use analysis_pipeline::{BatchAnalyzer, ClassificationCache, ResultWriter};
use clap::Parser;
use llm_interface::OpenAiClassifier;
use reddit_client::RedditClient;
use spotter_core::{
    AppConfig, CoreError, ErrorExt, RedditPost, SEARCH_LIMIT, SEARCH_PHRASE, SEARCH_SORT,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

const RAW_PREFIX: &str = "reddit_how_do_i_results";
const ANALYZED_PREFIX: &str = "analyzed";

/// Fetch Reddit "how do I" posts and classify them as genuine questions.
#[derive(Debug, Parser)]
#[command(name = "problemspotter", version)]
struct Cli {
    /// Only fetch Reddit posts, don't analyze them.
    #[arg(long, conflicts_with = "analyze_only")]
    fetch_only: bool,

    /// Only analyze existing Reddit posts, don't fetch new ones.
    #[arg(long)]
    analyze_only: bool,

    /// Specific raw data file to analyze (only with --analyze-only).
    #[arg(long, requires = "analyze_only")]
    file: Option<PathBuf>,

    /// Directory holding raw/analyzed output and the classification cache.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            "problemspotter=info,analysis_pipeline=info,reddit_client=info,llm_interface=info",
        )
        .init();

    info!("Starting ProblemSpotter");

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(dir) = cli.data_dir.clone() {
        config = config.with_data_dir(dir);
    }
    config.log_redacted();

    if let Err(e) = run(cli, config).await {
        e.log_error();
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli, config: AppConfig) -> Result<(), CoreError> {
    let raw_file = if cli.analyze_only {
        match cli.file {
            Some(file) => {
                if !file.exists() {
                    return Err(CoreError::InvalidInput {
                        message: format!("file {} does not exist", file.display()),
                    });
                }
                file
            }
            None => latest_raw_file(&config.raw_dir())?,
        }
    } else {
        fetch(&config).await?
    };

    if cli.fetch_only {
        return Ok(());
    }

    info!("Analyzing posts in {}", raw_file.display());
    analyze(&config, &raw_file).await
}

async fn fetch(config: &AppConfig) -> Result<PathBuf, CoreError> {
    let (client_id, client_secret) = config.reddit_credentials()?;
    let client = RedditClient::new(client_id.to_string(), client_secret.to_string())?;

    let posts = client
        .search_posts(SEARCH_PHRASE, SEARCH_SORT, SEARCH_LIMIT)
        .await?;

    let writer = ResultWriter::new(config.raw_dir(), RAW_PREFIX);
    let path = writer.write(&posts)?;
    info!("Saved {} Reddit posts to {}", posts.len(), path.display());
    Ok(path)
}

async fn analyze(config: &AppConfig, raw_file: &Path) -> Result<(), CoreError> {
    let api_key = config.openai_api_key()?;

    // Parse at the boundary; a malformed raw file fails fast here, before
    // any paid classifier call.
    let raw = fs::read_to_string(raw_file)?;
    let posts: Vec<RedditPost> = serde_json::from_str(&raw)?;

    let classifier = Arc::new(OpenAiClassifier::new(api_key)?);
    let cache = Arc::new(ClassificationCache::load(config.cache_path()));
    let analyzer =
        BatchAnalyzer::new(classifier, cache).with_concurrency(config.concurrency);

    let (records, summary) = analyzer.run(posts).await?;

    let writer = ResultWriter::new(config.analyzed_dir(), ANALYZED_PREFIX);
    let path = writer.write(&records)?;
    info!("{}", summary);
    info!("Analysis complete. Results saved to {}", path.display());
    Ok(())
}

/// Most recently modified JSON file in the raw data directory.
fn latest_raw_file(dir: &Path) -> Result<PathBuf, CoreError> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| CoreError::InvalidInput {
            message: format!("no JSON files found in {}", dir.display()),
        })
}
