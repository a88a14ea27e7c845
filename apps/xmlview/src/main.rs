use clap::Parser;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;
use xv_loader::NetFetcher;
use xv_net::NetStack;
use xv_page::PageSource;
use xv_page::Viewer;
use xv_page::ViewerConfig;

const DEFAULT_LOG_FILTER: &str = "warn,xmlview=info,xv_loader=info,xv_page=info,xv_xslt=info";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Render the XML-bound elements of an HTML page through their XSL stylesheets.
#[derive(Debug, Parser)]
#[command(name = "xmlview", version)]
struct Cli {
    /// Host page HTML file
    page: PathBuf,

    /// URL the page is served from; relative `load` sources resolve against it.
    /// Defaults to the page's file URL.
    #[arg(long)]
    base_url: Option<Url>,

    /// Location fragment of the page; a lazy element with this id loads eagerly
    #[arg(long)]
    anchor: Option<String>,

    /// Viewer configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up waiting for loads after this many seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Click the element with this id after the page settles. Repeatable.
    #[arg(long = "click", value_name = "ID")]
    clicks: Vec<String>,

    /// Skip slide and fade delays
    #[arg(long)]
    no_animation: bool,

    /// Format timestamps in UTC instead of local time
    #[arg(long)]
    utc: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(html) => {
            println!("{html}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("xmlview: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<String, String> {
    let mut config = match &cli.config {
        Some(path) => ViewerConfig::load(path).map_err(|error| error.to_string())?,
        None => ViewerConfig::default(),
    };
    if cli.no_animation {
        config.animation.enabled = false;
    }
    if cli.utc {
        config.timestamp_utc = true;
    }
    init_logging(config.log_filter.as_deref());

    if config.auto_refresh_secs.take().is_some() {
        tracing::info!("auto refresh disabled for a one-shot render");
    }

    let markup = tokio::fs::read_to_string(&cli.page)
        .await
        .map_err(|error| format!("failed to read {}: {error}", cli.page.display()))?;
    let base_url = match cli.base_url {
        Some(url) => url,
        None => file_url(&cli.page)?,
    };
    let timeout = Duration::from_secs(cli.timeout_secs);
    let fetcher = Arc::new(NetFetcher::new(NetStack::new(config.net_config())));

    let source = PageSource {
        markup,
        base_url,
        anchor: cli.anchor,
    };
    let viewer = Viewer::open(source, config, fetcher).map_err(|error| error.to_string())?;
    settle(&viewer, timeout).await?;

    for id in &cli.clicks {
        if !viewer.click_id(id) {
            return Err(format!("nothing to click on #{id}"));
        }
        settle(&viewer, timeout).await?;
    }

    let html = viewer.html();
    viewer.shutdown();
    Ok(html)
}

async fn settle(viewer: &Viewer, timeout: Duration) -> Result<(), String> {
    tokio::time::timeout(timeout, viewer.settle())
        .await
        .map_err(|_| format!("loads did not finish within {}s", timeout.as_secs()))
}

fn file_url(path: &Path) -> Result<Url, String> {
    let absolute = std::fs::canonicalize(path)
        .map_err(|error| format!("failed to resolve {}: {error}", path.display()))?;
    Url::from_file_path(&absolute)
        .map_err(|()| format!("{} cannot be expressed as a file URL", absolute.display()))
}

fn init_logging(config_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn click_flag_is_repeatable() {
        let cli = match Cli::try_parse_from([
            "xmlview",
            "index.html",
            "--base-url",
            "https://status.example.com/",
            "--click",
            "jobs",
            "--click",
            "nodes",
        ]) {
            Ok(cli) => cli,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(cli.clicks, vec!["jobs".to_owned(), "nodes".to_owned()]);
        assert_eq!(cli.timeout_secs, 30);
        assert_eq!(
            cli.base_url.as_ref().map(|url| url.as_str()),
            Some("https://status.example.com/")
        );
    }

    #[test]
    fn page_argument_is_required() {
        assert!(Cli::try_parse_from(["xmlview"]).is_err());
    }
}
