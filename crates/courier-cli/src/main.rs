//! Courier - command-line HTTP client.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use courier::{Browser, BrowserConfig, DownloadTarget, HeaderMap, Method, Progress, Sender};

/// Courier - an asynchronous HTTP client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Send every request through this Unix-domain socket
    #[arg(long, global = true)]
    unix_socket: Option<PathBuf>,

    /// User agent string
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a URL and print status, headers and body
    Get {
        url: String,

        /// Extra request header, as `Name: value`
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Only print the response head
        #[arg(short = 'I', long)]
        head: bool,
    },
    /// Stream a URL to a file
    Download {
        url: String,
        path: PathBuf,

        /// Extra request header, as `Name: value`
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected `Name: value`, got {:?}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("header name is empty in {:?}", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn header_map(headers: Vec<(String, String)>) -> HeaderMap {
    headers.into_iter().collect()
}

fn build_sender(unix_socket: Option<PathBuf>) -> Result<Sender> {
    match unix_socket {
        #[cfg(unix)]
        Some(path) => Ok(Sender::with_unix_socket(path)),
        #[cfg(not(unix))]
        Some(_) => bail!("--unix-socket is only supported on Unix platforms"),
        None => Ok(Sender::with_default_transport()?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = BrowserConfig::default();
    if let Some(ua) = args.user_agent {
        config = config.user_agent(ua);
    }
    let browser = Browser::with_config(build_sender(args.unix_socket)?, config).streaming();

    match args.command {
        Command::Get { url, headers, head } => get(&browser, &url, header_map(headers), head).await,
        Command::Download { url, path, headers } => {
            download(&browser, &url, path, header_map(headers)).await
        }
    }
}

async fn get(browser: &Browser, url: &str, headers: HeaderMap, head_only: bool) -> Result<()> {
    let method = if head_only { Method::HEAD } else { Method::GET };
    let mut pending = browser.request(method, url, headers, courier::Body::Empty);
    if let Some(Progress::RequestOpened(head)) = pending.progress().await {
        debug!(method = %head.method, uri = %head.uri, "request opened");
    }

    let response = pending.await.with_context(|| format!("request to {} failed", url))?;
    let mut stdout = tokio::io::stdout();

    let mut head = format!(
        "{:?} {} {}\n",
        response.version(),
        response.status().as_u16(),
        response.reason()
    );
    head.push_str(&response.headers().to_string());
    head.push('\n');
    stdout.write_all(head.as_bytes()).await?;

    let mut body = response.into_body_stream();
    while let Some(chunk) = body.next_chunk().await? {
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;
    Ok(())
}

async fn download(browser: &Browser, url: &str, path: PathBuf, headers: HeaderMap) -> Result<()> {
    info!("Downloading {} to {}", url, path.display());

    let target = DownloadTarget::Path(path.clone());
    let response = browser
        .download(url, target, headers, Method::GET)
        .await
        .with_context(|| format!("download of {} failed", url))?;

    let status = response.status();
    let mut body = response.into_body_stream();
    let mut total = 0u64;
    while let Some(chunk) = body.next_chunk().await? {
        total += chunk.len() as u64;
    }

    info!("{} {} bytes written to {}", status, total, path.display());
    Ok(())
}
