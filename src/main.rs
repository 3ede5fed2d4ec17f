//! h2fetch command-line entry point: argument parsing, URI grouping, and
//! sequential per-origin sessions.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use bytes::Bytes;
use clap::Parser;
use http::header::{HeaderName, HeaderValue};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use h2fetch::config::{self, Config};
use h2fetch::{client, stats, uri};

/// Fetch URIs over HTTP/2, multiplexing every request to one origin over a
/// single connection.
#[derive(Parser, Debug)]
#[command(name = "h2fetch", version, about)]
struct Cli {
    /// Print debug information such as reception and transmission of
    /// frames and the TLS protocol selection.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Discard downloaded data.
    #[arg(short = 'n', long = "null-out")]
    null_out: bool,

    /// Save downloaded data under a filename derived from the URI.
    /// Not implemented yet.
    #[arg(short = 'O', long = "remote-name")]
    remote_name: bool,

    /// Timeout each read and write after SECONDS seconds.
    #[arg(short = 't', long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Set the initial window size to 2**N.
    #[arg(
        short = 'w',
        long = "window-bits",
        value_name = "N",
        value_parser = clap::value_parser!(u8).range(0..=30)
    )]
    window_bits: Option<u8>,

    /// Download assets such as stylesheets, images and script files linked
    /// from the downloaded resource. Only links whose origin matches the
    /// linking resource are followed.
    #[arg(short = 'a', long = "get-assets")]
    get_assets: bool,

    /// Print statistics.
    #[arg(short = 's', long)]
    stat: bool,

    /// Add a header to the requests, as "Name: value".
    #[arg(short = 'H', long = "header", value_name = "HEADER", value_parser = config::parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// Use the specified client certificate file (PEM).
    #[arg(long, value_name = "CERT")]
    cert: Option<PathBuf>,

    /// Use the specified client private key file (PEM).
    #[arg(long, value_name = "KEY")]
    key: Option<PathBuf>,

    /// Disable TLS and connect in cleartext.
    #[arg(long = "no-tls")]
    no_tls: bool,

    /// Post FILE to the server. `-` reads from standard input.
    #[arg(short = 'd', long = "data", value_name = "FILE")]
    data: Option<PathBuf>,

    /// Request each URI N times. By default the same URI is not requested
    /// twice; this option also disables that.
    #[arg(
        short = 'm',
        long = "multiply",
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    multiply: u32,

    /// URIs to fetch. URIs without a scheme are skipped.
    #[arg(value_name = "URI", required = true)]
    uris: Vec<String>,
}

impl Cli {
    fn into_config(self) -> (Config, Vec<String>) {
        // First occurrence of a header name wins, matching repeated -H use.
        let mut headers: Vec<(HeaderName, HeaderValue)> = Vec::new();
        for (name, value) in self.headers {
            if !headers.iter().any(|(seen, _)| *seen == name) {
                headers.push((name, value));
            }
        }
        let config = Config {
            verbose: self.verbose,
            null_out: self.null_out,
            remote_name: self.remote_name,
            timeout: self.timeout.map(std::time::Duration::from_secs),
            window_bits: self.window_bits,
            get_assets: self.get_assets,
            stat: self.stat,
            no_tls: self.no_tls,
            multiply: self.multiply as usize,
            headers,
            certfile: self.cert,
            keyfile: self.key,
            datafile: self.data,
        };
        (config, self.uris)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "h2fetch=trace,h2=trace"
    } else {
        "h2fetch=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads the upload body once, up front. `-` means standard input.
fn read_upload(path: &std::path::Path) -> std::io::Result<Bytes> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        std::io::stdin().lock().read_to_end(&mut data)?;
        Ok(Bytes::from(data))
    } else {
        std::fs::read(path).map(Bytes::from)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let (config, uris) = cli.into_config();
    if config.remote_name {
        warn!("-O, --remote-name is not implemented yet; writing to stdout");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start the runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let failures = runtime.block_on(run(Rc::new(config), uris));
    ExitCode::from(failures.min(u8::MAX as usize) as u8)
}

/// Scans the URI list in order, starting a new session whenever the
/// `(host, port)` pair changes, and runs the sessions one after another.
/// Returns the number of failed sessions.
async fn run(config: Rc<Config>, uris: Vec<String>) -> usize {
    let upload = match config.datafile.as_deref() {
        Some(path) => match read_upload(path) {
            Ok(data) => Some(data),
            Err(err) => {
                eprintln!("Could not read {}: {}", path.display(), err);
                return 1;
            }
        },
        None => None,
    };

    let mut failures = 0;
    let mut target: Option<(String, u16)> = None;
    let mut group: Vec<String> = Vec::new();

    for raw in &uris {
        let parsed = match uri::parse(raw) {
            Ok(parsed) => parsed,
            // A URI without a scheme is skipped silently.
            Err(_) => continue,
        };
        let key = (
            uri::bare_host(&parsed).to_owned(),
            uri::effective_port(&parsed),
        );
        if target.as_ref() != Some(&key) {
            if let Some((host, port)) = target.take() {
                failures += run_one(&config, host, port, std::mem::take(&mut group), &upload).await;
            }
            target = Some(key);
        }
        group.push(uri::strip_fragment(raw).to_owned());
    }
    if let Some((host, port)) = target {
        failures += run_one(&config, host, port, group, &upload).await;
    }
    failures
}

/// Runs one session to completion and folds its outcome into the failure
/// count.
async fn run_one(
    config: &Rc<Config>,
    host: String,
    port: u16,
    uris: Vec<String>,
    upload: &Option<Bytes>,
) -> usize {
    let local = tokio::task::LocalSet::new();
    let session = client::communicate(config.clone(), host, port, uris, upload.clone());
    match local.run_until(session).await {
        Ok(summary) => {
            if !summary.all_done() {
                eprintln!(
                    "Some requests were not processed. total={}, processed={}",
                    summary.total(),
                    summary.completed
                );
            }
            if let Some(err) = &summary.error {
                eprintln!("{}", err);
            }
            if config.stat {
                let _ = stats::print(&summary, &mut std::io::stdout().lock());
            }
            usize::from(summary.failed())
        }
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}
