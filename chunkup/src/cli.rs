//! Parses the command line arguments and runs the upload.
//!
//! Streams a file, or stdin, to a URL:
//!
//! ```cargo run -- http://127.0.0.1:8080/upload --file data.bin -H 'content-type: application/octet-stream'```

use anyhow::{anyhow, bail, Context};
use chunkup_core::{http1::Http1Factory, UploadRequestBuilder};
use clap::Parser;
use std::{
    fs::{create_dir_all, OpenOptions},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Stores the different command line arguments.
#[derive(Parser, Debug)]
#[command(version, about = "Streams a body of unknown length to an HTTP endpoint")]
pub struct Args {
    /// Destination URL. Only http is supported.
    url: String,
    /// Extra request header, as 'Name: value'. May be repeated.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
    /// Request method.
    #[arg(short = 'X', long, default_value = "POST")]
    method: String,
    /// Replaces the default user agent.
    #[arg(long)]
    user_agent: Option<String>,
    /// File to upload. Reads stdin when omitted.
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Bytes read from the input per push.
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: usize,
    #[arg(long, default_value_t = 10_000)]
    connect_timeout_ms: u64,
    /// Writes JSON logs to a file under ./logs.
    #[arg(short, long)]
    log: bool,
    /// Traces every step of the upload on stderr.
    #[arg(short, long)]
    verbose: bool,
}

/// Splits `Name: value` at the first colon.
fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parses the arguments, runs the upload, and reports whether it succeeded.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.log {
        initialize_logging(args.verbose)?;
    } else if args.verbose {
        initialize_stderr_logging()?;
    }
    upload(args).await
}

async fn upload(args: Args) -> anyhow::Result<()> {
    if args.chunk_size == 0 {
        bail!("--chunk-size must be at least 1");
    }
    let factory = Http1Factory {
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        ..Default::default()
    };
    let mut builder = UploadRequestBuilder::new(Arc::new(factory), args.url.as_str())
        .method(args.method.as_str())
        .initial_buffer_size(args.chunk_size)
        .enable_logging(args.verbose);
    for (name, value) in args.headers {
        builder = builder.header(name, value);
    }
    if let Some(user_agent) = args.user_agent {
        builder = builder.user_agent(user_agent);
    }
    let mut session = builder.open()?;

    let mut input: Box<dyn AsyncRead + Unpin + Send> = match &args.file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut sent = 0usize;
    let mut spare = Vec::with_capacity(args.chunk_size);
    loop {
        spare.resize(args.chunk_size, 0);
        let n = input.read(&mut spare).await.context("reading input")?;
        if n == 0 {
            break;
        }
        spare.truncate(n);
        sent += n;
        spare = session.push(spare).await?;
    }
    tracing::info!(sent, "input exhausted");

    let response = session.close().await?;
    eprintln!("{} {} ({sent} bytes sent)", response.status(), args.url);
    let mut stdout = tokio::io::stdout();
    stdout.write_all(response.payload()).await?;
    stdout.flush().await?;

    if !response.is_success() {
        return Err(anyhow!("server answered {}", response.status()));
    }
    Ok(())
}

/// Writes JSON lines to a new file under ./logs. Only call once per process.
fn initialize_logging(verbose: bool) -> anyhow::Result<()> {
    let main_path = "./logs";
    create_dir_all(main_path)?;
    let file_path = format!(
        "{}/upload-{}.log",
        main_path,
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    );
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&file_path)
        .with_context(|| format!("opening log file {file_path}"))?;
    let subscriber = FmtSubscriber::builder()
        .with_writer(Arc::new(file))
        .with_max_level(if verbose { Level::TRACE } else { Level::DEBUG })
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn initialize_stderr_logging() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_max_level(Level::TRACE)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_split_at_first_colon() {
        assert_eq!(
            parse_header("Content-Type: text/plain").unwrap(),
            ("Content-Type".into(), "text/plain".into())
        );
        assert_eq!(
            parse_header("x-when:12:30").unwrap(),
            ("x-when".into(), "12:30".into())
        );
        assert_eq!(parse_header("x-empty:").unwrap(), ("x-empty".into(), "".into()));
        assert!(parse_header("no colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn arguments_parse() {
        let args = Args::try_parse_from([
            "chunkup",
            "http://127.0.0.1:8080/upload",
            "-H",
            "a: 1",
            "--header",
            "b: 2",
            "-X",
            "PUT",
            "--chunk-size",
            "1024",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(args.url, "http://127.0.0.1:8080/upload");
        assert_eq!(
            args.headers,
            [("a".to_string(), "1".to_string()), ("b".into(), "2".into())]
        );
        assert_eq!(args.method, "PUT");
        assert_eq!(args.chunk_size, 1024);
        assert!(args.verbose);
        assert!(!args.log);
        assert!(args.file.is_none());
    }

    #[tokio::test]
    async fn invalid_destination_fails_before_reading() {
        let args = Args::try_parse_from(["chunkup", "not a url"]).unwrap();
        let error = upload(args).await.unwrap_err();
        assert!(error
            .downcast_ref::<chunkup_core::UploadError>()
            .is_some());
    }
}
