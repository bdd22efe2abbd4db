//! BleepFS -- command-line access to S3-compatible buckets through the
//! buffered object store.
//!
//! Every command builds one `ObjectStore` and runs.  Anything still
//! buffered is flushed before exiting, but only after a successful command;
//! a failed command never publishes what it had buffered.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use bleepfs::config::{Config, LoggingConfig};
use bleepfs::storage::client::RemoteStoreClient;
use bleepfs::{ObjectStore, TaskPool};

/// Command-line arguments for BleepFS.
#[derive(Parser, Debug)]
#[command(
    name = "bleepfs",
    version,
    about = "Buffered file-like access to S3-compatible object storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Print Prometheus metrics to stderr before exiting.
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file to an object URI.
    Put { file: String, uri: String },
    /// Print an object, or a byte range of it, to stdout.
    Cat {
        uri: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        length: Option<u64>,
    },
    /// Print the size of an object.
    Stat { uri: String },
    /// List the immediate children of a prefix.
    Ls { uri: String },
    /// Remove an object, or every object under a prefix ending in `/`.
    Rm { uri: String },
    /// Create an empty object if none exists.
    Touch { uri: String },
    /// Make a bucket.
    Mb { uri: String },
    /// Remove a bucket.
    Rb {
        uri: String,
        /// Delete every object in the bucket first.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => bleepfs::config::load_config(path)?,
        None => Config::default(),
    };
    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    // Initialize Prometheus metrics recorder and register metric descriptions.
    let metrics = bleepfs::metrics::init_metrics()?;
    bleepfs::metrics::describe_metrics();

    let client: Arc<dyn RemoteStoreClient> = match config.storage.backend.as_str() {
        "aws" => {
            let aws_config = config.storage.aws.clone().unwrap_or_default();
            Arc::new(bleepfs::storage::aws::AwsS3Client::new(&aws_config).await?)
        }
        "memory" => {
            info!("In-memory store initialized; objects will not outlive this process");
            Arc::new(bleepfs::storage::memory::MemoryStoreClient::new())
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected aws or memory)"),
    };

    let pool = TaskPool::new(config.s3.max_parallel_ops);
    let store = ObjectStore::new(client, pool, config.s3.clone())?;

    let result = finish(&store, run(&store, cli.command).await).await;

    if cli.print_metrics {
        eprintln!("{}", metrics.render());
    }
    result
}

/// Flush pending buffers after a successful command.
async fn finish(store: &ObjectStore, result: anyhow::Result<()>) -> anyhow::Result<()> {
    result?;
    store.flush_all().await?;
    Ok(())
}

async fn run(store: &ObjectStore, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Put { file, uri } => match put_file(store, &file, &uri).await {
            Ok(total) => info!("Uploaded {} bytes from {} to {}", total, file, uri),
            Err(e) => {
                store.discard(&uri)?;
                return Err(e);
            }
        },
        Command::Cat {
            uri,
            offset,
            length,
        } => {
            let length = match length {
                Some(length) => length,
                None => store.object_size(&uri).await?.saturating_sub(offset),
            };
            let data = store.read_range(&uri, offset, length).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        Command::Stat { uri } => {
            println!("{}\t{}", store.object_size(&uri).await?, uri);
        }
        Command::Ls { uri } => {
            for entry in store.ls(&uri).await? {
                println!("{entry}");
            }
        }
        Command::Rm { uri } => {
            if uri.ends_with('/') {
                store.remove_dir(&uri).await?;
            } else {
                store.remove_object(&uri).await?;
            }
        }
        Command::Touch { uri } => store.touch(&uri).await?,
        Command::Mb { uri } => store.create_bucket(&uri).await?,
        Command::Rb { uri, force } => {
            if force {
                store.empty_bucket(&uri).await?;
            }
            store.remove_bucket(&uri).await?;
        }
    }
    Ok(())
}

/// Stream `file` into `uri` and flush it.  Returns the bytes uploaded.
async fn put_file(store: &ObjectStore, file: &str, uri: &str) -> anyhow::Result<u64> {
    let mut input = tokio::fs::File::open(file).await?;
    let chunk_len = usize::try_from(store.config().multipart_part_size)?;
    let mut chunk = vec![0u8; chunk_len];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        store.write(uri, &chunk[..n]).await?;
        total += n as u64;
    }
    store.flush_object(uri).await?;
    Ok(total)
}

/// Install the global subscriber.  `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use bleepfs::config::S3Config;
    use bleepfs::storage::memory::MemoryStoreClient;
    use bleepfs::FsError;

    const URI: &str = "s3://test-bucket/upload";

    async fn memory_store(part_size: u64, multipart: bool) -> ObjectStore {
        let client = MemoryStoreClient::new();
        client.create_bucket("test-bucket").await.unwrap();
        let config = S3Config {
            max_parallel_ops: 2,
            multipart_part_size: part_size,
            use_multipart_upload: multipart,
        };
        ObjectStore::new(Arc::new(client), TaskPool::new(2), config).unwrap()
    }

    fn local_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
        file.write_all(&data).unwrap();
        file
    }

    fn put(file: &tempfile::NamedTempFile) -> Command {
        Command::Put {
            file: file.path().to_string_lossy().into_owned(),
            uri: URI.to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_over_ceiling_publishes_nothing() {
        let store = memory_store(10, false).await;
        let file = local_file(15);

        let result = finish(&store, run(&store, put(&file)).await).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FsError>(),
            Some(FsError::CapacityExceeded { .. })
        ));
        assert!(!store.is_object(URI).await.unwrap());

        // Nothing is left behind for a later flush to publish.
        store.flush_all().await.unwrap();
        assert!(!store.is_object(URI).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_uploads_whole_file() {
        let store = memory_store(10, true).await;
        let file = local_file(35);

        finish(&store, run(&store, put(&file)).await).await.unwrap();
        assert_eq!(store.object_size(URI).await.unwrap(), 35);
        let data = store.read_range(URI, 26, 9).await.unwrap();
        assert_eq!(&data[..], b"abcdefghi");
    }
}
