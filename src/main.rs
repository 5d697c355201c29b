use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::info;

use pixvault::backend::localfs::LocalFsBackend;
use pixvault::backend::memory::MemoryBackend;
use pixvault::backend::smb::SmbBackend;
use pixvault::backend::StorageBackend;
use pixvault::catalog::kv::FileKv;
use pixvault::catalog::{Catalog, ContentHash};
use pixvault::codec::Wrapper;
use pixvault::util::size::{format_size, parse_size};
use pixvault::{Saver, SaverConfig, SaverError, UploadOptions};

#[derive(Parser)]
#[command(name = "pixvault", version, about = "Store arbitrary data on image hosts")]
struct Cli {
    /// Storage backend for resource blobs.
    #[arg(long, value_enum, default_value_t = BackendKind::Localfs)]
    backend: BackendKind,

    /// Blob directory (localfs) or share mount point (smb).
    #[arg(long, value_name = "DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Catalog snapshot file.
    #[arg(long, value_name = "FILE", default_value = "./pixvault.catalog")]
    catalog: PathBuf,

    /// Force a resource wrapper instead of what the backend asks for.
    #[arg(long, value_enum)]
    wrapper: Option<WrapperKind>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(ValueEnum, Clone, Copy)]
enum BackendKind {
    Memory,
    Localfs,
    Smb,
}

#[derive(ValueEnum, Clone, Copy)]
enum WrapperKind {
    Pass,
    Png,
    Svg,
}

impl From<WrapperKind> for Wrapper {
    fn from(kind: WrapperKind) -> Self {
        match kind {
            WrapperKind::Pass => Wrapper::Identity,
            WrapperKind::Png => Wrapper::Png,
            WrapperKind::Svg => Wrapper::Svg,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file, directory or stdin as one or more compounds.
    Upload(UploadArgs),
    /// Reassemble a compound and verify it.
    Download(DownloadArgs),
    /// Enumerate compounds.
    List(ListArgs),
    /// Remove a compound and release its fragments.
    Delete(DeleteArgs),
    /// Rename a compound.
    Rename(RenameArgs),
    /// Garbage-collect dead resources; optionally defragment first.
    Clean(CleanArgs),
    /// Report counts, sizes, dedup ratio and fill efficiency.
    Statistic,
    /// Verify catalog closure and blob presence.
    Check,
    /// Drop the catalog; optionally delete every backend blob too.
    Wipe(WipeArgs),
}

#[derive(Args)]
struct UploadArgs {
    /// Source path, or `-` for stdin.
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    input: String,

    /// Compound name (defaults to the file name; required for stdin).
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Replace an existing compound of the same name.
    #[arg(long = "ow", alias = "overwrite")]
    overwrite: bool,

    /// Update mode: checksum each source file and skip unchanged ones.
    #[arg(short = 'u', long = "update")]
    update: bool,

    /// Fragment size, e.g. `0.5MB` (SI decimal).
    #[arg(long = "fs", value_name = "SIZE")]
    fragment_size: Option<String>,

    /// Target resource payload size, e.g. `25MB` (SI decimal).
    #[arg(long = "rs", value_name = "SIZE")]
    resource_size: Option<String>,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(short = 'n', long = "name")]
    name: String,

    /// Destination path, or `-` for stdout.
    #[arg(short = 'o', long = "output", value_name = "PATH", default_value = "-")]
    output: String,
}

#[derive(Args)]
struct ListArgs {
    /// Also print sizes, hashes and fragment counts.
    #[arg(long)]
    details: bool,
}

#[derive(Args)]
struct DeleteArgs {
    #[arg(short = 'n', long = "name")]
    name: String,

    /// Update mode: a missing name is a no-op instead of an error.
    #[arg(short = 'u', long = "update")]
    update: bool,
}

#[derive(Args)]
struct RenameArgs {
    old: String,
    new: String,
}

#[derive(Args)]
struct CleanArgs {
    /// Also defragment compounds spanning too many resources.
    #[arg(long = "df", alias = "defragment")]
    defragment: bool,
}

#[derive(Args)]
struct WipeArgs {
    /// Also delete every blob on the backend.
    #[arg(short = 'c', long = "clear-backend")]
    clear_backend: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "pixvault=warn".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), SaverError> {
    let kv = FileKv::open(&cli.catalog).await?;
    let catalog = Catalog::new(Arc::new(kv));

    let backend: Box<dyn StorageBackend> = match cli.backend {
        BackendKind::Memory => Box::new(MemoryBackend::new()),
        BackendKind::Localfs => {
            let mut b = LocalFsBackend::new(&cli.data_dir);
            if let Some(wrapper) = cli.wrapper {
                b = b.requiring(wrapper.into());
            }
            Box::new(b)
        }
        BackendKind::Smb => {
            let mut b = SmbBackend::new(&cli.data_dir);
            if let Some(wrapper) = cli.wrapper {
                b = b.requiring(wrapper.into());
            }
            Box::new(b)
        }
    };

    let mut config = SaverConfig::default();
    if let Some(wrapper) = cli.wrapper {
        config.resource_wrapper = Some(wrapper.into());
    }

    if let Command::Upload(args) = &cli.cmd {
        if let Some(size) = &args.resource_size {
            config.target_resource_size =
                parse_size(size).map_err(|e| SaverError::Usage(e.to_string()))?;
        }
    }
    let mut saver = Saver::new(backend, catalog, config);

    match cli.cmd {
        Command::Upload(args) => upload_cmd(&mut saver, args).await,
        Command::Download(args) => download_cmd(&mut saver, args).await,
        Command::List(args) => {
            for compound in saver.list().await? {
                if args.details {
                    println!(
                        "{}\t{}\t{} fragments\t{}",
                        compound.name,
                        format_size(compound.size),
                        compound.sequence.len(),
                        compound.hash
                    );
                } else {
                    println!("{}", compound.name);
                }
            }
            Ok(())
        }
        Command::Delete(args) => {
            let removed = saver.delete(&args.name, !args.update).await?;
            if removed {
                println!("deleted {}", args.name);
            }
            Ok(())
        }
        Command::Rename(args) => {
            saver.rename(&args.old, &args.new).await?;
            println!("renamed {} -> {}", args.old, args.new);
            Ok(())
        }
        Command::Clean(args) => {
            let report = saver.clean(args.defragment).await?;
            println!(
                "deleted {} resources ({} fragments), repacked {} compounds",
                report.resources_deleted,
                report.fragments_deleted,
                report.compounds_repacked
            );
            Ok(())
        }
        Command::Statistic => {
            println!("{}", saver.statistic().await?);
            Ok(())
        }
        Command::Check => {
            let report = saver.check_consistency().await?;
            if report.is_consistent() {
                println!("catalog and backend are consistent");
                Ok(())
            } else {
                for (name, hash) in &report.missing_fragments {
                    eprintln!("compound {name} references missing fragment {hash}");
                }
                for hash in &report.missing_resources {
                    eprintln!("fragment {hash} references a missing resource");
                }
                for id in &report.missing_blobs {
                    eprintln!("resource {id} has no blob on the backend");
                }
                Err(SaverError::CatalogCorrupt(
                    "consistency check failed".to_string(),
                ))
            }
        }
        Command::Wipe(args) => {
            saver.wipe(args.clear_backend).await?;
            println!("catalog wiped");
            Ok(())
        }
    }
}

async fn upload_cmd<B: StorageBackend>(
    saver: &mut Saver<B>,
    args: UploadArgs,
) -> Result<(), SaverError> {
    let fragment_size = args
        .fragment_size
        .as_deref()
        .map(parse_size)
        .transpose()
        .map_err(|e| SaverError::Usage(e.to_string()))?;
    let options = UploadOptions {
        overwrite: args.overwrite || args.update,
        fragment_size,
    };

    if args.input == "-" {
        let name = args.name.clone().ok_or_else(|| {
            SaverError::Usage("a name (-n) is required when reading from stdin".into())
        })?;
        let mut stdin = tokio::io::stdin();
        let record = saver.upload(&name, &mut stdin, options).await?;
        println!("{} ({})", record.name, format_size(record.size));
        return Ok(());
    }

    let input = PathBuf::from(&args.input);
    if input.is_file() {
        let name = match &args.name {
            Some(name) => name.clone(),
            None => file_stem_name(&input)?,
        };
        upload_file(saver, &input, &name, args.update, options).await
    } else if input.is_dir() {
        let prefix = match &args.name {
            Some(name) => name.clone(),
            None => file_stem_name(&input)?,
        };
        let mut walker = walkdir::WalkDir::new(&input)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry =
                entry.map_err(|e| SaverError::Usage(format!("cannot walk {}: {e}", args.input)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&input)
                .map_err(|e| SaverError::Usage(e.to_string()))?;
            let name = format!("{}/{}", prefix, rel.to_string_lossy().replace('\\', "/"));
            upload_file(saver, entry.path(), &name, args.update, options).await?;
        }
        Ok(())
    } else {
        Err(SaverError::Usage(format!(
            "input {} is neither a file nor a directory",
            args.input
        )))
    }
}

async fn upload_file<B: StorageBackend>(
    saver: &mut Saver<B>,
    path: &Path,
    name: &str,
    update: bool,
    options: UploadOptions,
) -> Result<(), SaverError> {
    if update {
        // The one place a local re-read happens: whole-file checksum to
        // decide whether the backend needs to be touched at all.
        if let Some(existing) = saver.stat(name).await? {
            if existing.hash == sha256_of_file(path).await? {
                info!(name, "unchanged, skipping");
                println!("{name} unchanged, skipped");
                return Ok(());
            }
        }
    }
    let mut file = tokio::fs::File::open(path).await?;
    let record = saver.upload(name, &mut file, options).await?;
    println!("{} ({})", record.name, format_size(record.size));
    Ok(())
}

async fn download_cmd<B: StorageBackend>(
    saver: &mut Saver<B>,
    args: DownloadArgs,
) -> Result<(), SaverError> {
    if args.output == "-" {
        let mut stdout = tokio::io::stdout();
        saver.download(&args.name, &mut stdout).await?;
    } else {
        let path = PathBuf::from(&args.output);
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let mut file = tokio::fs::File::create(&path).await?;
        let record = saver.download(&args.name, &mut file).await?;
        eprintln!("{} -> {} ({})", record.name, args.output, format_size(record.size));
    }
    Ok(())
}

fn file_stem_name(path: &Path) -> Result<String, SaverError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SaverError::Usage(format!("cannot derive a name from {}", path.display())))
}

async fn sha256_of_file(path: &Path) -> Result<ContentHash, SaverError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash::from_digest(hasher))
}
