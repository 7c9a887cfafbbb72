use anyhow::{Context, Result};
use attend_core::{
    decode_embedding, distance, encode_embedding, ByteOrder, Embedding, EuclideanMatcher,
    GalleryEntry, MatchResult, Matcher, MismatchPolicy, Tolerance, DEFAULT_TOLERANCE,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "attend", about = "Attend face matching tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Euclidean distance between two embeddings
    Distance {
        /// JSON file holding the first embedding (array of numbers)
        a: PathBuf,
        /// JSON file holding the second embedding
        b: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
    },
    /// Match a query embedding against a gallery file
    Match {
        /// JSON file: [{"identity": "...", "embedding": [...]}, ...]
        #[arg(short, long)]
        gallery: PathBuf,
        /// JSON file holding the query embedding
        #[arg(short, long)]
        query: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
        /// Fail instead of skipping gallery entries with the wrong length
        #[arg(long)]
        reject_mismatch: bool,
    },
    /// Convert a JSON embedding to its stored binary form
    Encode {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        big_endian: bool,
    },
    /// Print a stored binary embedding as JSON
    Decode {
        input: PathBuf,
        #[arg(long)]
        big_endian: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Distance { a, b, tolerance } => {
            let tolerance = Tolerance::new(tolerance)?;
            let d = distance(&read_embedding(&a)?, &read_embedding(&b)?)?;
            println!(
                "{}",
                json!({
                    "distance": d,
                    "tolerance": tolerance.value(),
                    "match": d <= tolerance.value(),
                })
            );
        }
        Commands::Match {
            gallery,
            query,
            tolerance,
            reject_mismatch,
        } => {
            let result = match_files(&gallery, &query, tolerance, reject_mismatch)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Encode {
            input,
            output,
            big_endian,
        } => {
            let (values, bytes) = encode_file(&input, &output, byte_order(big_endian))?;
            println!("wrote {values} values ({bytes} bytes) to {}", output.display());
        }
        Commands::Decode { input, big_endian } => {
            let embedding = decode_file(&input, byte_order(big_endian))?;
            println!("{}", serde_json::to_string(&embedding)?);
        }
    }

    Ok(())
}

fn match_files(
    gallery: &Path,
    query: &Path,
    tolerance: f64,
    reject_mismatch: bool,
) -> Result<MatchResult<String>> {
    let policy = if reject_mismatch {
        MismatchPolicy::Reject
    } else {
        MismatchPolicy::Skip
    };
    let matcher = EuclideanMatcher::new(Tolerance::new(tolerance)?).with_policy(policy);
    let gallery = read_gallery(gallery)?;
    let query = read_embedding(query)?;
    tracing::debug!(entries = gallery.len(), dim = query.len(), "matching");
    Ok(matcher.compare(&query, &gallery)?)
}

/// Returns the number of values and bytes written.
fn encode_file(input: &Path, output: &Path, order: ByteOrder) -> Result<(usize, usize)> {
    let embedding = read_embedding(input)?;
    let bytes = encode_embedding(&embedding, order);
    std::fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    Ok((embedding.len(), bytes.len()))
}

fn decode_file(input: &Path, order: ByteOrder) -> Result<Embedding> {
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    decode_embedding(&bytes, order).with_context(|| format!("decoding {}", input.display()))
}

fn byte_order(big_endian: bool) -> ByteOrder {
    if big_endian {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    }
}

fn read_embedding(path: &Path) -> Result<Embedding> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing embedding {}", path.display()))
}

fn read_gallery(path: &Path) -> Result<Vec<GalleryEntry<String>>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing gallery {}", path.display()))
}
