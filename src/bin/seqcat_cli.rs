use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use seqcat::format::{convert_to_fasta, detect_format, SequenceFormat};
use seqcat::taxonomy::BlastSearch;
use seqcat::{run_pipeline, PipelineConfig};

#[derive(Parser)]
#[command(author, version, about = "Amplicon read QC, deduplication, taxonomy and abundance matrices", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a file or directory of samples
    Run {
        /// Input file, directory of files, or directory with one
        /// subdirectory per sample
        input: PathBuf,

        /// Working area for raw copies, cleaned records, catalog and matrix
        #[arg(short = 'o', long = "output", default_value = "assets")]
        output: PathBuf,

        /// BLAST nucleotide database used for taxonomy annotation
        #[arg(long = "blast-db")]
        blast_db: PathBuf,

        /// Candidate quality cutoffs (comma separated, tie-break order)
        #[arg(long, value_delimiter = ',', default_values_t = [10u32, 15, 20, 30])]
        thresholds: Vec<u32>,

        /// Re-scan compressed FASTQ input for the 4-line record-count check
        #[arg(long)]
        verify_compressed: bool,
    },

    /// Validate a single sequence file and report its format
    Check {
        file: PathBuf,

        /// Also verify the record count of compressed FASTQ input
        #[arg(long)]
        verify_compressed: bool,
    },

    /// Convert a FASTA/FASTQ file into FASTA under an output directory
    Convert {
        file: PathBuf,

        /// Directory for the converted file
        #[arg(short = 'o', long = "output", default_value = "fasta")]
        output: PathBuf,

        /// Also verify the record count of compressed FASTQ input
        #[arg(long)]
        verify_compressed: bool,
    },
}

fn spinner(msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ])
            .template("{spinner:.green} {msg}")
            .expect("Invalid spinner template"),
    );
    spinner.set_message(msg.to_string());
    spinner
}

fn run(
    input: PathBuf,
    output: PathBuf,
    blast_db: PathBuf,
    thresholds: Vec<u32>,
    verify_compressed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let search = BlastSearch::new(blast_db);
    search.preflight()?;

    let mut config = PipelineConfig::new(input, output);
    config.thresholds = thresholds;
    config.verify_compressed_records = verify_compressed;

    let sp = spinner("Cleaning, deduplicating and annotating reads...");
    let summary = run_pipeline(&config, &search)?;
    sp.finish_with_message("Pipeline finished.");

    for stats in &summary.sample_stats {
        println!(
            "{}: {} read(s) in, {} kept, mean length {:.1}, GC {:.1}%",
            stats.sample, stats.reads_in, stats.reads_kept, stats.mean_length, stats.gc_percent
        );
    }
    println!(
        "{} cleaned record(s), {} unique sequence(s), {} annotated",
        summary.cleaned_records, summary.aggregate.unique_found, summary.annotate.artifacts_rewritten
    );
    println!(
        "Abundance matrix: {} row(s) x {} sample(s) -> {}",
        summary.matrix.rows.len(),
        summary.matrix.sample_names.len(),
        summary.matrix_path.display()
    );
    Ok(())
}

fn check(file: PathBuf, verify_compressed: bool) -> Result<(), Box<dyn std::error::Error>> {
    match detect_format(&file, verify_compressed)? {
        SequenceFormat::Fasta => println!("{}: FASTA", file.display()),
        SequenceFormat::Fastq { verified: true } => println!("{}: FASTQ", file.display()),
        SequenceFormat::Fastq { verified: false } => {
            println!("{}: FASTQ (record count not verified)", file.display())
        }
    }
    Ok(())
}

fn convert(
    file: PathBuf,
    output: PathBuf,
    verify_compressed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let out = convert_to_fasta(&file, &output, verify_compressed)?;
    println!("{} -> {}", file.display(), out.display());
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        Commands::Run {
            input,
            output,
            blast_db,
            thresholds,
            verify_compressed,
        } => run(input, output, blast_db, thresholds, verify_compressed),
        Commands::Check {
            file,
            verify_compressed,
        } => check(file, verify_compressed),
        Commands::Convert {
            file,
            output,
            verify_compressed,
        } => convert(file, output, verify_compressed),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
