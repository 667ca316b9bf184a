use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipforge")]
#[command(author, version, about = "Compose media from natural-language instructions")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate, validate and run an ffmpeg command for the given assets
    Compose {
        /// Input media files (images, audio, video)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// What to do with the assets
        #[arg(short, long)]
        prompt: String,

        /// Backend model to use (defaults to backend.default_model)
        #[arg(short, long)]
        model: Option<String>,

        /// Nucleus sampling, 0 to 1
        #[arg(long)]
        top_p: Option<f32>,

        /// Sampling temperature, 0 to 5
        #[arg(long)]
        temperature: Option<f32>,

        /// Maximum synthesize/validate/execute attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Directory the finished artifact is moved to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Leave attempt sandboxes on disk
        #[arg(long)]
        keep_sandbox: bool,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe media files and display the asset descriptions
    Probe {
        /// Files to probe
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Dry-run a command against the given assets without running it
    Validate {
        /// Command text, e.g. "ffmpeg -i bg.png -vf scale=640:-1 output.mp4"
        #[arg(long)]
        command: String,

        /// Input media files staged into the sandbox
        files: Vec<PathBuf>,
    },

    /// Display version information
    Version,
}
