use clap::{Parser, Subcommand};

use crate::config::TranscriptionEngine;

#[derive(Parser)]
#[command(
    name = "contribute",
    about = "Transcript Contributor - Transcribe a talk and open a pull request against a transcript repository",
    version,
    long_about = "Transcribes a YouTube video or audio file, renders it as markdown with front matter and opens (or reuses) a pull request on GitHub. Re-running the same contribution reuses the existing fork, branch and pull request."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe a source and contribute it to the transcript repository
    Add {
        /// YouTube video id, URL or playlist, an http(s) URL of an audio file, or a local media file
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Directory in the transcript repository, e.g. bitcoin-core-dev-tech/2024
        #[arg(value_name = "LOC")]
        loc: String,

        /// Title of the talk (required for audio URLs and local files)
        #[arg(short, long)]
        title: Option<String>,

        /// Event date as YYYY-MM-DD
        #[arg(short, long, value_name = "DATE")]
        date: Option<String>,

        /// Comma-separated tags
        #[arg(short = 'T', long)]
        tags: Option<String>,

        /// Comma-separated speaker names
        #[arg(short, long)]
        speakers: Option<String>,

        /// Comma-separated categories
        #[arg(short, long)]
        category: Option<String>,

        /// Add chapter headings from the video's chapter markers
        #[arg(long)]
        chapters: bool,

        /// Transcription engine (defaults to the configured engine)
        #[arg(short, long, value_enum)]
        engine: Option<TranscriptionEngine>,

        /// Whisper model to use with the whisper engine
        #[arg(short, long)]
        model: Option<String>,

        /// Language code for transcription (auto-detect if not specified)
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,
    },

    /// Show or locate the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },

    /// List supported source kinds
    Sources,
}
