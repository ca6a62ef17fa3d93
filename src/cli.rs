// Command-line interface definitions for coach-audio
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coach-audio")]
#[command(author, version, about = "Speech output and capture for voice-driven interview practice")]
#[command(long_about = "
coach-audio drives the speech side of an interview practice session:
it reads questions aloud and listens for spoken answers.

SETUP:
  1. Install espeak-ng (speech output)
  2. Run a whisper.cpp server or another OpenAI-compatible endpoint
  3. Run: coach-audio config-init (writes a default config file)
  4. Run: coach-audio diagnose (checks speakers, microphone, recognition)

USAGE:
  coach-audio say \"Tell me about yourself\"
  coach-audio listen
  coach-audio converse (speak a prompt, then print everything heard)
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override capture device (name, substring, "auto" or "default")
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Override recognition endpoint (e.g., http://localhost:8080)
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check speech output, microphone, and recognition (default)
    Diagnose,

    /// Speak text aloud
    Say {
        /// Text to speak
        #[arg(required = true)]
        text: Vec<String>,

        /// Discard anything still waiting to be spoken first
        #[arg(long)]
        priority: bool,

        /// Seconds to wait for speech to finish before exiting
        #[arg(long, value_name = "SECS", default_value_t = 30.0)]
        wait: f32,
    },

    /// Listen for one phrase and print the transcript
    Listen {
        /// Seconds to wait for speech to start
        #[arg(long, value_name = "SECS")]
        timeout: Option<f32>,

        /// Maximum phrase length in seconds
        #[arg(long, value_name = "SECS")]
        phrase_limit: Option<f32>,
    },

    /// Speak an optional prompt, then print transcripts until Ctrl+C
    Converse {
        /// Prompt to speak before listening
        prompt: Option<String>,

        /// Read each transcript back aloud
        #[arg(long)]
        echo: bool,
    },

    /// Show the effective configuration
    Config,

    /// Write a default config file
    ConfigInit {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Write the effective settings (file, environment, and flags)
        /// instead of the commented template
        #[arg(long)]
        effective: bool,
    },
}
