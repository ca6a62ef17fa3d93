//! coach-audio - speech output and capture for interview practice
//!
//! Run with `coach-audio` or `coach-audio diagnose` to check the audio setup.
//! Use `coach-audio say <text>` to speak and `coach-audio listen` to
//! transcribe one phrase.

use clap::Parser;
use coach_audio::config::{self, Config};
use coach_audio::{AudioCoordinator, Cli, Commands, TranscriptionOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often `converse` checks for new transcripts
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("coach_audio={},warn", log_level))),
        )
        .with_target(false)
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(device) = cli.device {
        config.capture.device = device;
    }
    if let Some(endpoint) = cli.endpoint {
        config.recognition.endpoint = Some(endpoint);
    }

    match cli.command.unwrap_or(Commands::Diagnose) {
        Commands::Diagnose => {
            let coordinator = start(config).await?;
            println!("Running audio diagnostics. Say something after the test phrase.\n");
            let report = {
                let coordinator = coordinator.clone();
                tokio::task::spawn_blocking(move || coordinator.run_diagnostics()).await?
            };
            println!("{}", report);
            coordinator.shutdown();
            if !report.all_passed() {
                std::process::exit(1);
            }
        }

        Commands::Say {
            text,
            priority,
            wait,
        } => {
            let coordinator = start(config).await?;
            let text = text.join(" ");
            if !coordinator.speak(&text, priority) {
                anyhow::bail!("Nothing to say");
            }
            let finished = {
                let coordinator = coordinator.clone();
                let wait = config::secs(wait);
                tokio::task::spawn_blocking(move || coordinator.wait_for_speech_completion(wait))
                    .await?
            };
            if !finished {
                tracing::warn!("Speech did not finish within {:.1}s", wait);
            }
            coordinator.shutdown();
        }

        Commands::Listen {
            timeout,
            phrase_limit,
        } => {
            let timeout = config::secs(timeout.unwrap_or(config.capture.listen_timeout_secs));
            let phrase_limit =
                config::secs(phrase_limit.unwrap_or(config.capture.phrase_limit_secs));
            let phrase_limit = (!phrase_limit.is_zero()).then_some(phrase_limit);

            let coordinator = start(config).await?;
            println!("Listening...");
            let outcome = {
                let coordinator = coordinator.clone();
                tokio::task::spawn_blocking(move || coordinator.listen_once(timeout, phrase_limit))
                    .await?
            };
            coordinator.shutdown();

            match outcome {
                TranscriptionOutcome::Transcript(result) => println!("{}", result.text),
                other => {
                    eprintln!("No transcript: {}", other);
                    std::process::exit(1);
                }
            }
        }

        Commands::Converse { prompt, echo } => {
            let coordinator = start(config).await?;
            run_conversation(coordinator, prompt, echo).await?;
        }

        Commands::Config => {
            show_config(&config);
        }

        Commands::ConfigInit { force, effective } => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::default_path()
                    .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?,
            };
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if effective {
                config::save_config(&config, &path)?;
                println!("Wrote current configuration to {}", path.display());
            } else {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, config::DEFAULT_CONFIG)?;
                println!("Wrote default config to {}", path.display());
            }
        }
    }

    Ok(())
}

/// Probe the audio system; the probe blocks during calibration
async fn start(config: Config) -> anyhow::Result<Arc<AudioCoordinator>> {
    let coordinator =
        tokio::task::spawn_blocking(move || Arc::new(AudioCoordinator::new(&config))).await?;

    if let Some(reason) = coordinator.probe_failure() {
        anyhow::bail!("Audio unavailable: {}", reason);
    }
    Ok(coordinator)
}

/// Speak the prompt, then print transcripts until Ctrl+C
async fn run_conversation(
    coordinator: Arc<AudioCoordinator>,
    prompt: Option<String>,
    echo: bool,
) -> anyhow::Result<()> {
    if let Some(prompt) = prompt {
        coordinator.speak(&prompt, true);
        let waiter = coordinator.clone();
        tokio::task::spawn_blocking(move || {
            waiter.wait_for_speech_completion(Duration::from_secs(60))
        })
        .await?;
    }

    if !coordinator.start_continuous_listening() {
        anyhow::bail!("Could not start listening");
    }
    println!("Listening. Press Ctrl+C to stop.");

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Received Ctrl+C, stopping");
                break;
            }
            _ = interval.tick() => {
                while let Some(result) = coordinator.poll_transcript() {
                    println!(
                        "[{}] {}",
                        result.captured_at.format("%H:%M:%S"),
                        result.text
                    );
                    if echo {
                        coordinator.speak(&format!("You said: {}", result.text), true);
                    }
                }
            }
        }
    }

    coordinator.stop_continuous_listening();
    coordinator.shutdown();
    Ok(())
}

/// Display the effective configuration
fn show_config(config: &Config) {
    println!("Current Configuration\n");
    println!("=====================\n");

    if let Some(path) = Config::default_path() {
        println!("Default config file: {}\n", path.display());
    }

    println!("[synthesis]");
    println!("  command = {:?}", config.synthesis.command);
    println!("  preferred_voices = {:?}", config.synthesis.preferred_voices);
    println!("  rate = {}", config.synthesis.rate);
    println!("  volume = {}", config.synthesis.volume);
    if let Some(pitch) = config.synthesis.pitch {
        println!("  pitch = {}", pitch);
    }
    println!(
        "  post_utterance_gap_ms = {}",
        config.synthesis.post_utterance_gap_ms
    );

    println!("\n[capture]");
    println!("  device = {:?}", config.capture.device);
    println!("  preferred_devices = {:?}", config.capture.preferred_devices);
    println!("  sample_rate = {}", config.capture.sample_rate);
    println!("  calibration_secs = {}", config.capture.calibration_secs);
    println!("  energy_threshold = {}", config.capture.energy_threshold);
    println!(
        "  dynamic_energy_threshold = {}",
        config.capture.dynamic_energy_threshold
    );
    println!("  pause_threshold_secs = {}", config.capture.pause_threshold_secs);
    println!("  listen_timeout_secs = {}", config.capture.listen_timeout_secs);
    println!("  phrase_limit_secs = {}", config.capture.phrase_limit_secs);

    println!("\n[listener]");
    println!("  timeout_secs = {}", config.listener.timeout_secs);
    println!("  phrase_limit_secs = {}", config.listener.phrase_limit_secs);
    println!("  idle_backoff_ms = {}", config.listener.idle_backoff_ms);
    println!("  error_backoff_ms = {}", config.listener.error_backoff_ms);
    match config.listener.max_buffered {
        Some(max) => println!("  max_buffered = {}", max),
        None => println!("  max_buffered = (unbounded)"),
    }

    println!("\n[recognition]");
    match config.recognition.endpoint {
        Some(ref endpoint) => println!("  endpoint = {:?}", endpoint),
        None => println!("  endpoint = (not set)"),
    }
    println!("  model = {:?}", config.recognition.model);
    println!(
        "  api_key = {}",
        if config.recognition.api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("  timeout_secs = {}", config.recognition.timeout_secs);
    println!("  locales = {:?}", config.recognition.locales);
}
