use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lantern_companion::audio::{AudioCapture, playback};
use lantern_companion::{BackendSet, Config, JoinTarget, SessionController, WakePolicy};

/// Lantern - Voice companion for live gaming sessions
#[derive(Parser)]
#[command(name = "lantern", version, about)]
struct Cli {
    /// Persona to use (e.g. "sri")
    #[arg(short, long, env = "LANTERN_PERSONA")]
    persona: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis end to end
    TestTts {
        /// Text to speak
        #[arg(default_value = "Halo! Ini tes suara dari Lantern.")]
        text: String,
    },
    /// Interactive first-run setup
    Setup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,lantern_companion=info",
        1 => "info,lantern_companion=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let persona_ref = cli.persona.as_deref();

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(persona_ref, &text).await,
            Command::Setup => lantern_companion::setup::run_setup(),
        };
    }

    // Load configuration
    let config = Config::load(persona_ref)?;
    let persona_name = config.persona.name().to_string();
    let wake_name = config.persona.primary_wake_name().to_string();

    tracing::info!(persona = %persona_name, "starting lantern");

    let backends = BackendSet::from_config(&config)?;
    let controller = SessionController::spawn(config, backends);

    controller
        .join(JoinTarget::Microphone, WakePolicy::Gated)
        .await?;
    tracing::info!("lantern ready - say \"{wake_name}\"");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    controller.shutdown().await;

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working.");
    println!("If RMS stayed near 0, check your default input device:");
    println!("  pactl info | grep 'Default Source'");
    println!("  arecord -l");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440 Hz tone for 2 seconds\n");

    let sample_rate = playback::PLAYBACK_SAMPLE_RATE;
    let frequency = 440.0_f32;
    let num_samples = (sample_rate * 2) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    playback::play_samples(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working.");
    println!("If not, check your default output device:");
    println!("  pactl info | grep 'Default Sink'");

    Ok(())
}

/// Test speech synthesis through the configured provider chain
async fn test_tts(persona: Option<&str>, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load(persona)?;
    let backends = BackendSet::from_config(&config)?;

    println!("Synthesizing speech...");
    let mp3_data = backends.tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    playback::play_mp3(mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working.");

    Ok(())
}
