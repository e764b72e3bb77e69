use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hearth::pipeline::{AudioSink, Clip, Tone};
use hearth::schedule::parse::{describe_time, parse_recurrence, parse_time_of_day, parse_when};
use hearth::schedule::rules::default_time;
use hearth::schedule::{Clock, SystemClock, next_fire};
use hearth::shortcuts::ShortcutRouter;
use hearth::voice::{AudioCapture, SpeakerSink};
use hearth::{Config, Daemon};

/// Hearth - on-device voice assistant with alarms, timers and reminders
#[derive(Parser)]
#[command(name = "hearth", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable the voice pipeline (schedules and API only)
    #[arg(long, env = "HEARTH_DISABLE_VOICE")]
    disable_voice: bool,

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
    /// Print the next fire instant of a recurrence rule
    NextFire {
        /// Rule such as "daily", "weekdays", "mon,wed,fri"
        rule: String,
        /// Time of day the rule fires at
        #[arg(short, long)]
        time: Option<String>,
        /// Reference instant instead of now
        #[arg(long)]
        at: Option<String>,
    },
    /// Print the shortcut a transcript would trigger
    Route {
        /// Transcript text
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,hearth=info",
        1 => "info,hearth=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::NextFire { rule, time, at } => {
                next_fire_cmd(&rule, time.as_deref(), at.as_deref())
            }
            Command::Route { text } => {
                route_cmd(&text.join(" "));
                Ok(())
            }
        };
    }

    let mut config = Config::load()?;
    if cli.disable_voice {
        config.voice.enabled = false;
    }
    tracing::debug!(?config, "loaded configuration");

    Daemon::new(config).run().await?;
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let capture = AudioCapture::open()?;
    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with both earcons
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear the listening tone, then the error tone\n");

    let sink = SpeakerSink::open()?;
    sink.play(Clip::Tone(Tone::Listening)).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;
    sink.play(Clip::Tone(Tone::Error)).await?;

    println!("\n---");
    println!("If you heard both tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

fn next_fire_cmd(rule: &str, time: Option<&str>, at: Option<&str>) -> anyhow::Result<()> {
    let now = SystemClock.now();
    let now = at.map_or(Ok(now), |at| parse_when(at, now))?;
    let rule = parse_recurrence(rule)?;
    let time = time.map_or(Ok(default_time()), parse_time_of_day)?;

    let fire = next_fire(&rule, now.date().and_time(time), now);
    println!(
        "{} ({} at {})",
        fire.format("%Y-%m-%d %H:%M"),
        rule.describe(),
        describe_time(time)
    );
    Ok(())
}

fn route_cmd(text: &str) {
    let now = SystemClock.now();
    match ShortcutRouter::new().classify(text, now) {
        Some(intent) => println!("{}: {intent:?}", intent.name()),
        None => println!("no shortcut; falls through to the remote reply"),
    }
}
