use anyhow::{Context, Result};
use clap::Parser;
use parley_core::{
    AudioSink, CredentialPool, ResponseMode, SessionConfig, SessionCore, SessionError,
    SessionEvent, SessionHandle, SessionState, Voice,
};
use parley_service::audio_devices::{CpalCapture, CpalSink, MutedSink};
use parley_service::config::Config;
use parley_service::gemini_adapter::{GeminiFactory, GeminiSettings};
use secrecy::ExposeSecret;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Talk to a Gemini Live model from the terminal")]
struct Cli {
    /// Prebuilt voice for spoken replies
    #[arg(long)]
    voice: Option<Voice>,
    /// Reply as AUDIO or TEXT
    #[arg(long)]
    response_mode: Option<ResponseMode>,
    /// System instruction sent with every connection
    #[arg(long)]
    instruction: Option<String>,
    /// Capture device name (see --list-devices)
    #[arg(long)]
    input_device: Option<String>,
    /// Playback device name (see --list-devices)
    #[arg(long)]
    output_device: Option<String>,
    /// Print the audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    if args.list_devices {
        println!("Input devices:\n{}", parley_native_utils::device::get_available_inputs()?);
        println!("Output devices:\n{}", parley_native_utils::device::get_available_outputs()?);
        return Ok(());
    }

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    let filter = EnvFilter::new(format!(
        "{},tungstenite=warn,tokio_tungstenite=warn",
        config.log_level.as_str().to_lowercase()
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(keys = config.api_keys.len(), model = %config.model, "Configuration loaded");

    // --- 3. Credentials and transport ---
    let mut pool = CredentialPool::new(config.api_keys.iter().map(|k| k.expose_secret().to_string()));
    if config.shuffle_keys {
        pool = pool.shuffled();
    }
    let factory = GeminiFactory::new(GeminiSettings {
        model: config.model.clone(),
        ..GeminiSettings::default()
    });

    // --- 4. Audio devices ---
    let capture = CpalCapture::new(args.input_device.clone());
    // Without an output device the session still runs; replies are not played.
    let sink: Box<dyn AudioSink> = match CpalSink::open(args.output_device.as_deref()) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            tracing::warn!("Audio output unavailable: {e:#}");
            Box::new(MutedSink::new(SessionError::Device(format!(
                "audio output unavailable: {e:#}"
            ))))
        }
    };

    // --- 5. Session ---
    let session_config = SessionConfig::builder()
        .with_voice(args.voice.unwrap_or(config.voice))
        .with_response_mode(args.response_mode.unwrap_or(config.response_mode))
        .with_system_instruction(args.instruction.unwrap_or(config.system_instruction))
        .build();
    tracing::info!(
        voice = %session_config.voice(),
        mode = %session_config.response_mode(),
        "Starting session"
    );

    let (session, events) = SessionCore::new(
        Arc::new(pool),
        Arc::new(factory),
        Box::new(capture),
        sink,
    )
    .start(session_config);

    let printer = tokio::spawn(print_events(events));

    println!("Speak, or type a message. /interrupt cuts the reply short, /quit exits.");
    run_console(&session).await?;

    session.stop().await;
    if let Err(e) = printer.await {
        tracing::warn!("Event printer ended abnormally: {e}");
    }

    let stats = serde_json::to_string_pretty(&session.stats()).context("Failed to encode stats")?;
    println!("{stats}");
    Ok(())
}

/// Reads commands from stdin until `/quit`, Ctrl-C, end of input or the
/// session stopping on its own.
async fn run_console(session: &SessionHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut states = session.state_changes();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            _ = states.wait_for(|s| *s == SessionState::Stopped) => {
                tracing::info!("Session stopped");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/interrupt" => {
                        if let Err(e) = session.interrupt() {
                            tracing::warn!("Interrupt failed: {e}");
                        }
                    }
                    text => {
                        if let Err(e) = session.send_text(text) {
                            tracing::warn!("Could not send text: {e}");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event printer lagged, skipped {n} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            SessionEvent::StateChanged(state) => tracing::info!("Session state: {state:?}"),
            SessionEvent::Transcript(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            SessionEvent::TurnComplete => println!(),
            SessionEvent::Interrupted => println!(" [interrupted]"),
            SessionEvent::Recovering(e) => tracing::warn!("Recovering: {e}"),
            SessionEvent::DeviceError(e) => tracing::error!("Audio device error: {e}"),
            SessionEvent::Fatal(e) => tracing::error!("Session failed: {e}"),
            SessionEvent::Audio(_) => {}
        }
    }
}
