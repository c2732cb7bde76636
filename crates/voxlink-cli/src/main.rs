use anyhow::{bail, Context};
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use voxlink_http::{AudioUpload, ChatTransportClient, ClientConfig, NetworkStatus};

#[derive(Parser)]
#[command(name = "voxlink")]
#[command(about = "Talk to the voxlink assistant backend")]
struct Cli {
    /// Backend base URL; overrides VOXLINK_API_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a chat message and print the reply.
    Chat {
        message: String,
        /// Ask for a spoken reply as well.
        #[arg(long)]
        tts: bool,
        /// Where to write the spoken reply.
        #[arg(long, requires = "tts")]
        save_audio: Option<PathBuf>,
    },
    /// Transcribe a recorded audio file.
    Transcribe {
        file: PathBuf,
        #[arg(long, default_value = "audio/webm")]
        mime_type: String,
    },
    /// Probe the backend and print the connectivity status.
    Status {
        /// Keep watching and print every change.
        #[arg(long)]
        watch: bool,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "voxlink=info,voxlink_http=info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_status(status: &NetworkStatus) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Could not render status: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("invalid VOXLINK_* configuration")?;
    if let Some(url) = cli.api_url {
        config = config.with_base_url(url);
    }
    info!("Backend: {}", config.base_url);

    let client = ChatTransportClient::with_config(config)?;
    client.start();
    client.force_check().await;

    let outcome = run(&client, cli.command).await;
    client.shutdown();
    outcome
}

async fn run(client: &ChatTransportClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Chat {
            message,
            tts,
            save_audio,
        } => {
            let reply = client.send_chat_message(&message, tts).await?;
            println!("{}", reply.text);

            if let Some(path) = save_audio {
                let Some(audio) = reply.audio.as_deref() else {
                    bail!("the backend answered without audio");
                };
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(audio)
                    .context("reply audio is not valid base64")?;
                tokio::fs::write(&path, &bytes)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                let format = reply.audio_format.unwrap_or_default();
                info!("Saved {} bytes of {} to {}", bytes.len(), format.extension(), path.display());
            }
        }
        Command::Transcribe { file, mime_type } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let text = client
                .speech_to_text(AudioUpload::new(bytes, mime_type))
                .await?;
            println!("{}", text);
        }
        Command::Status { watch } => {
            if !watch {
                print_status(&client.status());
                return Ok(());
            }
            let subscription = client.subscribe_status(print_status);
            tokio::signal::ctrl_c().await?;
            subscription.unsubscribe();
        }
    }
    Ok(())
}
