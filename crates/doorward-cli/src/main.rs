use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doorward_core::controller::{TOPIC_FACE_RECOGNITION, TOPIC_LOCK, TOPIC_RFID};
use doorward_core::{Gallery, HttpAnalyzer};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

/// How long `rfid` and `verdict` wait for the broker to acknowledge.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "doorward", about = "doorward door access operator CLI")]
struct Cli {
    /// MQTT broker host
    #[arg(long, global = true, default_value = "localhost")]
    host: String,
    /// MQTT broker port
    #[arg(long, global = true, default_value_t = 1883)]
    port: u16,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a gallery directory and list the identities it yields
    Gallery {
        /// Gallery root (one subdirectory per person)
        #[arg(default_value = "./images")]
        dir: PathBuf,
        /// Base URL of the face analysis service
        #[arg(long)]
        analyzer_url: String,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Publish a tag on door/rfid, as a reader would
    Rfid {
        /// Tag identifier
        tag: String,
    },
    /// Publish a face verdict on door/face_recognition
    Verdict {
        /// "recognized" unlocks; anything else locks
        text: String,
    },
    /// Print every door topic message until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gallery {
            dir,
            analyzer_url,
            timeout,
        } => {
            // The blocking HTTP client must stay off the async workers.
            let gallery = tokio::task::spawn_blocking(move || -> Result<Gallery> {
                let mut analyzer =
                    HttpAnalyzer::new(&analyzer_url, Duration::from_secs(timeout))?;
                Ok(Gallery::load(&dir, &mut analyzer)?)
            })
            .await??;

            let names = gallery.names();
            println!("{} encodings, {} identities", gallery.len(), names.len());
            for name in names {
                println!("  {name}");
            }
        }
        Commands::Rfid { tag } => {
            publish_once(options(&cli.host, cli.port), TOPIC_RFID, &tag).await?;
            println!("{TOPIC_RFID} <- {tag}");
        }
        Commands::Verdict { text } => {
            publish_once(options(&cli.host, cli.port), TOPIC_FACE_RECOGNITION, &text).await?;
            println!("{TOPIC_FACE_RECOGNITION} <- {text}");
        }
        Commands::Watch => watch(options(&cli.host, cli.port)).await?,
    }

    Ok(())
}

fn options(host: &str, port: u16) -> MqttOptions {
    let client_id = format!("doorward-cli-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(30));
    options
}

/// Publish with QoS 1 and wait for the broker's PubAck.
async fn publish_once(options: MqttOptions, topic: &str, payload: &str) -> Result<()> {
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    client
        .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
        .await?;

    let acked = async {
        loop {
            if let Event::Incoming(Packet::PubAck(_)) = eventloop.poll().await? {
                return Ok::<_, rumqttc::ConnectionError>(());
            }
        }
    };
    tokio::time::timeout(ACK_TIMEOUT, acked)
        .await
        .context("timed out waiting for broker acknowledgement")?
        .with_context(|| format!("publish to {topic} failed"))?;
    tracing::debug!(topic, payload, "acknowledged");
    Ok(())
}

async fn watch(options: MqttOptions) -> Result<()> {
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    for topic in [TOPIC_RFID, TOPIC_FACE_RECOGNITION, TOPIC_LOCK] {
                        client.try_subscribe(topic, QoS::AtLeastOnce)?;
                    }
                    tracing::info!("watching door topics");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    println!("{} {}", publish.topic, String::from_utf8_lossy(&publish.payload));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "broker connection error; retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
        }
    }
    Ok(())
}
