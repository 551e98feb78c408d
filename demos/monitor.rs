//! Connects to the receiver and logs every state change until Ctrl-C.
//!
//! ```text
//! AVR_HOST=192.168.1.50 RUST_LOG=pioneer_avr=debug cargo run --example monitor
//! ```

use pioneer_avr::{load_config, AvrClient, MessageKind, StateUpdate};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pioneer_avr=info,monitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!("Looking for receiver at {} on ports {:?}", config.host, config.ports);

    let client = AvrClient::connect(&config).await?;
    let mut updates = client.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => {
                let state = client.state();
                match update? {
                    StateUpdate::Changed(MessageKind::Power) => {
                        tracing::info!("power {}", if state.power { "on" } else { "off" });
                    }
                    StateUpdate::Changed(MessageKind::Volume) => {
                        tracing::info!("volume {:.1} dB", state.volume_db());
                    }
                    StateUpdate::Changed(MessageKind::ActiveInput) => {
                        tracing::info!("input {}", state.active_input_name().unwrap_or("?"));
                    }
                    StateUpdate::Changed(MessageKind::InputName) => {}
                    StateUpdate::Changed(MessageKind::SpeakerConfig) => {
                        tracing::info!("speakers {}", state.speaker_config);
                    }
                    StateUpdate::Changed(MessageKind::DisplayText) => {
                        tracing::info!("display {:?}", state.display_text);
                    }
                    StateUpdate::Disconnected(reason) => {
                        tracing::error!("receiver unreachable: {}", reason);
                        break;
                    }
                }
            }
        }
    }

    client.close().await;
    Ok(())
}
