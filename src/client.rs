use crate::config::AvrConfig;
use crate::connection::Connection;
use crate::controller::{AvrController, DeviceState};
use crate::error::Result;
use crate::subscription::StateReceiver;
use std::net::SocketAddr;
use std::sync::Arc;

/// Client for a Pioneer AV receiver
///
/// Ties a [`Connection`] to an [`AvrController`]: the controller sends its
/// commands through the connection and receives every line the connection
/// reads. The mirrored state is refreshed right after connecting.
pub struct AvrClient {
    connection: Arc<Connection>,
    controller: Arc<AvrController>,
}

impl AvrClient {
    /// Connect to the receiver described by `config`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pioneer_avr::{AvrClient, AvrConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = AvrClient::connect(&AvrConfig::new("192.168.1.50")).await?;
    ///     client.controller().set_volume(-35.0)?;
    ///     client.close().await;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: &AvrConfig) -> Result<Self> {
        let connection = Arc::new(Connection::connect(&config.host, &config.ports).await?);
        let controller = Arc::new(AvrController::new(connection.clone()));

        connection.set_line_handler(&controller);
        controller.initialize()?;
        connection.start()?;

        Ok(Self {
            connection,
            controller,
        })
    }

    /// Protocol controller: state accessors and commands
    pub fn controller(&self) -> &AvrController {
        &self.controller
    }

    /// Get a snapshot of the mirrored device state
    pub fn state(&self) -> DeviceState {
        self.controller.snapshot()
    }

    /// Subscribe to state updates
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pioneer_avr::{AvrClient, AvrConfig, StateUpdate};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = AvrClient::connect(&AvrConfig::default()).await?;
    ///     let mut rx = client.subscribe();
    ///
    ///     while let Ok(update) = rx.recv().await {
    ///         if let StateUpdate::Disconnected(reason) = update {
    ///             println!("Receiver went away: {}", reason);
    ///             break;
    ///         }
    ///         println!("Volume: {} dB", client.controller().volume_db());
    ///     }
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> StateReceiver {
        self.controller.subscribe()
    }

    /// Address of the receiver
    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    /// Whether the link is still up
    pub fn is_connected(&self) -> bool {
        self.connection.is_running() && self.controller.is_connected()
    }

    /// Stop the I/O task and close the socket
    pub async fn close(&self) {
        self.connection.close().await;
    }
}
