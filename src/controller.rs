use crate::connection::{CommandSink, LineHandler};
use crate::error::{AvrError, Result};
use crate::protocol::{Command, Message, MessageKind};
use crate::subscription::{StateReceiver, StateUpdate};
use crate::types::{
    code_to_db, db_to_code, ChannelId, Decibels, InputName, SetOutcome, SpeakerConfig,
    VolumeCode, INPUT_CHANNELS, MAX_TEXT_LEN,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Mirror of the receiver's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    /// Whether the receiver is on
    pub power: bool,

    /// Last raw volume code reported
    pub volume_code: VolumeCode,

    /// Selected input channel
    pub active_input: ChannelId,

    /// Input table in query order. Channels are fixed; only names change.
    pub input_names: Vec<InputName>,

    /// Speaker outputs
    pub speaker_config: SpeakerConfig,

    /// Front panel text
    pub display_text: String,

    /// False once the link to the receiver has failed
    pub connected: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            power: false,
            volume_code: db_to_code(-50.0),
            active_input: 4,
            input_names: INPUT_CHANNELS
                .iter()
                .map(|&channel| InputName {
                    channel,
                    name: channel.to_string(),
                })
                .collect(),
            speaker_config: SpeakerConfig::A,
            display_text: "Off".to_string(),
            connected: true,
        }
    }
}

impl DeviceState {
    /// Volume in dB
    pub fn volume_db(&self) -> Decibels {
        code_to_db(self.volume_code)
    }

    /// Whether `channel` is part of the input table
    pub fn has_input(&self, channel: ChannelId) -> bool {
        self.input_names.iter().any(|input| input.channel == channel)
    }

    /// Display name of `channel`
    pub fn input_name(&self, channel: ChannelId) -> Option<&str> {
        self.input_names
            .iter()
            .find(|input| input.channel == channel)
            .map(|input| input.name.as_str())
    }

    /// Display name of the selected input
    pub fn active_input_name(&self) -> Option<&str> {
        self.input_name(self.active_input)
    }

    fn input_name_mut(&mut self, channel: ChannelId) -> Option<&mut String> {
        self.input_names
            .iter_mut()
            .find(|input| input.channel == channel)
            .map(|input| &mut input.name)
    }

    /// Apply a decoded status line
    fn apply(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Volume(code) => {
                self.volume_code = code;
                tracing::debug!("Volume is {} dB", self.volume_db());
            }
            Message::Power(on) => {
                self.power = on;
                tracing::info!("Power is {}", if on { "on" } else { "off" });
            }
            Message::InputName { channel, name } => {
                let slot = self
                    .input_name_mut(channel)
                    .ok_or(AvrError::UnknownInput(channel))?;
                tracing::debug!("Name of channel {} is {:?}", channel, name);
                *slot = name;
            }
            Message::ActiveInput(channel) => {
                if !self.has_input(channel) {
                    return Err(AvrError::UnknownInput(channel));
                }
                self.active_input = channel;
                tracing::debug!(
                    "Active input is {} ({})",
                    self.active_input_name().unwrap_or_default(),
                    channel
                );
            }
            Message::SpeakerConfig(config) => {
                self.speaker_config = config;
                tracing::debug!("Speaker configuration is {}", config);
            }
            Message::DisplayText(text) => {
                tracing::debug!("Display text: {:?}", text);
                self.display_text = text;
            }
        }
        Ok(())
    }
}

/// Protocol controller for one receiver
///
/// Encodes commands, decodes status lines into [`DeviceState`], and
/// broadcasts a [`StateUpdate`] after every applied line. State is only
/// written from [`parse_message`](AvrController::parse_message); readers get
/// snapshots.
///
/// Setters check the mirrored state first: while the receiver is off every
/// setter except power returns [`SetOutcome::RejectedPowerOff`], and a
/// request for the current value returns [`SetOutcome::AlreadyCurrent`].
/// Neither sends anything. The mirror is not updated optimistically; it
/// changes when the receiver reports the new value.
pub struct AvrController {
    sink: Arc<dyn CommandSink>,
    state: Mutex<DeviceState>,
    update_tx: broadcast::Sender<StateUpdate>,
}

impl AvrController {
    /// Create a controller that sends its commands to `sink`
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        let (update_tx, _) = broadcast::channel(100);
        Self {
            sink,
            state: Mutex::new(DeviceState::default()),
            update_tx,
        }
    }

    /// Subscribe to state updates
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.update_tx.subscribe())
    }

    /// Get a snapshot of the complete device state
    pub fn snapshot(&self) -> DeviceState {
        self.state.lock().unwrap().clone()
    }

    /// Whether the receiver is on
    pub fn power(&self) -> bool {
        self.state.lock().unwrap().power
    }

    /// Volume in dB
    pub fn volume_db(&self) -> Decibels {
        self.state.lock().unwrap().volume_db()
    }

    /// Selected input channel
    pub fn active_input(&self) -> ChannelId {
        self.state.lock().unwrap().active_input
    }

    /// Input table, in query order
    pub fn input_names(&self) -> Vec<InputName> {
        self.state.lock().unwrap().input_names.clone()
    }

    /// Display name of one channel
    pub fn input_name(&self, channel: ChannelId) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .input_name(channel)
            .map(str::to_string)
    }

    /// Speaker outputs
    pub fn speaker_config(&self) -> SpeakerConfig {
        self.state.lock().unwrap().speaker_config
    }

    /// Front panel text
    pub fn display_text(&self) -> String {
        self.state.lock().unwrap().display_text.clone()
    }

    /// Whether the link to the receiver is still up
    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    // ========== Startup ==========

    /// Query everything the mirror tracks
    ///
    /// Sends the power, volume, input and speaker queries, then one name query
    /// per channel. Answers are applied as they arrive.
    pub fn initialize(&self) -> Result<()> {
        self.query_power()?;
        self.query_volume()?;
        self.query_active_input()?;
        self.query_speaker_config()?;
        self.query_input_names()
    }

    // ========== Queries ==========

    pub fn query_power(&self) -> Result<()> {
        self.send(Command::QueryPower)
    }

    pub fn query_volume(&self) -> Result<()> {
        self.send(Command::QueryVolume)
    }

    pub fn query_active_input(&self) -> Result<()> {
        self.send(Command::QueryActiveInput)
    }

    pub fn query_input_name(&self, channel: ChannelId) -> Result<()> {
        self.send(Command::QueryInputName(channel))
    }

    /// Query the name of every channel in the input table
    pub fn query_input_names(&self) -> Result<()> {
        let channels: Vec<ChannelId> = self
            .state
            .lock()
            .unwrap()
            .input_names
            .iter()
            .map(|input| input.channel)
            .collect();
        for channel in channels {
            self.query_input_name(channel)?;
        }
        Ok(())
    }

    pub fn query_speaker_config(&self) -> Result<()> {
        self.send(Command::QuerySpeakerConfig)
    }

    pub fn query_display_text(&self) -> Result<()> {
        self.send(Command::QueryDisplayText)
    }

    // ========== Power ==========

    /// Request power on or off
    ///
    /// The protocol only has a toggle command, so this sends a toggle when
    /// `on` differs from the last reported state. It cannot guarantee the
    /// final state if the mirror is stale; watch for the `PWR` update.
    pub fn set_power(&self, on: bool) -> Result<SetOutcome> {
        if self.power() == on {
            return Ok(SetOutcome::AlreadyCurrent);
        }
        self.send(Command::TogglePower)?;
        Ok(SetOutcome::Applied)
    }

    /// Toggle power regardless of the mirrored state
    pub fn toggle_power(&self) -> Result<()> {
        self.send(Command::TogglePower)
    }

    // ========== Volume ==========

    /// Set the volume in dB
    ///
    /// Rounded to the nearest 0.5 dB step and clamped to the settable range.
    pub fn set_volume(&self, db: Decibels) -> Result<SetOutcome> {
        let code = db_to_code(db);
        {
            let state = self.state.lock().unwrap();
            if !state.power {
                return Ok(SetOutcome::RejectedPowerOff);
            }
            if state.volume_code == code {
                return Ok(SetOutcome::AlreadyCurrent);
            }
        }
        self.send(Command::SetVolume(code))?;
        Ok(SetOutcome::Applied)
    }

    /// Raise the volume by one step
    pub fn volume_up(&self) -> Result<SetOutcome> {
        self.gated(Command::VolumeUp)
    }

    /// Lower the volume by one step
    pub fn volume_down(&self) -> Result<SetOutcome> {
        self.gated(Command::VolumeDown)
    }

    // ========== Inputs ==========

    /// Select an input channel
    pub fn set_active_input(&self, channel: ChannelId) -> Result<SetOutcome> {
        {
            let state = self.state.lock().unwrap();
            if !state.has_input(channel) {
                return Err(AvrError::UnknownInput(channel));
            }
            if !state.power {
                return Ok(SetOutcome::RejectedPowerOff);
            }
            if state.active_input == channel {
                return Ok(SetOutcome::AlreadyCurrent);
            }
        }
        self.send(Command::SetActiveInput(channel))?;
        Ok(SetOutcome::Applied)
    }

    /// Rename an input channel on the receiver (at most 14 characters are kept)
    pub fn set_input_name(&self, channel: ChannelId, name: &str) -> Result<SetOutcome> {
        let name: String = name.chars().take(MAX_TEXT_LEN).collect();
        {
            let state = self.state.lock().unwrap();
            let Some(current) = state.input_name(channel) else {
                return Err(AvrError::UnknownInput(channel));
            };
            if !state.power {
                return Ok(SetOutcome::RejectedPowerOff);
            }
            if current == name {
                return Ok(SetOutcome::AlreadyCurrent);
            }
        }
        self.send(Command::RenameInput { channel, name })?;
        Ok(SetOutcome::Applied)
    }

    // ========== Speakers ==========

    /// Select the speaker outputs
    pub fn set_speaker_config(&self, config: SpeakerConfig) -> Result<SetOutcome> {
        {
            let state = self.state.lock().unwrap();
            if !state.power {
                return Ok(SetOutcome::RejectedPowerOff);
            }
            if state.speaker_config == config {
                return Ok(SetOutcome::AlreadyCurrent);
            }
        }
        self.send(Command::SetSpeakerConfig(config))?;
        Ok(SetOutcome::Applied)
    }

    // ========== Inbound ==========

    /// Decode one status line and apply it to the mirror
    ///
    /// Returns the kind of line applied. Unknown lines are ignored; malformed
    /// ones are logged and skipped. Subscribers are notified only when
    /// something was applied.
    pub fn parse_message(&self, line: &str) -> Option<MessageKind> {
        let message = match Message::parse(line) {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Skipping line: {}", e);
                return None;
            }
        };

        let kind = message.kind();
        if let Err(e) = self.state.lock().unwrap().apply(message) {
            tracing::warn!("Skipping {} line {:?}: {}", kind, line, e);
            return None;
        }

        let _ = self.update_tx.send(StateUpdate::Changed(kind));
        Some(kind)
    }

    fn gated(&self, command: Command) -> Result<SetOutcome> {
        if !self.power() {
            return Ok(SetOutcome::RejectedPowerOff);
        }
        self.send(command)?;
        Ok(SetOutcome::Applied)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.sink.send_command(&command.encode())
    }
}

impl LineHandler for AvrController {
    fn handle_line(&self, line: &str) {
        self.parse_message(line);
    }

    fn connection_lost(&self, error: &AvrError) {
        self.state.lock().unwrap().connected = false;
        let _ = self
            .update_tx
            .send(StateUpdate::Disconnected(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl CommandSink for RecordingSink {
        fn send_command(&self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn controller() -> (AvrController, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (AvrController::new(sink.clone()), sink)
    }

    fn powered_on() -> (AvrController, Arc<RecordingSink>) {
        let (avr, sink) = controller();
        avr.parse_message("PWR0");
        (avr, sink)
    }

    fn display_line(text: &str) -> String {
        let hex: String = format!("{:<14}", text)
            .bytes()
            .map(|b| format!("{:02X}", b))
            .collect();
        format!("FL00{}", hex)
    }

    #[test]
    fn defaults_match_an_unqueried_receiver() {
        let state = DeviceState::default();
        assert!(!state.power);
        assert_eq!(state.volume_db(), -50.0);
        assert_eq!(state.active_input, 4);
        assert_eq!(state.speaker_config, SpeakerConfig::A);
        assert_eq!(state.display_text, "Off");
        assert_eq!(state.input_names.len(), INPUT_CHANNELS.len());
        assert_eq!(state.input_name(25), Some("25"));
    }

    #[test]
    fn initialize_sends_the_query_battery_in_order() {
        let (avr, sink) = controller();
        avr.initialize().unwrap();

        let sent = sink.take();
        let mut expected = vec![
            "\r\n?P\r\n".to_string(),
            "\r\n?V\r\n".to_string(),
            "\r\n?F\r\n".to_string(),
            "\r\n?SPK\r\n".to_string(),
        ];
        expected.extend(INPUT_CHANNELS.iter().map(|ch| format!("\r\n?RGB{:02}\r\n", ch)));
        assert_eq!(sent, expected);
    }

    #[test]
    fn set_volume_encodes_code_121() {
        let (avr, sink) = powered_on();
        let outcome = avr.set_volume(-20.0).unwrap();
        assert_eq!(outcome, SetOutcome::Applied);
        assert!(outcome.is_applied());
        assert_eq!(sink.take(), vec!["\r\n121VL\r\n"]);
    }

    #[test]
    fn set_volume_clamps_out_of_range() {
        let (avr, sink) = powered_on();
        avr.set_volume(50.0).unwrap();
        avr.set_volume(-200.0).unwrap();
        assert_eq!(sink.take(), vec!["\r\n185VL\r\n", "\r\n001VL\r\n"]);
    }

    #[test]
    fn setters_are_rejected_while_off() {
        let (avr, sink) = controller();
        let before = avr.snapshot();

        assert_eq!(avr.set_volume(-20.0).unwrap(), SetOutcome::RejectedPowerOff);
        assert_eq!(avr.volume_up().unwrap(), SetOutcome::RejectedPowerOff);
        assert!(!avr.volume_down().unwrap().is_applied());
        assert_eq!(avr.volume_down().unwrap(), SetOutcome::RejectedPowerOff);
        assert_eq!(avr.set_active_input(19).unwrap(), SetOutcome::RejectedPowerOff);
        assert_eq!(avr.set_input_name(19, "TV").unwrap(), SetOutcome::RejectedPowerOff);
        assert_eq!(
            avr.set_speaker_config(SpeakerConfig::AB).unwrap(),
            SetOutcome::RejectedPowerOff
        );

        assert!(sink.take().is_empty());
        assert_eq!(avr.snapshot(), before);
    }

    #[test]
    fn setters_for_current_values_send_nothing() {
        let (avr, sink) = powered_on();
        avr.parse_message("VOL121");
        avr.parse_message("FN19");
        avr.parse_message("SPK3");
        avr.parse_message("RGB191TV");

        assert_eq!(avr.set_power(true).unwrap(), SetOutcome::AlreadyCurrent);
        assert_eq!(avr.set_volume(-20.0).unwrap(), SetOutcome::AlreadyCurrent);
        assert_eq!(avr.set_active_input(19).unwrap(), SetOutcome::AlreadyCurrent);
        assert_eq!(avr.set_input_name(19, "TV").unwrap(), SetOutcome::AlreadyCurrent);
        assert_eq!(
            avr.set_speaker_config(SpeakerConfig::AB).unwrap(),
            SetOutcome::AlreadyCurrent
        );
        assert!(sink.take().is_empty());
    }

    #[test]
    fn power_is_toggle_only() {
        let (avr, sink) = controller();
        assert_eq!(avr.set_power(false).unwrap(), SetOutcome::AlreadyCurrent);
        assert_eq!(avr.set_power(true).unwrap(), SetOutcome::Applied);
        avr.toggle_power().unwrap();
        assert_eq!(sink.take(), vec!["\r\nPZ\r\n", "\r\nPZ\r\n"]);
        // Nothing changes until the receiver reports back
        assert!(!avr.power());
    }

    #[test]
    fn other_setters_encode_their_commands() {
        let (avr, sink) = powered_on();
        avr.set_active_input(19).unwrap();
        avr.set_input_name(19, "Living Room Projector").unwrap();
        avr.set_speaker_config(SpeakerConfig::B).unwrap();
        avr.volume_up().unwrap();
        avr.volume_down().unwrap();
        avr.query_display_text().unwrap();
        assert_eq!(
            sink.take(),
            vec![
                "\r\n19FN\r\n",
                "\r\nLiving Room Pr1RGB19\r\n",
                "\r\n2SPK\r\n",
                "\r\nVU\r\n",
                "\r\nVD\r\n",
                "\r\n?FL\r\n",
            ]
        );
    }

    #[test]
    fn unknown_channels_are_rejected() {
        let (avr, sink) = powered_on();
        assert!(matches!(avr.set_active_input(99), Err(AvrError::UnknownInput(99))));
        assert!(matches!(avr.set_input_name(99, "X"), Err(AvrError::UnknownInput(99))));
        assert!(sink.take().is_empty());

        assert_eq!(avr.parse_message("FN99"), None);
        assert_eq!(avr.active_input(), 4);
        assert_eq!(avr.parse_message("RGB991GHOST"), None);
    }

    #[test]
    fn decoded_lines_update_the_mirror() {
        let (avr, _) = controller();
        assert_eq!(avr.parse_message("PWR0"), Some(MessageKind::Power));
        assert!(avr.power());
        assert_eq!(avr.parse_message("PWR1"), Some(MessageKind::Power));
        assert!(!avr.power());

        avr.parse_message("VOL185");
        assert_eq!(avr.volume_db(), 12.0);
        avr.parse_message("FN25");
        assert_eq!(avr.active_input(), 25);
        avr.parse_message("SPK0");
        assert_eq!(avr.speaker_config(), SpeakerConfig::Off);
        avr.parse_message(&display_line("LEVEL 1"));
        assert_eq!(avr.display_text(), "LEVEL 1");
    }

    #[test]
    fn input_names_update_per_channel() {
        let (avr, _) = controller();
        assert_eq!(avr.parse_message("RGB041DVD"), Some(MessageKind::InputName));
        assert_eq!(avr.input_name(4).as_deref(), Some("DVD"));
        assert_eq!(avr.input_name(6).as_deref(), Some("6"));
        assert_eq!(avr.input_name(25).as_deref(), Some("25"));
    }

    #[tokio::test]
    async fn subscribers_see_the_triggering_prefix() {
        let (avr, _) = controller();
        let mut rx = avr.subscribe();

        avr.parse_message("VOL100");
        avr.parse_message("SPK2");
        assert_eq!(rx.recv().await.unwrap(), StateUpdate::Changed(MessageKind::Volume));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.prefix(), Some("SPK"));
    }

    #[test]
    fn unrecognised_and_malformed_lines_change_nothing() {
        let (avr, _) = controller();
        let mut rx = avr.subscribe();
        let before = avr.snapshot();

        for line in ["R", "E04", "MUT1", "VOL", "VOLabc", "PWR", "SPK7", "FL02ZZ"] {
            assert_eq!(avr.parse_message(line), None, "{line}");
        }

        assert_eq!(avr.snapshot(), before);
        assert!(rx.try_recv().unwrap().is_none());
    }

    #[test]
    fn connection_loss_is_broadcast() {
        let (avr, _) = controller();
        let mut rx = avr.subscribe();
        avr.connection_lost(&AvrError::ConnectionClosed);

        assert!(!avr.is_connected());
        assert_eq!(
            rx.try_recv().unwrap(),
            Some(StateUpdate::Disconnected("Connection closed".to_string()))
        );
    }
}
