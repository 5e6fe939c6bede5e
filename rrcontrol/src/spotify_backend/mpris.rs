//! MPRIS transport control of the local Spotify Connect receiver.
//!
//! Used when the Web API cannot be reached: the receiver running on this
//! host still answers on the session bus.

use tracing::{debug, warn};
use zbus::{blocking::Connection, zvariant::Value};

const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Bus names tried in order.
pub const MPRIS_PLAYERS: [&str; 3] = [
    "org.mpris.MediaPlayer2.raspotify",
    "org.mpris.MediaPlayer2.librespot",
    "org.mpris.MediaPlayer2.spotifyd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MprisCommand {
    Play,
    Pause,
    Next,
    Previous,
}

impl MprisCommand {
    fn method(&self) -> &'static str {
        match self {
            MprisCommand::Play => "Play",
            MprisCommand::Pause => "Pause",
            MprisCommand::Next => "Next",
            MprisCommand::Previous => "Previous",
        }
    }
}

pub struct MprisClient {
    connection: Connection,
}

impl MprisClient {
    pub fn connect() -> zbus::Result<Self> {
        Ok(Self {
            connection: Connection::session()?,
        })
    }

    /// `PlaybackStatus` of the first player that answers
    /// ("Playing", "Paused" or "Stopped").
    pub fn playback_status(&self) -> Option<String> {
        MPRIS_PLAYERS.iter().find_map(|name| self.status_of(name))
    }

    pub fn is_playing(&self) -> Option<bool> {
        self.playback_status().map(|status| status == "Playing")
    }

    /// Sends `command` to the first player that accepts it.
    pub fn send(&self, command: MprisCommand) -> bool {
        for name in MPRIS_PLAYERS {
            let reply = self.connection.call_method(
                Some(name),
                MPRIS_PATH,
                Some(PLAYER_INTERFACE),
                command.method(),
                &(),
            );
            match reply {
                Ok(_) => {
                    debug!(player = name, command = command.method(), "MPRIS command sent");
                    return true;
                }
                Err(e) => debug!(player = name, error = %e, "MPRIS player did not answer"),
            }
        }
        warn!(command = command.method(), "No MPRIS player accepted the command");
        false
    }

    fn status_of(&self, name: &str) -> Option<String> {
        let reply = self
            .connection
            .call_method(
                Some(name),
                MPRIS_PATH,
                Some(PROPERTIES_INTERFACE),
                "Get",
                &(PLAYER_INTERFACE, "PlaybackStatus"),
            )
            .ok()?;
        let body = reply.body();
        let value: Value<'_> = body.deserialize().ok()?;
        match value {
            Value::Str(status) => Some(status.as_str().to_string()),
            _ => None,
        }
    }
}
