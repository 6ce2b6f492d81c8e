//! Well-known FSAPI node paths and control values

pub const POWER: &str = "netremote.sys.power";
pub const MODE: &str = "netremote.sys.mode";
pub const VOLUME: &str = "netremote.sys.audio.volume";
pub const MUTE: &str = "netremote.sys.audio.mute";
pub const FRIENDLY_NAME: &str = "netremote.sys.info.friendlyname";
pub const RADIO_ID: &str = "netremote.sys.info.radioid";

pub const VOLUME_STEPS: &str = "netremote.sys.caps.volumesteps";
pub const VALID_MODES: &str = "netremote.sys.caps.validmodes";
pub const FM_FREQ_LOWER: &str = "netremote.sys.caps.fmfreqrange.lower";
pub const FM_FREQ_UPPER: &str = "netremote.sys.caps.fmfreqrange.upper";
pub const FM_FREQ_STEP: &str = "netremote.sys.caps.fmfreqrange.stepsize";

pub const FREQUENCY: &str = "netremote.play.frequency";
pub const PLAY_STATUS: &str = "netremote.play.status";
pub const PLAY_CONTROL: &str = "netremote.play.control";
pub const REPEAT: &str = "netremote.play.repeat";
pub const SHUFFLE: &str = "netremote.play.shuffle";

pub const INFO_NAME: &str = "netremote.play.info.name";
pub const INFO_TEXT: &str = "netremote.play.info.text";
pub const INFO_ARTIST: &str = "netremote.play.info.artist";
pub const INFO_ALBUM: &str = "netremote.play.info.album";
pub const INFO_GRAPHIC: &str = "netremote.play.info.graphicuri";

pub const SPOTIFY_USER: &str = "netremote.spotify.username";

/// Values accepted by [`PLAY_CONTROL`]
pub mod control {
    pub const STOP: &str = "0";
    pub const PLAY: &str = "1";
    pub const PAUSE: &str = "2";
    pub const NEXT: &str = "3";
    pub const PREVIOUS: &str = "4";
}
