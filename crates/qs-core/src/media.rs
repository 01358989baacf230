//! Media commands, now-playing tracking and user activity
//!
//! These are the collaborator surfaces around the filter: the host shell
//! drives playback with a small command vocabulary and listens for
//! now-playing changes. Nothing here touches ad state.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dom::{DocumentHost, MediaHandle};
use crate::observer::MEDIA_SELECTOR;

// =============================================================================
// Media Commands
// =============================================================================

pub const PLAY_PAUSE_BUTTON_SELECTOR: &str = "ytmusic-player-bar #play-pause-button button";
pub const NEXT_BUTTON_SELECTOR: &str = "ytmusic-player-bar .next-button button";
pub const PREVIOUS_BUTTON_SELECTOR: &str = "ytmusic-player-bar .previous-button button";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommand {
    PlayPause,
    Play,
    Pause,
    Next,
    Previous,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown media command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for MediaCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playpause" => Ok(Self::PlayPause),
            "play" => Ok(Self::Play),
            "pause" => Ok(Self::Pause),
            "next" => Ok(Self::Next),
            "previous" => Ok(Self::Previous),
            "stop" => Ok(Self::Stop),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// Media-session action names routed into the command vocabulary.
pub const MEDIA_SESSION_ACTIONS: &[(&str, MediaCommand)] = &[
    ("play", MediaCommand::Play),
    ("pause", MediaCommand::Pause),
    ("previoustrack", MediaCommand::Previous),
    ("nexttrack", MediaCommand::Next),
    ("stop", MediaCommand::Stop),
];

fn first_media<H: DocumentHost>(host: &H) -> Option<H::Media> {
    host.query_first(MEDIA_SELECTOR)
        .ok()
        .flatten()
        .and_then(|element| host.as_media(&element))
}

fn click_first<H: DocumentHost>(host: &H, selector: &str) -> bool {
    match host.query_first(selector) {
        Ok(Some(button)) => {
            host.click(&button);
            true
        }
        Ok(None) => false,
        Err(e) => {
            log::warn!("media command: {}", e);
            false
        }
    }
}

/// Execute a command against the player bar. Returns whether it took effect.
pub fn execute<H: DocumentHost>(command: MediaCommand, host: &H) -> bool {
    match command {
        MediaCommand::PlayPause => click_first(host, PLAY_PAUSE_BUTTON_SELECTOR),
        MediaCommand::Play | MediaCommand::Pause => {
            let want_paused = command == MediaCommand::Pause;
            match first_media(host) {
                Some(media) if media.is_paused() == want_paused => true,
                _ => click_first(host, PLAY_PAUSE_BUTTON_SELECTOR),
            }
        }
        MediaCommand::Next => click_first(host, NEXT_BUTTON_SELECTOR),
        MediaCommand::Previous => click_first(host, PREVIOUS_BUTTON_SELECTOR),
        MediaCommand::Stop => match first_media(host) {
            Some(media) => {
                media.pause();
                media.set_current_time(0.0);
                true
            }
            None => false,
        },
    }
}

/// Parse and execute a command name; unknown names are logged and rejected.
pub fn execute_named<H: DocumentHost>(name: &str, host: &H) -> bool {
    match name.parse::<MediaCommand>() {
        Ok(command) => execute(command, host),
        Err(e) => {
            log::warn!("{}", e);
            false
        }
    }
}

// =============================================================================
// Now Playing
// =============================================================================

pub const TITLE_SELECTOR: &str = "ytmusic-player-bar .title.ytmusic-player-bar";
pub const BYLINE_SELECTOR: &str = "ytmusic-player-bar .byline.ytmusic-player-bar";
pub const ARTWORK_SELECTOR: &str = "ytmusic-player-bar img.image";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Buffering,
    Stopped,
}

/// Metadata published by the page's media session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
}

/// Source of media-session metadata.
pub trait MediaSessionSource {
    fn session_metadata(&self) -> Option<SessionMetadata>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
    pub duration: Option<u64>,
    pub position: Option<u64>,
}

impl NowPlaying {
    /// Whether the track identity differs. Position and duration drift
    /// every second and are not a change.
    pub fn differs_from(&self, other: &NowPlaying) -> bool {
        self.title != other.title
            || self.artist != other.artist
            || self.album != other.album
            || self.artwork_url != other.artwork_url
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn whole_seconds(secs: f64) -> Option<u64> {
    if secs.is_finite() && secs >= 1.0 {
        Some(secs.floor() as u64)
    } else {
        None
    }
}

/// Split a player-bar byline ("Artist • Album • Year") into artist and album.
pub fn parse_byline(byline: &str) -> (Option<String>, Option<String>) {
    let mut parts = byline.split('•').map(str::trim);
    let artist = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let album = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    (artist, album)
}

/// Extract now-playing metadata, preferring the media session and falling
/// back to the player bar. `None` until both title and artist are known.
pub fn extract_now_playing<H>(host: &H) -> Option<NowPlaying>
where
    H: DocumentHost + MediaSessionSource,
{
    let session = host.session_metadata().unwrap_or_default();
    let mut title = non_empty(session.title);
    let mut artist = non_empty(session.artist);
    let mut album = non_empty(session.album);
    let mut artwork_url = non_empty(session.artwork_url);

    let (duration, position) = match first_media(host) {
        Some(media) => (whole_seconds(media.duration()), whole_seconds(media.current_time())),
        None => (None, None),
    };

    if title.is_none() && artist.is_none() {
        let text_of = |selector: &str| {
            host.query_first(selector)
                .ok()
                .flatten()
                .and_then(|element| non_empty(host.text_content(&element)))
        };
        title = text_of(TITLE_SELECTOR);
        if artwork_url.is_none() {
            artwork_url = host
                .query_first(ARTWORK_SELECTOR)
                .ok()
                .flatten()
                .and_then(|image| non_empty(host.attribute(&image, "src")));
        }
        if let Some(byline) = text_of(BYLINE_SELECTOR) {
            let (byline_artist, byline_album) = parse_byline(&byline);
            artist = byline_artist;
            album = album.or(byline_album);
        }
    }

    Some(NowPlaying {
        title: title?,
        artist: artist?,
        album,
        artwork_url,
        duration,
        position,
    })
}

/// HAVE_FUTURE_DATA; below it the element is still buffering.
const READY_FOR_PLAYBACK: u16 = 3;

pub fn extract_playback_state<H: DocumentHost>(host: &H) -> PlaybackState {
    match first_media(host) {
        None => PlaybackState::Stopped,
        Some(media) if media.is_paused() => PlaybackState::Paused,
        Some(media) if media.ready_state() < READY_FOR_PLAYBACK => PlaybackState::Buffering,
        Some(_) => PlaybackState::Playing,
    }
}

/// Changes to push to the host shell after one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NowPlayingUpdate {
    pub metadata: Option<NowPlaying>,
    pub state: Option<PlaybackState>,
}

/// Last-known now-playing data; reports changes only.
#[derive(Debug, Clone, Default)]
pub struct NowPlayingTracker {
    last_metadata: Option<NowPlaying>,
    last_state: Option<PlaybackState>,
}

impl NowPlayingTracker {
    pub fn observe(&mut self, metadata: Option<NowPlaying>, state: PlaybackState) -> NowPlayingUpdate {
        let mut update = NowPlayingUpdate::default();

        if let Some(metadata) = metadata {
            let changed = self
                .last_metadata
                .as_ref()
                .map_or(true, |last| metadata.differs_from(last));
            if changed {
                self.last_metadata = Some(metadata.clone());
                update.metadata = Some(metadata);
            }
        }

        if self.last_state != Some(state) {
            self.last_state = Some(state);
            update.state = Some(state);
        }

        update
    }
}

// =============================================================================
// User Activity
// =============================================================================

/// Tracks the last user input so automatic pauses can be told apart from
/// user pauses.
#[derive(Debug, Clone, Copy)]
pub struct ActivityTracker {
    last_activity_ms: f64,
}

impl ActivityTracker {
    pub fn new(now_ms: f64) -> Self {
        Self {
            last_activity_ms: now_ms,
        }
    }

    pub fn record(&mut self, now_ms: f64) {
        self.last_activity_ms = now_ms;
    }

    pub fn is_recent(&self, now_ms: f64, window_ms: f64) -> bool {
        now_ms - self.last_activity_ms < window_ms
    }

    /// A pause is honored only shortly after user input.
    pub fn allows_pause(&self, now_ms: f64, window_ms: f64) -> bool {
        self.is_recent(now_ms, window_ms)
    }

    /// An idle prompt opened long after the last input is dismissed.
    pub fn should_dismiss_popup(&self, node_name: &str, now_ms: f64, window_ms: f64) -> bool {
        node_name == crate::patterns::IDLE_PROMPT_NODE_NAME && !self.is_recent(now_ms, window_ms)
    }
}
