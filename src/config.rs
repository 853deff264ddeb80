//! Runtime configuration (spec §6), loaded from JSON via `serde_json`. Field
//! naming and the `#[serde(rename_all = "camelCase")]` convention follow the
//! Deserialize structs in mirakc's `eit_feeder`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// PID carrying EIT sections (present/following and schedule), per
/// ETSI TR 101 211: PID 0x12.
pub const DEFAULT_EIT_PID: u16 = 0x12;
/// PID carrying TDT/TOT sections: PID 0x14.
pub const DEFAULT_TDT_PID: u16 = 0x14;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_eit_pid")]
    pub eit_pid: u16,

    #[serde(default = "default_tdt_pid")]
    pub tdt_pid: u16,

    /// Bounded-wait timeout for the channel/schedule store locks, in
    /// milliseconds (spec §5 expansion).
    #[serde(default = "default_lock_timeout_millis")]
    pub lock_timeout_millis: u64,

    /// Whether TDT sections are allowed to discipline the wall clock.
    #[serde(default = "default_true")]
    pub clock_control_enabled: bool,

    /// Language codes in descending order of preference, used to pick among
    /// short/extended event text and parental ratings carried in more than
    /// one language (spec §4.4 "prefer matching language"). Empty means no
    /// preference: keep whichever descriptor is seen first.
    #[serde(default)]
    pub epg_languages: Vec<[u8; 3]>,

    /// How aggressively linkage (Premiere) descriptors are allowed to rename
    /// or synthesize channels (spec §4.4 "Linkage"): 0 never touches the
    /// channel store, 1 renames an already-known linked channel, 2 is
    /// reserved (same as 0), 3 behaves like 1, 4+ also synthesizes a channel
    /// entry for a linked service this crate hasn't seen yet.
    #[serde(default)]
    pub update_channels: u8,

    /// Seconds an event is kept after it ends before the per-event loop
    /// drops it outright (spec §4.4 "EPG_LINGER_TIME").
    #[serde(default = "default_epg_linger_time")]
    pub epg_linger_time: i64,

    /// Upper bound on how many genre bytes one event's `contents` accumulates
    /// from content_descriptor rows (spec §4.4/§6 "MaxEventContents").
    #[serde(default = "default_max_event_contents")]
    pub max_event_contents: usize,
}

fn default_eit_pid() -> u16 {
    DEFAULT_EIT_PID
}

fn default_tdt_pid() -> u16 {
    DEFAULT_TDT_PID
}

fn default_lock_timeout_millis() -> u64 {
    crate::handlers::LOCK_TIMEOUT.as_millis() as u64
}

fn default_true() -> bool {
    true
}

fn default_epg_linger_time() -> i64 {
    2 * 60 * 60
}

fn default_max_event_contents() -> usize {
    8
}

impl Default for Config {
    fn default() -> Self {
        Config {
            eit_pid: default_eit_pid(),
            tdt_pid: default_tdt_pid(),
            lock_timeout_millis: default_lock_timeout_millis(),
            clock_control_enabled: default_true(),
            epg_languages: Vec::new(),
            update_channels: 0,
            epg_linger_time: default_epg_linger_time(),
            max_event_contents: default_max_event_contents(),
        }
    }
}

impl Config {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_millis)
    }

    pub fn load(bytes: &[u8]) -> anyhow::Result<Config> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_well_known_pids() {
        let config = Config::default();
        assert_eq!(config.eit_pid, 0x12);
        assert_eq!(config.tdt_pid, 0x14);
        assert!(config.clock_control_enabled);
        assert!(config.epg_languages.is_empty());
        assert_eq!(config.update_channels, 0);
        assert_eq!(config.max_event_contents, 8);
    }

    #[test]
    fn loads_partial_json_with_defaults() {
        let config = Config::load(br#"{"eitPid": 4352}"#).unwrap();
        assert_eq!(config.eit_pid, 4352);
        assert_eq!(config.tdt_pid, 0x14);
    }

    #[test]
    fn loads_epg_languages_and_update_channels() {
        let config = Config::load(br#"{"epgLanguages": [[101, 110, 103]], "updateChannels": 4}"#).unwrap();
        assert_eq!(config.epg_languages, vec![[101u8, 110, 103]]);
        assert_eq!(config.update_channels, 4);
    }
}
