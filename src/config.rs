//! Daemon configuration from `ROOMSYNC_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::warn;

use crate::engine::{ConflictPolicy, EngineOptions, GridLayout};
use crate::limits::DEFAULT_LIST_TOP;
use crate::provider::graph::GRAPH_API_BASE;
use crate::session::Identity;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub buffer_minutes: i64,
    pub time_zone: Tz,
    pub visible_start_hour: u32,
    pub visible_end_hour: u32,
    pub hour_height: f64,
    pub graph_url: String,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub refresh_every: Duration,
    pub list_top: u32,
    pub scopes: Vec<String>,
    pub access_token: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    /// Lowercased accounts allowed to manage rooms.
    pub admin_emails: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let layout = GridLayout::default();
        Self {
            buffer_minutes: ConflictPolicy::default().buffer_minutes(),
            time_zone: layout.time_zone,
            visible_start_hour: layout.start_hour,
            visible_end_hour: layout.end_hour,
            hour_height: layout.hour_height,
            graph_url: GRAPH_API_BASE.into(),
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            refresh_every: Duration::from_secs(60),
            list_top: DEFAULT_LIST_TOP,
            scopes: vec!["Calendars.ReadWrite".into()],
            access_token: None,
            user_email: None,
            user_name: None,
            admin_emails: Vec::new(),
        }
    }
}

/// Non-empty, trimmed value of `key`.
fn text(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Parsed value of `key`, or `None` with a warning when it does not parse.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = text(lookup, key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}

/// Comma or space separated items.
fn list(raw: &str) -> Vec<String> {
    raw.split([',', ' '])
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or invalid values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(minutes) = parsed::<i64>(&lookup, "ROOMSYNC_BUFFER_MINUTES") {
            config.buffer_minutes = ConflictPolicy::with_buffer_minutes(minutes).buffer_minutes();
        }
        if let Some(tz) = parsed::<Tz>(&lookup, "ROOMSYNC_TIME_ZONE") {
            config.time_zone = tz;
        }

        let start = parsed::<u32>(&lookup, "ROOMSYNC_VISIBLE_START_HOUR").unwrap_or(config.visible_start_hour);
        let end = parsed::<u32>(&lookup, "ROOMSYNC_VISIBLE_END_HOUR").unwrap_or(config.visible_end_hour);
        if start < end && end <= 24 {
            config.visible_start_hour = start;
            config.visible_end_hour = end;
        } else {
            warn!(start, end, "ignoring visible hours outside 0..=24 or not increasing");
        }

        match parsed::<f64>(&lookup, "ROOMSYNC_HOUR_HEIGHT") {
            Some(h) if h.is_finite() && h > 0.0 => config.hour_height = h,
            Some(h) => warn!(value = h, "ignoring non-positive hour height"),
            None => {}
        }

        if let Some(url) = text(&lookup, "ROOMSYNC_GRAPH_URL") {
            config.graph_url = url;
        }
        if let Some(dir) = text(&lookup, "ROOMSYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.metrics_port = parsed(&lookup, "ROOMSYNC_METRICS_PORT");

        match parsed::<u64>(&lookup, "ROOMSYNC_REFRESH_SECS") {
            Some(0) => warn!("ignoring zero refresh interval"),
            Some(secs) => config.refresh_every = Duration::from_secs(secs),
            None => {}
        }
        match parsed::<u32>(&lookup, "ROOMSYNC_LIST_TOP") {
            Some(0) => warn!("ignoring zero list page size"),
            Some(top) => config.list_top = top,
            None => {}
        }

        if let Some(scopes) = text(&lookup, "ROOMSYNC_SCOPES") {
            let scopes = list(&scopes);
            if !scopes.is_empty() {
                config.scopes = scopes;
            }
        }
        if let Some(admins) = text(&lookup, "ROOMSYNC_ADMIN_EMAILS") {
            config.admin_emails = list(&admins.to_lowercase());
            config.admin_emails.sort();
            config.admin_emails.dedup();
        }

        config.access_token = text(&lookup, "ROOMSYNC_ACCESS_TOKEN");
        config.user_email = text(&lookup, "ROOMSYNC_USER_EMAIL");
        config.user_name = text(&lookup, "ROOMSYNC_USER_NAME");
        config
    }

    pub fn layout(&self) -> GridLayout {
        GridLayout {
            time_zone: self.time_zone,
            start_hour: self.visible_start_hour,
            end_hour: self.visible_end_hour,
            hour_height: self.hour_height,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            policy: ConflictPolicy::with_buffer_minutes(self.buffer_minutes),
            layout: self.layout(),
            list_top: self.list_top,
            scopes: self.scopes.clone(),
            admins: self.admin_emails.iter().cloned().collect(),
            ..EngineOptions::default()
        }
    }

    /// Identity for a pre-provisioned token. Needs at least the user's email.
    pub fn identity(&self) -> Option<Identity> {
        let email = self.user_email.clone()?;
        Some(Identity {
            account_id: email.clone(),
            display_name: self.user_name.clone().unwrap_or_else(|| email.clone()),
            email,
        })
    }

    pub fn rooms_log_path(&self) -> PathBuf {
        self.data_dir.join("rooms.log")
    }
}
