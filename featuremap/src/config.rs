use std::time::Duration;

use rand::{distributions::Alphanumeric, Rng};
use url::form_urlencoded;

use crate::{
    bus::DeliverPolicy,
    constants::{CLIENT_ID_LEN, DEFAULT_BUS_URL, DEFAULT_THROTTLE_WINDOW, TOPIC_PREFIX},
};

/// Who this client is and which room it edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub room: String,
    /// Tags everything this client publishes so it can recognise its own
    /// events coming back. Never used for authorization.
    pub client_id: String,
    /// Whether the caller offers history scrubbing.
    pub history_enabled: bool,
}

impl SessionConfig {
    pub fn new(room: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            client_id: client_id.into(),
            history_enabled: false,
        }
    }

    /// A fresh client in a room of its own, named after the client.
    pub fn generate() -> Self {
        let client_id = generate_client_id();
        Self::new(client_id.clone(), client_id)
    }

    /// Read a page query string such as `?room=abc&history`. Values are
    /// form-urlencoded, so `?room=north+shore` names the room `north shore`.
    /// Without a `room` the session gets a room of its own;
    /// [to_query](Self::to_query) gives the query to write back so that
    /// reloading rejoins it. The presence of `history` enables scrubbing,
    /// whatever its value.
    pub fn from_query(query: &str) -> Self {
        let mut session = Self::generate();
        let query = query.strip_prefix('?').unwrap_or(query);
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "room" if !value.is_empty() => session.room = value.into_owned(),
                "history" => session.history_enabled = true,
                _ => {}
            }
        }
        session
    }

    pub fn to_query(&self) -> String {
        let mut query = form_urlencoded::Serializer::for_suffix(String::from("?"), 1)
            .append_pair("room", &self.room)
            .finish();
        if self.history_enabled {
            query.push_str("&history");
        }
        query
    }

    /// The bus topic carrying the room's events.
    pub fn topic(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.room)
    }
}

/// A random id of lowercase letters and digits.
pub fn generate_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where [connect](crate::SyncEngine::connect) finds the bus.
    pub bus_url: String,
    /// Where a streaming session starts reading. Scrubbing always replays
    /// from the start.
    pub deliver: DeliverPolicy,
    /// Local edits to one feature are published at most once per window.
    pub throttle_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bus_url: DEFAULT_BUS_URL.to_string(),
            deliver: DeliverPolicy::All,
            throttle_window: DEFAULT_THROTTLE_WINDOW,
        }
    }
}

impl EngineConfig {
    pub fn with_bus_url(mut self, bus_url: impl Into<String>) -> Self {
        self.bus_url = bus_url.into();
        self
    }

    pub fn with_deliver(mut self, deliver: DeliverPolicy) -> Self {
        self.deliver = deliver;
        self
    }

    pub fn with_throttle_window(mut self, throttle_window: Duration) -> Self {
        self.throttle_window = throttle_window;
        self
    }
}
