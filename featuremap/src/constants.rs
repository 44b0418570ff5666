use std::time::Duration;

/// Every room's events live on `TOPIC_PREFIX + room`.
pub const TOPIC_PREFIX: &str = "featuremap.";

/// Header asking the bus to treat a message as the topic's new anchor.
pub const ROLLUP_HEADER: &str = "Nats-Rollup";
/// Roll up everything previously retained on the message's own topic.
pub const ROLLUP_SUBJECT: &str = "sub";

/// Wire names of the event kinds.
pub const CLEAR_KIND: &str = "clear";
pub const ADD_FEATURE_KIND: &str = "AddFeature";
pub const MODIFY_FEATURE_KIND: &str = "ModifyFeature";

/// Local edits to one feature are published at most once per window.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(30);

/// How long an ordered subscription waits for a missing sequence before
/// skipping ahead.
pub const DEFAULT_GAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Live fan-out buffer per topic. Subscribers falling further behind than
/// this are cut off.
pub const LIVE_CHANNEL_CAPACITY: usize = 1024;

pub const DEFAULT_BUS_ADDR: &str = "127.0.0.1:4222";
pub const DEFAULT_BUS_URL: &str = "http://127.0.0.1:4222";

/// Length of a generated client id.
pub const CLIENT_ID_LEN: usize = 8;
