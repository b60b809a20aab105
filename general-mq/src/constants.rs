// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared constants and name validation for general-mq.

use regex::Regex;
use std::sync::OnceLock;

/// Default reconnect interval, in milliseconds, used when not overridden.
pub const DEFAULT_RECONNECT_MILLIS: u64 = 1000;
/// Default connect/dial timeout, in milliseconds, used when not overridden.
pub const DEFAULT_CONNECT_TIMEOUT_MILLIS: u64 = 3000;
/// Default AMQP receiver prefetch count.
pub const DEFAULT_PREFETCH: u16 = 100;
/// Default persistent-publish flag for AMQP senders.
pub const DEFAULT_PERSISTENT: bool = false;
/// Reference MQTT shared-subscription prefix. Any non-empty prefix is accepted by
/// the library; this is merely the value the reference deployment uses.
pub const DEFAULT_MQTT_SHARED_PREFIX: &str = "$share/general-mq/";
/// Prefix used when generating a random MQTT client ID.
pub const MQTT_CLIENT_ID_PREFIX: &str = "general-mq-";
/// Length, in characters, of the random suffix appended to a generated client ID.
pub const MQTT_CLIENT_ID_RANDOM_LEN: usize = 12;
/// Maximum length of an MQTT client ID, matching the MQTT 3.1/5 wire limit.
pub const MQTT_CLIENT_ID_MAX_LEN: usize = 23;

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_-]+(\.[a-z0-9_-]+)*$").expect("valid regex"))
}

/// Returns true if `name` is a valid queue/exchange/topic leaf name:
/// `^[a-z0-9_-]+(\.[a-z0-9_-]+)*$`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    name_regex().is_match(name)
}
