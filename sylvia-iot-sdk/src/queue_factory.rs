// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builds the fixed set of four or five named logical queues a manager
//! needs, following the `[prefix].[unit_code | "_"].[name].<role>` naming
//! scheme.

use general_mq::queue::{AmqpQueueOptionsBuilder, MqttQueueOptionsBuilder};
use general_mq::{Connection, GeneralMqError, Protocol, Queue, Result};
use std::collections::HashMap;

const DEFAULT_RECONNECT_MILLIS: u64 = 1000;
const DEFAULT_PREFETCH: u16 = 100;
const DEFAULT_PERSISTENT: bool = false;

/// The logical role a queue plays within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Uplink data, device -> application.
    UlData,
    /// Downlink data, application -> device.
    DlData,
    /// Acknowledgement of a downlink request.
    DlDataResp,
    /// Final delivery outcome of a downlink.
    DlDataResult,
    /// Device-provisioning control messages (Network manager only).
    Ctrl,
}

impl QueueRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::UlData => "uldata",
            Self::DlData => "dldata",
            Self::DlDataResp => "dldata-resp",
            Self::DlDataResult => "dldata-result",
            Self::Ctrl => "ctrl",
        }
    }
}

/// Queue options forwarded from a manager's construction options.
#[derive(Debug, Clone, Default)]
pub struct QueueFactoryOptions {
    /// AMQP receiver prefetch. `None` uses the default of 100; `Some(0)` is
    /// rejected by the caller before reaching this factory (see
    /// `ManagerOptions` validation — the factory itself never coerces it).
    pub prefetch: Option<u16>,
    /// AMQP publisher persistence flag.
    pub persistent: Option<bool>,
    /// MQTT unicast receiver shared-subscription prefix.
    pub shared_prefix: Option<String>,
    /// Reconnect interval, in milliseconds, for every created queue.
    pub reconnect_millis: Option<u64>,
}

/// Compose one queue's full broker-visible name.
#[must_use]
pub fn queue_name(prefix: &str, unit_code: &str, name: &str, role: QueueRole) -> String {
    let unit = if unit_code.is_empty() { "_" } else { unit_code };
    format!("{prefix}.{unit}.{name}.{role}", role = role.as_str())
}

/// Number of queues a manager of this kind owns, usable before a
/// [`Connection`] exists (e.g. to size a [`crate::ConnectionPool`] ref-count
/// delta ahead of [`build_queues`]).
#[must_use]
pub fn queue_count(is_network: bool) -> u32 {
    roles_for(is_network).len() as u32
}

fn roles_for(is_network: bool) -> &'static [(QueueRole, bool)] {
    if is_network {
        &[
            (QueueRole::UlData, false),
            (QueueRole::DlData, true),
            (QueueRole::DlDataResult, false),
            (QueueRole::Ctrl, true),
        ]
    } else {
        &[
            (QueueRole::UlData, true),
            (QueueRole::DlData, false),
            (QueueRole::DlDataResp, true),
            (QueueRole::DlDataResult, true),
        ]
    }
}

/// Build the fixed queue set for a manager: four roles for an Application
/// manager (`isNetwork=false`), four for a Network manager (`isNetwork=true`,
/// substituting `ctrl` for `dldata-resp`). Every created queue shares
/// `reliable=true`, `broadcast=false`.
pub fn build_queues(
    connection: &Connection,
    prefix: &str,
    unit_code: &str,
    name: &str,
    options: &QueueFactoryOptions,
    is_network: bool,
) -> Result<HashMap<QueueRole, Queue>> {
    let mut queues = HashMap::with_capacity(4);
    for (role, is_recv) in roles_for(is_network) {
        let full_name = queue_name(prefix, unit_code, name, *role);
        let queue = match connection.protocol() {
            Protocol::Amqp => Queue::new_amqp(
                connection,
                AmqpQueueOptionsBuilder::default()
                    .name(full_name)
                    .is_recv(*is_recv)
                    .reliable(true)
                    .broadcast(false)
                    .reconnect_millis(options.reconnect_millis.unwrap_or(DEFAULT_RECONNECT_MILLIS))
                    .prefetch(options.prefetch.unwrap_or(DEFAULT_PREFETCH))
                    .persistent(options.persistent.unwrap_or(DEFAULT_PERSISTENT))
                    .build()
                    .map_err(|e| GeneralMqError::invalid_argument(e.to_string()))?,
            )?,
            Protocol::Mqtt => Queue::new_mqtt(
                connection,
                MqttQueueOptionsBuilder::default()
                    .name(full_name)
                    .is_recv(*is_recv)
                    .reliable(true)
                    .broadcast(false)
                    .reconnect_millis(options.reconnect_millis.unwrap_or(DEFAULT_RECONNECT_MILLIS))
                    .shared_prefix(options.shared_prefix.clone())
                    .build()
                    .map_err(|e| GeneralMqError::invalid_argument(e.to_string()))?,
            )?,
        };
        queues.insert(*role, queue);
    }
    Ok(queues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("coremgr", "", "broker", QueueRole::UlData, "coremgr._.broker.uldata"; "public unit")]
    #[test_case("coremgr", "unit1", "broker", QueueRole::DlDataResult, "coremgr.unit1.broker.dldata-result"; "scoped unit")]
    fn names_follow_scheme(prefix: &str, unit_code: &str, name: &str, role: QueueRole, expected: &str) {
        assert_eq!(queue_name(prefix, unit_code, name, role), expected);
    }
}
