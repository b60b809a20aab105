// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! IoT payload schemas exchanged on a manager's logical queues: JSON on the
//! wire, binary fields hex-encoded, timestamps ISO-8601. Unset optional
//! fields are omitted from the encoded JSON (`skip_serializing_if`).

use crate::codec::hex_bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Uplink data an Application manager receives from the network side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUlData {
    /// Unique identifier of this uplink, assigned by the network.
    pub data_id: String,
    /// When the network received the data from the device.
    pub time: DateTime<Utc>,
    /// When the network published this message.
    #[serde(rename = "pub")]
    pub published: DateTime<Utc>,
    /// Originating device's identifier.
    pub device_id: String,
    /// Originating network's identifier.
    pub network_id: String,
    /// Originating network's unit code (empty for a public network).
    pub network_code: String,
    /// Device address on the originating network.
    pub network_addr: String,
    /// Whether the originating network is public.
    pub is_public: bool,
    /// Opaque application payload.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Caller-defined passthrough metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extension: Option<serde_json::Value>,
}

/// Downlink data an Application manager sends toward a device, addressed
/// either directly by `deviceId` or by `networkCode`+`networkAddr`.
#[derive(Builder, Debug, Clone, Serialize, Deserialize)]
#[builder(setter(into, strip_option), build_fn(validate = "AppDlDataBuilder::validate"))]
#[serde(rename_all = "camelCase")]
pub struct AppDlData {
    /// Caller-assigned identifier correlating this request with its
    /// eventual [`AppDlDataResp`]/[`AppDlDataResult`].
    pub correlation_id: String,
    /// Target device, when addressing by device identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default = "None")]
    pub device_id: Option<String>,
    /// Target network's unit code, when addressing by network+address.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default = "None")]
    pub network_code: Option<String>,
    /// Target device's address on that network, when addressing by
    /// network+address.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default = "None")]
    pub network_addr: Option<String>,
    /// Opaque application payload.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Caller-defined passthrough metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default = "None")]
    pub extension: Option<serde_json::Value>,
}

impl AppDlDataBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self
            .correlation_id
            .as_deref()
            .map_or(true, str::is_empty)
        {
            return Err("correlationId must be non-empty".to_string());
        }
        let has_device = matches!(&self.device_id, Some(Some(v)) if !v.is_empty());
        let has_network = matches!(&self.network_code, Some(Some(v)) if !v.is_empty())
            && matches!(&self.network_addr, Some(Some(v)) if !v.is_empty());
        if has_device == has_network {
            return Err(
                "exactly one of deviceId or networkCode+networkAddr must be set".to_string(),
            );
        }
        Ok(())
    }
}

/// Application-side acknowledgement of an [`AppDlData`], correlated by
/// `correlationId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDlDataResp {
    /// Echoes the originating [`AppDlData::correlation_id`].
    pub correlation_id: String,
    /// Identifier the network assigned the accepted downlink, if accepted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data_id: Option<String>,
    /// Machine-readable rejection reason, if rejected.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Human-readable detail accompanying `error`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// Final delivery outcome of a downlink previously accepted via
/// [`AppDlDataResp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDlDataResult {
    /// The network-assigned downlink identifier this result reports on.
    pub data_id: String,
    /// Delivery status code.
    pub status: i32,
    /// Human-readable detail, typically set only on failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// Uplink data a Network manager receives from a device via its driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetUlData {
    /// When the network received the data from the device.
    pub time: DateTime<Utc>,
    /// Device address on the network.
    pub network_addr: String,
    /// Opaque application payload.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Caller-defined passthrough metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extension: Option<serde_json::Value>,
}

/// Downlink data a Network manager receives to forward to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetDlData {
    /// Identifier the Application manager's SDK assigned this downlink.
    pub data_id: String,
    /// When the Application manager published this downlink.
    #[serde(rename = "pub")]
    pub published: DateTime<Utc>,
    /// How long, in seconds, the downlink remains valid for delivery.
    pub expires_in: i64,
    /// Target device's address on the network.
    pub network_addr: String,
    /// Opaque application payload.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Caller-defined passthrough metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extension: Option<serde_json::Value>,
}

/// Final delivery outcome of a [`NetDlData`], published by a Network
/// manager back to the owning Application manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetDlDataResult {
    /// The downlink identifier this result reports on.
    pub data_id: String,
    /// Delivery status code.
    pub status: i32,
    /// Human-readable detail, typically set only on failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// The device-provisioning operation a [`NetCtrlMsg`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CtrlOperation {
    /// Provision a single device.
    AddDevice,
    /// Provision many devices in one message.
    AddDeviceBulk,
    /// Provision a contiguous range of device addresses.
    AddDeviceRange,
    /// Deprovision a single device.
    DelDevice,
    /// Deprovision many devices in one message.
    DelDeviceBulk,
    /// Deprovision a contiguous range of device addresses.
    DelDeviceRange,
}

/// A device-provisioning control message a Network manager receives on its
/// `ctrl` queue. The shape of `new` is determined by `operation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetCtrlMsg {
    /// Which provisioning operation this message requests.
    pub operation: CtrlOperation,
    /// When the control message was issued.
    pub time: DateTime<Utc>,
    /// The operation-specific payload.
    pub new: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_dl_data_rejects_neither_addressing() {
        let err = AppDlDataBuilder::default()
            .correlation_id("1")
            .network_code("code")
            .data(vec![0x02])
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn app_dl_data_accepts_device_id_addressing() {
        let built = AppDlDataBuilder::default()
            .correlation_id("1")
            .device_id("device1")
            .data(vec![0x01])
            .build()
            .expect("valid");
        let json = serde_json::to_value(&built).expect("serializable");
        assert_eq!(json["data"], "01");
        assert!(json.get("networkCode").is_none());
    }

    #[test]
    fn app_dl_data_accepts_network_addressing() {
        let built = AppDlDataBuilder::default()
            .correlation_id("2")
            .network_code("code")
            .network_addr("addr2")
            .data(vec![0x02])
            .build()
            .expect("valid");
        let json = serde_json::to_value(&built).expect("serializable");
        assert_eq!(json["data"], "02");
        assert!(json.get("deviceId").is_none());
    }

    #[test]
    fn app_dl_data_rejects_both_addressing_modes() {
        let err = AppDlDataBuilder::default()
            .correlation_id("3")
            .device_id("device1")
            .network_code("code")
            .network_addr("addr2")
            .data(vec![0x03])
            .build();
        assert!(err.is_err());
    }
}
