//! MQTT topic layout: `<base>/<device_id>/telemetry` and `<base>/<device_id>/events`

use serde::{Deserialize, Serialize};

pub const DEFAULT_TOPIC_BASE: &str = "scooter";
pub const DEFAULT_DEVICE_ID: &str = "m365-lis-01";

/// Topics for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTopics {
    pub base: String,
    pub device_id: String,
}

impl DeviceTopics {
    pub fn new(base: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            device_id: device_id.into(),
        }
    }

    /// Topic for telemetry records
    pub fn telemetry(&self) -> String {
        format!("{}/{}/telemetry", self.base, self.device_id)
    }

    /// Topic for marker records
    pub fn events(&self) -> String {
        format!("{}/{}/events", self.base, self.device_id)
    }
}

impl Default for DeviceTopics {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_BASE, DEFAULT_DEVICE_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let topics = DeviceTopics::new("scooter", "m365-lis-01");
        assert_eq!(topics.telemetry(), "scooter/m365-lis-01/telemetry");
        assert_eq!(topics.events(), "scooter/m365-lis-01/events");
    }

    #[test]
    fn test_trailing_slash_in_base() {
        let topics = DeviceTopics::new("m365/", "dev");
        assert_eq!(topics.telemetry(), "m365/dev/telemetry");
    }
}
