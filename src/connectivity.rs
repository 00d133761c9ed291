//! Connectivity events and the change-detection policy that can abort a run.
//!
//! The scheduler keeps an append-only history of [`ConnectivityEvent`]s.
//! Signal sources only post events; whether an event aborts the run is
//! decided here: a network-type change aborts, except that the two
//! WiFi+Cellular composite types are treated as equivalent, and a WiFi
//! access-point identity change aborts even when the type is unchanged.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The network type reported by the platform's connectivity source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Unknown,
    Offline,
    Wifi,
    Cellular,
    /// WiFi primary with cellular also active.
    WifiCellular,
    /// Cellular primary with WiFi also active.
    CellularWifi,
}

impl NetworkType {
    /// True for the two WiFi+Cellular composites, which are
    /// order-insensitive for change detection.
    pub fn is_composite(&self) -> bool {
        matches!(self, NetworkType::WifiCellular | NetworkType::CellularWifi)
    }

    /// True when a WiFi interface is part of the connectivity.
    pub fn has_wifi(&self) -> bool {
        matches!(
            self,
            NetworkType::Wifi
                | NetworkType::WifiCellular
                | NetworkType::CellularWifi
        )
    }

    pub fn describe(&self) -> &'static str {
        match self {
            NetworkType::Unknown => "unknown connectivity",
            NetworkType::Offline => "no connectivity",
            NetworkType::Wifi => "WiFi",
            NetworkType::Cellular => "cellular",
            NetworkType::WifiCellular => "WiFi + cellular",
            NetworkType::CellularWifi => "cellular + WiFi",
        }
    }
}

/// Whether a transition between two network types counts as a change.
///
/// Toggling between the two composite types is not a change: both mean
/// "WiFi and cellular simultaneously active", only the primary differs.
pub fn network_type_changed(previous: NetworkType, next: NetworkType) -> bool {
    if previous.is_composite() && next.is_composite() {
        return false;
    }
    previous != next
}

/// One entry in the run's connectivity history. Never mutated after
/// append.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityEvent {
    pub network_type: NetworkType,
    /// WLAN SSID for WiFi, operator name for cellular.
    pub network_name: String,
    /// WiFi access-point identity, when the type includes WiFi.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
    /// Cellular operator name when both interfaces are active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_network_name: Option<String>,
    pub addresses: Vec<IpAddr>,
    pub timestamp: DateTime<Utc>,
}

impl ConnectivityEvent {
    pub fn new(
        network_type: NetworkType,
        network_name: impl Into<String>,
    ) -> Self {
        Self {
            network_type,
            network_name: network_name.into(),
            bssid: None,
            cell_network_name: None,
            addresses: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_bssid(mut self, bssid: impl Into<String>) -> Self {
        self.bssid = Some(bssid.into());
        self
    }

    /// Placeholder snapshot for hosts without a platform connectivity
    /// source.
    pub fn unknown() -> Self {
        Self::new(NetworkType::Unknown, "unknown")
    }
}

/// Decide whether `next` should abort the run, given the run's initial
/// snapshot and the most recently recorded event.
///
/// The access-point identity is compared against the initial snapshot,
/// not the previous event: moving back and forth between two APs during
/// a run invalidates the measurements either way.
pub fn is_abort_worthy(
    initial: &ConnectivityEvent,
    last: &ConnectivityEvent,
    next: &ConnectivityEvent,
) -> bool {
    if network_type_changed(last.network_type, next.network_type) {
        return true;
    }

    match &next.bssid {
        Some(bssid) => initial.bssid.as_ref() != Some(bssid),
        None => false,
    }
}

/// Source of connectivity snapshots. Change notifications arrive
/// separately, through the scheduler's control channel.
pub trait ConnectivityMonitor: Send + Sync {
    fn current_snapshot(&self) -> ConnectivityEvent;
}

/// A monitor that always reports the same snapshot; used by the CLI,
/// where platform interface introspection is out of scope.
pub struct StaticMonitor {
    snapshot: ConnectivityEvent,
}

impl StaticMonitor {
    pub fn new(snapshot: ConnectivityEvent) -> Self {
        Self { snapshot }
    }
}

impl ConnectivityMonitor for StaticMonitor {
    fn current_snapshot(&self) -> ConnectivityEvent {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    static ALL_TYPES: [NetworkType; 6] = [
        NetworkType::Unknown,
        NetworkType::Offline,
        NetworkType::Wifi,
        NetworkType::Cellular,
        NetworkType::WifiCellular,
        NetworkType::CellularWifi,
    ];

    fn network_type() -> impl Strategy<Value = NetworkType> {
        prop::sample::select(&ALL_TYPES[..])
    }

    #[test]
    fn test_composite_toggle_is_not_a_change() {
        assert!(!network_type_changed(
            NetworkType::WifiCellular,
            NetworkType::CellularWifi
        ));
        assert!(!network_type_changed(
            NetworkType::CellularWifi,
            NetworkType::WifiCellular
        ));
    }

    #[test]
    fn test_wifi_to_cellular_is_a_change() {
        assert!(network_type_changed(NetworkType::Wifi, NetworkType::Cellular));
    }

    proptest! {
        /// Only identical types or a composite-composite pair are silent;
        /// every other transition counts as a change.
        #[test]
        fn change_detection_matches_tie_policy(
            previous in network_type(),
            next in network_type(),
        ) {
            let expected = previous != next
                && !(previous.is_composite() && next.is_composite());
            prop_assert_eq!(network_type_changed(previous, next), expected);
        }
    }

    #[test]
    fn test_bssid_change_aborts_even_without_type_change() {
        let initial =
            ConnectivityEvent::new(NetworkType::Wifi, "lab").with_bssid("aa");
        let next =
            ConnectivityEvent::new(NetworkType::Wifi, "lab").with_bssid("bb");

        assert!(is_abort_worthy(&initial, &initial, &next));
    }

    #[test]
    fn test_same_bssid_does_not_abort() {
        let initial =
            ConnectivityEvent::new(NetworkType::Wifi, "lab").with_bssid("aa");
        let next =
            ConnectivityEvent::new(NetworkType::Wifi, "lab").with_bssid("aa");

        assert!(!is_abort_worthy(&initial, &initial, &next));
    }

    #[test]
    fn test_composite_toggle_with_no_bssid_is_silent() {
        let initial =
            ConnectivityEvent::new(NetworkType::WifiCellular, "lab");
        let next = ConnectivityEvent::new(NetworkType::CellularWifi, "lab");

        assert!(!is_abort_worthy(&initial, &initial, &next));
    }
}
