//! Closed set of batch pipelines

use serde::{Deserialize, Serialize};

use crate::resource::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    Osm,
    Wikipedia,
    KlGeoWfs,
    KlSensorResources,
    EmergencyPoints,
    EvStations,
    KlEvents,
    KlEventsRis,
    KlGeoResources,
    WifiFreifunk,
    WifiLocal,
    WgaEvents,
    TtnGateway,
    Vrn,
}

impl PipelineType {
    pub const ALL: [PipelineType; 14] = [
        PipelineType::Osm,
        PipelineType::Wikipedia,
        PipelineType::KlGeoWfs,
        PipelineType::KlSensorResources,
        PipelineType::EmergencyPoints,
        PipelineType::EvStations,
        PipelineType::KlEvents,
        PipelineType::KlEventsRis,
        PipelineType::KlGeoResources,
        PipelineType::WifiFreifunk,
        PipelineType::WifiLocal,
        PipelineType::WgaEvents,
        PipelineType::TtnGateway,
        PipelineType::Vrn,
    ];

    /// Execution order when every pipeline is requested.
    pub const RUN_ALL_ORDER: [PipelineType; 12] = [
        PipelineType::EmergencyPoints,
        PipelineType::Vrn,
        PipelineType::KlEvents,
        PipelineType::KlEventsRis,
        PipelineType::WgaEvents,
        PipelineType::Osm,
        PipelineType::KlGeoWfs,
        PipelineType::WifiLocal,
        PipelineType::WifiFreifunk,
        PipelineType::KlGeoResources,
        PipelineType::KlSensorResources,
        PipelineType::Wikipedia,
    ];

    /// Section key in the resource configuration and run records
    pub fn key(&self) -> &'static str {
        match self {
            PipelineType::Osm => "osm_pipeline",
            PipelineType::Wikipedia => "wiki_pipeline",
            PipelineType::KlGeoWfs => "kl_wfs_pipeline",
            PipelineType::KlSensorResources => "kl_sensors_mqtt_pipeline",
            PipelineType::EmergencyPoints => "emergency_point_pipeline",
            PipelineType::EvStations => "ev_pipeline",
            PipelineType::KlEvents => "kl_event_calendar_pipeline",
            PipelineType::KlEventsRis => "kl_event_ris_calendar_pipeline",
            PipelineType::KlGeoResources => "kl_geo_pipeline",
            PipelineType::WifiFreifunk => "wifi_freifunk_pipeline",
            PipelineType::WifiLocal => "wifi_myspot_empera_pipeline",
            PipelineType::WgaEvents => "was_geht_app_pipeline",
            PipelineType::TtnGateway => "ttn_gateway_pipeline",
            PipelineType::Vrn => "vrn_pipeline",
        }
    }

    /// Short name accepted on the command line
    pub fn cli_name(&self) -> &'static str {
        match self {
            PipelineType::Osm => "osm",
            PipelineType::Wikipedia => "wiki",
            PipelineType::KlGeoWfs => "wfs",
            PipelineType::KlSensorResources => "sensors",
            PipelineType::EmergencyPoints => "emergency",
            PipelineType::EvStations => "ev",
            PipelineType::KlEvents => "miadi",
            PipelineType::KlEventsRis => "ris",
            PipelineType::KlGeoResources => "georesources",
            PipelineType::WifiFreifunk => "freifunk",
            PipelineType::WifiLocal => "wifilocal",
            PipelineType::WgaEvents => "wga",
            PipelineType::TtnGateway => "ttn",
            PipelineType::Vrn => "vrn",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineType::Osm => "OpenStreetMap features",
            PipelineType::Wikipedia => "Wikipedia tables",
            PipelineType::KlGeoWfs => "City WFS layers",
            PipelineType::KlSensorResources => "Environmental sensor catalog",
            PipelineType::EmergencyPoints => "Forest rescue points",
            PipelineType::EvStations => "EV charging stations",
            PipelineType::KlEvents => "City event calendar",
            PipelineType::KlEventsRis => "Council meeting calendar",
            PipelineType::KlGeoResources => "City geo resources",
            PipelineType::WifiFreifunk => "Freifunk WiFi nodes",
            PipelineType::WifiLocal => "Public WiFi hotspots",
            PipelineType::WgaEvents => "Was-geht-App events",
            PipelineType::TtnGateway => "TTN gateways",
            PipelineType::Vrn => "VRN bus stops",
        }
    }

    /// Resource variant every resource of this pipeline must be
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            PipelineType::KlGeoWfs => ResourceKind::SpatialService,
            PipelineType::Wikipedia => ResourceKind::PagedDocument,
            PipelineType::KlSensorResources | PipelineType::WifiLocal => ResourceKind::LocalFile,
            PipelineType::Osm => ResourceKind::ParametrizedQuery,
            _ => ResourceKind::RemoteFile,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }

    /// Accepts the short CLI name or the full key.
    pub fn from_cli_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        // "georesouces" is a historical misspelling still used by cron entries
        let name = if name == "georesouces" { "georesources".to_string() } else { name };
        Self::ALL
            .into_iter()
            .find(|p| p.cli_name() == name || p.key() == name)
    }
}

impl std::fmt::Display for PipelineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for PipelineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cli_name(s).ok_or_else(|| format!("unknown pipeline: {s}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_and_cli_names_unique() {
        let keys: HashSet<_> = PipelineType::ALL.iter().map(|p| p.key()).collect();
        let names: HashSet<_> = PipelineType::ALL.iter().map(|p| p.cli_name()).collect();
        assert_eq!(keys.len(), PipelineType::ALL.len());
        assert_eq!(names.len(), PipelineType::ALL.len());
    }

    #[test]
    fn test_lookup() {
        assert_eq!(PipelineType::from_key("ev_pipeline"), Some(PipelineType::EvStations));
        assert_eq!("wiki".parse::<PipelineType>().unwrap(), PipelineType::Wikipedia);
        assert_eq!("georesouces".parse::<PipelineType>().unwrap(), PipelineType::KlGeoResources);
        assert!("nope".parse::<PipelineType>().is_err());
    }

    #[test]
    fn test_resource_kinds() {
        assert_eq!(PipelineType::KlGeoWfs.resource_kind(), ResourceKind::SpatialService);
        assert_eq!(PipelineType::WifiLocal.resource_kind(), ResourceKind::LocalFile);
        assert_eq!(PipelineType::Osm.resource_kind(), ResourceKind::ParametrizedQuery);
        assert_eq!(PipelineType::Vrn.resource_kind(), ResourceKind::RemoteFile);
    }

    #[test]
    fn test_run_all_order_has_no_duplicates() {
        let set: HashSet<_> = PipelineType::RUN_ALL_ORDER.iter().collect();
        assert_eq!(set.len(), PipelineType::RUN_ALL_ORDER.len());
    }
}
