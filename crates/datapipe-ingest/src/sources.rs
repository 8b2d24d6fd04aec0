//! Transform settings of the individual data providers
//!
//! Everything provider-specific lives here as data: column renames, date
//! formats, value translations and row filters. The transformers themselves
//! are generic.

use std::sync::Arc;

use crate::pipeline_type::PipelineType;
use crate::transform::{
    DelimitedTableTransformer, GeoJsonTransformer, JsonRecordsTransformer, OverpassTransformer,
    RecordMapping, RowTransformer, SensorCatalogTransformer,
};

/// Default accepted values of the EV `city_filter` option
pub const EV_DEFAULT_DISTRICTS: &[&str] = &["Kreisfreie Stadt Kaiserslautern", "Landkreis Kaiserslautern"];

/// Default accepted value of the rescue point `region_filter` option
pub const EMERGENCY_DEFAULT_STATE: &[&str] = &["Rheinland-Pfalz"];

const CALENDAR_DATETIME: &str = "%d.%m.%Y %H:%M:%S";

/// Transformer of the given pipeline
pub fn transformer(pipeline: PipelineType) -> Arc<dyn RowTransformer> {
    match pipeline {
        PipelineType::Osm => Arc::new(OverpassTransformer::default()),
        PipelineType::Wikipedia => Arc::new(wiki_tables()),
        PipelineType::KlGeoWfs => Arc::new(city_wfs_layers()),
        PipelineType::KlSensorResources => Arc::new(SensorCatalogTransformer),
        PipelineType::EmergencyPoints => Arc::new(rescue_points()),
        PipelineType::EvStations => Arc::new(ev_stations()),
        PipelineType::KlEvents | PipelineType::KlEventsRis => Arc::new(event_calendar()),
        PipelineType::KlGeoResources => Arc::new(city_geo_resources()),
        PipelineType::WifiFreifunk => Arc::new(freifunk_nodes()),
        PipelineType::WifiLocal => Arc::new(wifi_hotspots()),
        PipelineType::WgaEvents => Arc::new(wga_events()),
        PipelineType::TtnGateway => Arc::new(ttn_gateways()),
        PipelineType::Vrn => Arc::new(vrn_stops()),
    }
}

fn ev_stations() -> DelimitedTableTransformer {
    let mut mapping = RecordMapping::new()
        .require(&["Breitengrad", "Längengrad", "Kreis/kreisfreie Stadt"])
        .renames(&[
            ("Betreiber", "operator"),
            ("Anzeigename (Karte)", "display_name"),
            ("Straße", "street"),
            ("Hausnummer", "house_number"),
            ("Adresszusatz", "address_addition"),
            ("Postleitzahl", "postal_code"),
            ("Ort", "city"),
            ("Kreis/kreisfreie Stadt", "district"),
            ("Bundesland", "state"),
            ("Breitengrad", "latitude"),
            ("Längengrad", "longitude"),
            ("Inbetriebnahmedatum", "commissioning_date"),
            ("Nennleistung Ladeeinrichtung [kW]", "nominal_power"),
            ("Art der Ladeeinrichtung", "charging_type"),
            ("Anzahl Ladepunkte", "num_charging_points"),
        ]);
    let mut power_fields = Vec::new();
    for i in 1..=6 {
        mapping = mapping
            .rename(&format!("Steckertypen{i}"), &format!("socket_type_{i}"))
            .rename(&format!("Nennleistung Stecker{i}"), &format!("power_output_{i}"))
            .rename(&format!("Public Key{i}"), &format!("public_key_{i}"));
        power_fields.push(format!("power_output_{i}"));
    }
    let power_fields: Vec<&str> = power_fields.iter().map(String::as_str).collect();

    let mapping = mapping
        .option_filter("district", "city_filter", EV_DEFAULT_DISTRICTS)
        .integers(&["num_charging_points"])
        .decimals(&power_fields)
        .decimals(&["nominal_power"])
        .date("commissioning_date", &["%d.%m.%Y", "%Y-%m-%d"])
        .point("longitude", "latitude");

    DelimitedTableTransformer::new(b';', mapping)
        .skip_rows(10)
        .date_from_preamble("Letzte Aktualisierung vom")
}

fn rescue_points() -> DelimitedTableTransformer {
    let mapping = RecordMapping::new()
        .require(&["WGS_Breite", "WGS_Laenge"])
        .renames(&[
            ("RP_Nr", "rp_nr"),
            ("Ortsbeschr", "description"),
            ("Schild", "information_sign"),
            ("Urheber", "originator"),
            ("Bundesland", "federal_state"),
        ])
        .option_filter("federal_state", "region_filter", EMERGENCY_DEFAULT_STATE)
        .point("WGS_Laenge", "WGS_Breite");
    DelimitedTableTransformer::new(b';', mapping)
}

fn vrn_stops() -> DelimitedTableTransformer {
    let mapping = RecordMapping::new()
        .require(&["GlobaleID", "Lat", "Lon"])
        .renames(&[
            ("GlobaleID", "global_id"),
            ("Name", "name"),
            ("Steig GlobaleID", "platform_global_id"),
            ("Lat", "latitude"),
            ("Lon", "longitude"),
            ("Haltestellennummer", "station_number"),
            ("Richtung", "direction"),
            ("Linien", "lines"),
            ("Sitzgelegenheit", "seating"),
            ("Abfallbehaelter", "waste_bin"),
            ("Beleuchtung", "lighting"),
        ])
        .translate(&["seating", "waste_bin", "lighting"], &[("J", "Ja"), ("N", "Nein")])
        .point("longitude", "latitude");
    DelimitedTableTransformer::new(b';', mapping)
}

fn event_calendar() -> DelimitedTableTransformer {
    let mapping = RecordMapping::new()
        .require(&["id"])
        .drop_columns(&["index"])
        .rename("id", "event_id")
        .datetime("dstart", &[CALENDAR_DATETIME])
        .datetime("dend", &[CALENDAR_DATETIME])
        .datetime("created", &[CALENDAR_DATETIME])
        .datetime("updated", &[CALENDAR_DATETIME]);
    DelimitedTableTransformer::new(b';', mapping)
}

fn wga_events() -> DelimitedTableTransformer {
    let mapping = RecordMapping::new()
        .require(&["id", "datum"])
        .drop_columns(&["index"])
        .renames(&[
            ("id", "event_id"),
            ("titel", "title"),
            ("datum", "date"),
            ("zeit", "time"),
            ("kategorie", "category"),
            ("subtitel", "subtitle"),
            ("beschreibung", "description"),
            ("ort", "city"),
            ("plz", "postal_code"),
            ("strasse", "street"),
            ("location_bild", "location_image"),
            ("lat", "latitude"),
            ("lng", "longitude"),
            ("url", "event_url"),
            ("youtube", "youtube_video"),
            ("groupid", "group_id"),
            ("datum_iso", "date_iso"),
        ])
        .dedupe_on("event_id")
        .date("date", &["%d.%m.%Y"]);
    DelimitedTableTransformer::new(b';', mapping)
}

fn wifi_hotspots() -> DelimitedTableTransformer {
    let mapping = RecordMapping::new()
        .require(&["Latitude", "Longitude"])
        .renames(&[("Standortname", "name"), ("Name", "name")])
        .keep(&["name"])
        .point("Longitude", "Latitude");
    DelimitedTableTransformer::new(b';', mapping)
}

fn wiki_tables() -> DelimitedTableTransformer {
    let mapping = RecordMapping::new()
        .drop_columns(&["id"])
        .renames(&[("address_name", "address"), ("loc_address_text", "address")])
        .location_pair("loc_address_location");
    DelimitedTableTransformer::new(b';', mapping)
}

fn freifunk_nodes() -> JsonRecordsTransformer {
    JsonRecordsTransformer::new(
        "/nodes",
        RecordMapping::new()
            .rename("hostname", "name")
            .drop_if_null(&["name"])
            .keep(&["name"])
            .point("location.longitude", "location.latitude"),
    )
}

fn ttn_gateways() -> JsonRecordsTransformer {
    JsonRecordsTransformer::new(
        "",
        RecordMapping::new()
            .renames(&[
                ("id", "gateway_id"),
                ("netID", "net_id"),
                ("tenantID", "tenant_id"),
                ("clusterID", "cluster_id"),
                ("updatedAt", "updated_at"),
                ("antennaPlacement", "antenna_placement"),
                ("antennaCount", "antenna_count"),
            ])
            .integers(&["antenna_count"])
            .point("location.longitude", "location.latitude"),
    )
}

fn city_wfs_layers() -> GeoJsonTransformer {
    GeoJsonTransformer::new(RecordMapping::new())
        .with_model(
            "kl_construction_sites",
            RecordMapping::new()
                .date("baustart", &["%Y-%m-%d"])
                .date("bauende", &["%Y-%m-%d"]),
        )
        .with_model("kl_land_use_plans", RecordMapping::new().rename("id", "kl_id"))
        .with_model(
            "kl_educational_institutions",
            RecordMapping::new()
                .renames(&[
                    ("bildungs", "education_type"),
                    ("bildung0", "education_subtype"),
                    ("erw_name", "extended_name"),
                    ("adresse", "address"),
                    ("plz", "postal_code"),
                    ("ort", "city"),
                    ("internet", "website_url"),
                ])
                .keep(&[
                    "gml_id",
                    "gid",
                    "education_type",
                    "education_subtype",
                    "name",
                    "extended_name",
                    "address",
                    "postal_code",
                    "city",
                    "website_url",
                ]),
        )
        .with_model(
            "kl_sculptures",
            RecordMapping::new()
                .renames(&[
                    ("foto", "photo_url"),
                    ("kuenstler", "artist"),
                    ("entstehung", "year_created"),
                    ("quelle", "source"),
                    ("kategorie", "category"),
                    ("standort", "location_name"),
                ])
                .keep(&[
                    "gml_id",
                    "gid",
                    "photo_url",
                    "name",
                    "artist",
                    "year_created",
                    "source",
                    "category",
                    "location_name",
                ]),
        )
}

fn city_geo_resources() -> GeoJsonTransformer {
    GeoJsonTransformer::new(RecordMapping::new())
        .with_model("kl_parking_locations", RecordMapping::new().exclude("type", "city"))
        .with_model(
            "kl_playgrounds",
            RecordMapping::new().renames(&[("Name", "name"), ("Strasse", "street")]),
        )
}
