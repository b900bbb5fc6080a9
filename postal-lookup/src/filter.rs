//! Filtrage et normalisation des features
//!
//! Fonction pure `RawFeature -> NormalizedRecord | SkipReason`, sans effet
//! de bord. Une feature mal formée donne une raison de rejet, jamais une
//! erreur.

use std::fmt;

use featurestream::RawFeature;
use serde::Serialize;
use serde_json::Value;

/// Clé d'attribut par défaut pour le code postal (tag OSM)
pub const DEFAULT_POSTAL_KEY: &str = "addr:postcode";

/// Raison de rejet d'une feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Géométrie absente ou autre que Point
    NonPointGeometry,
    /// Attribut code postal absent ou vide
    MissingPostcode,
    /// Coordonnées absentes ou non numériques
    MissingCoordinates,
    /// Coordonnées numériques hors des bornes WGS84
    OutOfRangeCoordinates,
}

impl SkipReason {
    pub const ALL: [SkipReason; 4] = [
        SkipReason::NonPointGeometry,
        SkipReason::MissingPostcode,
        SkipReason::MissingCoordinates,
        SkipReason::OutOfRangeCoordinates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NonPointGeometry => "non-point-geometry",
            SkipReason::MissingPostcode => "missing-postcode",
            SkipReason::MissingCoordinates => "missing-coordinates",
            SkipReason::OutOfRangeCoordinates => "out-of-range-coordinates",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enregistrement normalisé, prêt à être chargé
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    postcode: String,
    lat: f64,
    lon: f64,
}

impl NormalizedRecord {
    /// Construit un enregistrement en vérifiant ses invariants
    ///
    /// Le code postal doit être non vide, la latitude dans [-90, 90] et la
    /// longitude dans [-180, 180].
    pub fn new(postcode: impl Into<String>, lat: f64, lon: f64) -> Result<Self, SkipReason> {
        let postcode = postcode.into();
        if postcode.trim().is_empty() {
            return Err(SkipReason::MissingPostcode);
        }
        if !lat.is_finite()
            || !lon.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lon)
        {
            return Err(SkipReason::OutOfRangeCoordinates);
        }
        Ok(Self { postcode, lat, lon })
    }

    pub fn postcode(&self) -> &str {
        &self.postcode
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

/// Filtre des features, construit une fois depuis la configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFilter {
    postal_key: String,
}

impl Default for FeatureFilter {
    fn default() -> Self {
        Self::new(DEFAULT_POSTAL_KEY)
    }
}

impl FeatureFilter {
    pub fn new(postal_key: impl Into<String>) -> Self {
        Self {
            postal_key: postal_key.into(),
        }
    }

    pub fn postal_key(&self) -> &str {
        &self.postal_key
    }

    /// Applique les règles, dans l'ordre :
    /// 1. géométrie Point
    /// 2. code postal présent et non vide
    /// 3. latitude et longitude numériques
    /// 4. code postal assaini
    pub fn apply(&self, feature: &RawFeature) -> Result<NormalizedRecord, SkipReason> {
        if feature.geometry_type() != Some("Point") {
            return Err(SkipReason::NonPointGeometry);
        }

        let raw_postcode = feature
            .property(&self.postal_key)
            .and_then(postcode_text)
            .ok_or(SkipReason::MissingPostcode)?;

        let (lon, lat) = feature
            .position()
            .ok_or(SkipReason::MissingCoordinates)?;

        NormalizedRecord::new(sanitize_postcode(&raw_postcode), lat, lon)
    }
}

/// Texte du code postal : chaîne non vide, ou entier rendu en décimal
fn postcode_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    }
}

/// Retire les apostrophes et caractères de contrôle d'un code postal
pub fn sanitize_postcode(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\'' && !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(value: Value) -> RawFeature {
        serde_json::from_str(&value.to_string()).unwrap()
    }

    fn point(coords: Value, properties: Value) -> RawFeature {
        feature(json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": coords},
            "properties": properties
        }))
    }

    #[test]
    fn test_valid_point() {
        let f = point(json!([-73.99, 40.75]), json!({"addr:postcode": "10001"}));
        let record = FeatureFilter::default().apply(&f).unwrap();

        assert_eq!(record.postcode(), "10001");
        assert_eq!(record.lat(), 40.75);
        assert_eq!(record.lon(), -73.99);
    }

    #[test]
    fn test_non_point_geometry() {
        let polygon = feature(json!({
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [0, 0]]]},
            "properties": {"addr:postcode": "99999"}
        }));
        let no_geometry = feature(json!({"geometry": null, "properties": {"addr:postcode": "1"}}));
        let untyped = feature(json!({"geometry": {"coordinates": [1, 2]}}));

        let filter = FeatureFilter::default();
        for f in [polygon, no_geometry, untyped] {
            assert_eq!(filter.apply(&f), Err(SkipReason::NonPointGeometry));
        }
    }

    #[test]
    fn test_geometry_checked_before_postcode() {
        let f = feature(json!({"geometry": {"type": "LineString", "coordinates": []}}));
        assert_eq!(
            FeatureFilter::default().apply(&f),
            Err(SkipReason::NonPointGeometry)
        );
    }

    #[test]
    fn test_missing_postcode() {
        let filter = FeatureFilter::default();
        let cases = [
            json!({}),
            json!({"addr:postcode": ""}),
            json!({"addr:postcode": "   "}),
            json!({"addr:postcode": null}),
            json!({"addr:postcode": ["10001"]}),
            json!({"addr:postcode": 10.5}),
            json!({"postal_code": "10001"}),
        ];
        for props in cases {
            let f = point(json!([2.35, 48.85]), props);
            assert_eq!(filter.apply(&f), Err(SkipReason::MissingPostcode));
        }

        let no_properties = feature(json!({
            "geometry": {"type": "Point", "coordinates": [2.35, 48.85]}
        }));
        assert_eq!(filter.apply(&no_properties), Err(SkipReason::MissingPostcode));
    }

    #[test]
    fn test_postcode_checked_before_coordinates() {
        let f = feature(json!({"geometry": {"type": "Point"}, "properties": {}}));
        assert_eq!(
            FeatureFilter::default().apply(&f),
            Err(SkipReason::MissingPostcode)
        );
    }

    #[test]
    fn test_missing_coordinates() {
        let filter = FeatureFilter::default();
        let props = json!({"addr:postcode": "10001"});
        for coords in [
            json!(null),
            json!([]),
            json!([2.35]),
            json!(["2.35", "48.85"]),
            json!({"lon": 2.35, "lat": 48.85}),
            json!([[2.35, 48.85]]),
        ] {
            let f = point(coords, props.clone());
            assert_eq!(filter.apply(&f), Err(SkipReason::MissingCoordinates));
        }
    }

    #[test]
    fn test_out_of_range_coordinates() {
        let filter = FeatureFilter::default();
        let props = json!({"addr:postcode": "10001"});
        for coords in [json!([2.35, 91.0]), json!([-180.5, 0.0])] {
            let f = point(coords, props.clone());
            assert_eq!(filter.apply(&f), Err(SkipReason::OutOfRangeCoordinates));
        }
    }

    #[test]
    fn test_overflowing_coordinates_are_out_of_range() {
        let f: RawFeature = serde_json::from_str(
            r#"{"geometry": {"type": "Point", "coordinates": [1e400, 48.0]},
                "properties": {"addr:postcode": "10001"}}"#,
        )
        .unwrap();
        assert_eq!(
            FeatureFilter::default().apply(&f),
            Err(SkipReason::OutOfRangeCoordinates)
        );
    }

    #[test]
    fn test_elevation_is_ignored() {
        let f = point(json!([2.35, 48.85, 35.0]), json!({"addr:postcode": "75001"}));
        let record = FeatureFilter::default().apply(&f).unwrap();
        assert_eq!((record.lon(), record.lat()), (2.35, 48.85));
    }

    #[test]
    fn test_integer_coordinates_and_postcode() {
        let f = point(json!([2, 48]), json!({"addr:postcode": 38000}));
        let record = FeatureFilter::default().apply(&f).unwrap();
        assert_eq!(record.postcode(), "38000");
        assert_eq!(record.lat(), 48.0);
    }

    #[test]
    fn test_postcode_is_trimmed() {
        let f = point(json!([2.35, 48.85]), json!({"addr:postcode": "  75001 "}));
        assert_eq!(FeatureFilter::default().apply(&f).unwrap().postcode(), "75001");
    }

    #[test]
    fn test_quotes_are_removed() {
        let f = point(json!([2.35, 48.85]), json!({"addr:postcode": "O'Hare'' 60666"}));
        assert_eq!(
            FeatureFilter::default().apply(&f).unwrap().postcode(),
            "OHare 60666"
        );
    }

    #[test]
    fn test_only_quotes_is_missing() {
        let f = point(json!([2.35, 48.85]), json!({"addr:postcode": "''"}));
        assert_eq!(
            FeatureFilter::default().apply(&f),
            Err(SkipReason::MissingPostcode)
        );
    }

    #[test]
    fn test_custom_postal_key() {
        let filter = FeatureFilter::new("postal_code");
        let f = point(json!([2.35, 48.85]), json!({"postal_code": "75002"}));
        assert_eq!(filter.apply(&f).unwrap().postcode(), "75002");

        let f = point(json!([2.35, 48.85]), json!({"addr:postcode": "75002"}));
        assert_eq!(filter.apply(&f), Err(SkipReason::MissingPostcode));
    }

    #[test]
    fn test_sanitize_postcode() {
        assert_eq!(sanitize_postcode("10001"), "10001");
        assert_eq!(sanitize_postcode("'10001'"), "10001");
        assert_eq!(sanitize_postcode("SW1A\n1AA"), "SW1A1AA");
        assert_eq!(sanitize_postcode("a\u{0}b"), "ab");
        assert_eq!(sanitize_postcode(" ' "), "");
    }

    #[test]
    fn test_normalized_record_invariants() {
        assert!(NormalizedRecord::new("1", 90.0, 180.0).is_ok());
        assert!(NormalizedRecord::new("1", -90.0, -180.0).is_ok());
        assert_eq!(
            NormalizedRecord::new("", 0.0, 0.0),
            Err(SkipReason::MissingPostcode)
        );
        assert_eq!(
            NormalizedRecord::new("1", f64::NAN, 0.0),
            Err(SkipReason::OutOfRangeCoordinates)
        );
    }

    #[test]
    fn test_skip_reason_names() {
        let names: Vec<_> = SkipReason::ALL.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "non-point-geometry",
                "missing-postcode",
                "missing-coordinates",
                "out-of-range-coordinates"
            ]
        );
        assert_eq!(
            serde_json::to_string(&SkipReason::MissingPostcode).unwrap(),
            "\"missing-postcode\""
        );
    }
}
