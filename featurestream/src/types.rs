//! Types de données pour le crate featurestream

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// Une feature brute, telle que lue dans le document
///
/// Tous les membres sont optionnels : la validation est faite en aval,
/// un membre absent ou `null` donne `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFeature {
    /// Type de l'objet (normalement "Feature")
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Géométrie (type + coordonnées)
    #[serde(default)]
    pub geometry: Option<RawGeometry>,

    /// Attributs de la feature (clé -> valeur JSON)
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

/// Géométrie brute d'une feature
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGeometry {
    /// Type de géométrie ("Point", "LineString", "Polygon", ...)
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Coordonnées, gardées sous forme de texte JSON
    ///
    /// Un nombre hors de la plage des f64 (`1e400`) reste lisible ici ;
    /// c'est à l'appelant de le rejeter.
    #[serde(default)]
    pub coordinates: Option<Box<RawValue>>,
}

impl PartialEq for RawGeometry {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.coordinates.as_ref().map(|c| c.get())
                == other.coordinates.as_ref().map(|c| c.get())
    }
}

impl RawFeature {
    /// Type de la géométrie, si présent
    pub fn geometry_type(&self) -> Option<&str> {
        self.geometry.as_ref()?.kind.as_deref()
    }

    /// Coordonnées de la géométrie, en texte JSON brut
    pub fn coordinates(&self) -> Option<&RawValue> {
        self.geometry.as_ref()?.coordinates.as_deref()
    }

    /// Position `[lon, lat, ...]` d'un Point ; l'altitude éventuelle est ignorée
    ///
    /// Retourne `None` si les deux premiers éléments ne sont pas des nombres.
    /// Un nombre trop grand pour un f64 donne une valeur infinie.
    pub fn position(&self) -> Option<(f64, f64)> {
        let elements: Vec<&RawValue> = serde_json::from_str(self.coordinates()?.get()).ok()?;
        let lon = ordinate(elements.first()?)?;
        let lat = ordinate(elements.get(1)?)?;
        Some((lon, lat))
    }

    /// Valeur d'un attribut
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.as_ref()?.get(key)
    }
}

/// Nombre JSON -> f64, sans échec sur dépassement
fn ordinate(raw: &RawValue) -> Option<f64> {
    let text = raw.get();
    match text.as_bytes().first() {
        Some(b'-' | b'0'..=b'9') => text.parse().ok(),
        _ => None,
    }
}
