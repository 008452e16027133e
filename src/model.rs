use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::seen::normalize_id;

/// Keys that may carry a lot identifier in listing payloads, in priority order.
const LOT_ID_KEYS: &[&str] = &["lotLelangId", "id"];

/// One entry of the listing endpoint's `data` array. Apart from the
/// identifier the shape is left raw; the normalizer probes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub id: String,
    pub raw: Value,
}

impl Lot {
    /// Build a lot from a listing entry; `None` when no usable id is present.
    pub fn from_value(raw: Value) -> Option<Self> {
        let id = LOT_ID_KEYS
            .iter()
            .filter_map(|k| raw.get(*k))
            .find_map(normalize_id)?;
        Some(Self { id, raw })
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Name of the organizing unit, used by the keyword filter.
    pub fn organizer(&self) -> &str {
        self.str_field("namaUnitKerja").unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        self.str_field("namaLotLelang").unwrap_or("(tanpa judul)")
    }
}

/// The detail endpoint's `data` object for one lot.
#[derive(Debug, Clone, PartialEq)]
pub struct LotDetail {
    pub id: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// One item (barang) inside a lot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: Option<String>,
    pub year: Option<String>,
    pub color: Option<String>,
    pub chassis_number: Option<String>,
    pub plate_number: Option<String>,
    pub ownership_proof: Option<String>,
    pub ownership_number: Option<String>,
}

/// A photo with the URLs worth trying, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub candidates: Vec<Url>,
    pub is_cover: bool,
}

/// Schema-independent view of a lot, ready for composing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalFields {
    pub id: String,
    pub title: String,
    pub location: Option<String>,
    pub unit_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit_price: Option<f64>,
    pub deposit: Option<f64>,
    pub bidding_method: Option<String>,
    pub view_count: Option<String>,
    pub seller: Seller,
    pub organizer: Organizer,
    pub items: Vec<Item>,
    pub photos: Vec<Photo>,
    pub link: String,
}

impl CanonicalFields {
    /// The photo to deliver: the cover if flagged, else the first one.
    pub fn cover(&self) -> Option<&Photo> {
        self.photos
            .iter()
            .find(|p| p.is_cover)
            .or_else(|| self.photos.first())
    }
}

/// Terminal delivery state of one lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationResult {
    SentWithPhoto,
    SentTextOnly,
    Failed,
}

impl NotificationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationResult::SentWithPhoto => "sent_with_photo",
            NotificationResult::SentTextOnly => "sent_text_only",
            NotificationResult::Failed => "failed",
        }
    }

    pub fn delivered(&self) -> bool {
        !matches!(self, NotificationResult::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lot_id_prefers_lot_lelang_id_and_normalizes_numbers() {
        let lot = Lot::from_value(json!({ "lotLelangId": 42, "id": "other" })).unwrap();
        assert_eq!(lot.id, "42");
        let lot = Lot::from_value(json!({ "lotLelangId": null, "id": " abc " })).unwrap();
        assert_eq!(lot.id, "abc");
        assert!(Lot::from_value(json!({ "namaLotLelang": "x" })).is_none());
    }

    #[test]
    fn cover_prefers_flagged_photo() {
        let url = |s: &str| Url::parse(s).unwrap();
        let mut fields = CanonicalFields::default();
        assert!(fields.cover().is_none());
        fields.photos = vec![
            Photo { candidates: vec![url("https://a/1.jpg")], is_cover: false },
            Photo { candidates: vec![url("https://a/2.jpg")], is_cover: true },
        ];
        assert_eq!(fields.cover().unwrap().candidates[0].as_str(), "https://a/2.jpg");
        fields.photos[1].is_cover = false;
        assert_eq!(fields.cover().unwrap().candidates[0].as_str(), "https://a/1.jpg");
    }
}
