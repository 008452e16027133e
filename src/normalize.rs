//! Extraction of canonical lot fields from listing and detail payloads.
//!
//! The source API has renamed and re-nested its fields several times. Each
//! canonical field therefore has an ordered list of dotted key paths; the
//! first path holding a non-empty value wins. Detail payloads are probed
//! before the listing entry.
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;

use crate::config::{Config, ConfigError};
use crate::model::{CanonicalFields, Item, Lot, LotDetail, Organizer, Photo, Seller};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Location,
    UnitId,
    Start,
    End,
    LimitPrice,
    Deposit,
    BiddingMethod,
    ViewCount,
    SellerName,
    SellerPhone,
    SellerAddress,
    SellerCity,
    SellerProvince,
    OrganizerName,
    OrganizerPhone,
    OrganizerAddress,
}

/// Field → candidate key paths, in priority order.
pub const FIELD_TABLE: &[(Field, &[&str])] = &[
    (Field::Title, &["namaLotLelang", "judulLot", "content.namaLotLelang", "content.lot.namaLotLelang", "lotLelang.namaLotLelang"]),
    (Field::Location, &["namaLokasi", "alamatBarang", "lokasi", "lokasiBarang", "content.lot.namaLokasi", "content.lokasi"]),
    (Field::UnitId, &["unitKerjaId", "unitKerja.id", "content.unitKerjaId", "content.organizer.id"]),
    (Field::Start, &["tglMulaiLelang", "tanggalMulaiLelang", "tanggalLelang", "content.tglMulaiLelang", "content.lot.tglMulaiLelang"]),
    (Field::End, &["tglSelesaiLelang", "tanggalSelesaiLelang", "batasAkhirPenawaran", "content.tglSelesaiLelang", "content.lot.tglSelesaiLelang"]),
    (Field::LimitPrice, &["nilaiLimit", "hargaLimit", "content.nilaiLimit", "content.lot.nilaiLimit"]),
    (Field::Deposit, &["uangJaminan", "nilaiJaminan", "content.uangJaminan", "content.lot.uangJaminan"]),
    (Field::BiddingMethod, &["caraPenawaran", "metodePenawaran", "jenisPenawaran", "content.caraPenawaran", "content.lot.caraPenawaran"]),
    (Field::ViewCount, &["jumlahView", "viewCount", "totalView", "jumlahDilihat", "content.viewCount"]),
    (Field::SellerName, &["namaOrganisasiPenjual", "namaPenjual", "content.seller.namaOrganisasi", "content.seller.nama", "content.seller.name", "penjual.nama", "seller.name"]),
    (Field::SellerPhone, &["nomorTeleponPenjual", "teleponPenjual", "noTelpPenjual", "content.seller.telepon", "content.seller.phone", "penjual.telepon"]),
    (Field::SellerAddress, &["alamatPenjual", "content.seller.alamat", "content.seller.address", "penjual.alamat"]),
    (Field::SellerCity, &["kotaPenjual", "namaKotaPenjual", "content.seller.kota", "content.seller.namaKota", "penjual.kota"]),
    (Field::SellerProvince, &["provinsiPenjual", "namaProvinsiPenjual", "content.seller.provinsi", "content.seller.namaProvinsi", "penjual.provinsi"]),
    (Field::OrganizerName, &["namaUnitKerja", "unitKerja.nama", "unitKerja.namaUnitKerja", "content.organizer.nama", "namaPenyelenggara", "penyelenggara.nama"]),
    (Field::OrganizerPhone, &["teleponUnitKerja", "unitKerja.telepon", "content.organizer.telepon", "penyelenggara.telepon"]),
    (Field::OrganizerAddress, &["alamatUnitKerja", "unitKerja.alamat", "content.organizer.alamat", "penyelenggara.alamat"]),
];

/// Where the item (barang) array may live.
const ITEM_LISTS: &[&str] = &["content.barangs", "content.lot.barang", "barangs", "barang", "lotLelang.barangs"];

/// Per-item candidate paths, relative to one item object.
const ITEM_NAME: &[&str] = &["namaBarang", "nama", "uraianBarang", "uraian"];
const ITEM_YEAR: &[&str] = &["tahun", "tahunPembuatan", "detail.tahun"];
const ITEM_COLOR: &[&str] = &["warna", "detail.warna"];
const ITEM_CHASSIS: &[&str] = &["nomorRangka", "noRangka", "detail.nomorRangka"];
const ITEM_PLATE: &[&str] = &["nomorPolisi", "noPolisi", "nopol", "detail.nomorPolisi"];
const ITEM_PROOF: &[&str] = &["jenisBuktiKepemilikan", "buktiKepemilikan", "detail.buktiKepemilikan"];
const ITEM_PROOF_NUMBER: &[&str] = &["nomorBuktiKepemilikan", "noBuktiKepemilikan", "noBpkb", "detail.nomorBuktiKepemilikan"];

const PHOTO_LISTS: &[&str] = &["photos", "content.photos", "content.lot.photos", "fotos", "lotLelang.photos"];
const PHOTO_URL: &[&str] = &["file.fileUrl", "fileUrl", "url", "file.url"];
const PHOTO_COVER: &[&str] = &["iscover", "isCover", "is_cover", "cover"];

/// Objects whose presence alone means the seller block was served.
const SELLER_BLOCKS: &[&str] = &["content.seller", "penjual", "seller"];

static NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9,.\-]").expect("valid regex"));
static DOT_GROUPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d{1,3}(\.\d{3})+(,\d+)?$").expect("valid regex"));
static COMMA_GROUPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d{1,3}(,\d{3})+(\.\d+)?$").expect("valid regex"));

pub fn paths_for(field: Field) -> &'static [&'static str] {
    FIELD_TABLE
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, paths)| *paths)
        .unwrap_or(&[])
}

/// Walk a dotted path through nested objects.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, key| node.get(key))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a money-like value: numbers pass through, strings may carry a
/// currency prefix and `.`/`,` thousands separators.
pub fn as_money(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_money(s),
        _ => None,
    }
}

fn parse_money(raw: &str) -> Option<f64> {
    let cleaned = NON_NUMERIC.replace_all(raw.trim(), "");
    if cleaned.is_empty() {
        return None;
    }
    let normalized = if DOT_GROUPED.is_match(&cleaned) || (cleaned.contains(',') && !COMMA_GROUPED.is_match(&cleaned)) {
        // Indonesian notation: `.` groups thousands, `,` marks decimals.
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', "")
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn as_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "y"),
        _ => false,
    }
}

/// First non-empty text under any candidate path, probing roots in order.
pub fn first_text(roots: &[&Value], paths: &[&str]) -> Option<String> {
    roots
        .iter()
        .flat_map(|root| paths.iter().filter_map(move |p| lookup(root, p)))
        .find_map(as_text)
}

fn first_money(roots: &[&Value], paths: &[&str]) -> Option<f64> {
    roots
        .iter()
        .flat_map(|root| paths.iter().filter_map(move |p| lookup(root, p)))
        .find_map(as_money)
}

/// First non-empty array under any candidate path. A lone object is
/// treated as a one-element list.
fn first_list<'a>(roots: &[&'a Value], paths: &[&str]) -> Vec<&'a Value> {
    for &root in roots {
        for path in paths {
            match lookup(root, path) {
                Some(Value::Array(items)) if !items.is_empty() => return items.iter().collect(),
                Some(obj @ Value::Object(map)) if !map.is_empty() => return vec![obj],
                _ => {}
            }
        }
    }
    Vec::new()
}

pub fn probe(field: Field, roots: &[&Value]) -> Option<String> {
    first_text(roots, paths_for(field))
}

/// True when a detail payload carries seller information.
pub fn has_seller(raw: &Value) -> bool {
    probe(Field::SellerName, &[raw]).is_some()
        || SELLER_BLOCKS
            .iter()
            .filter_map(|p| lookup(raw, p))
            .any(|v| v.as_object().is_some_and(|m| !m.is_empty()))
}

/// Resolve a photo reference to absolute URLs: absolute references pass
/// through, host-relative ones are joined to every configured host.
pub fn resolve_photo_url(raw: &str, hosts: &[Url]) -> Vec<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Ok(url) = Url::parse(raw) {
        return match url.scheme() {
            "http" | "https" => vec![url],
            _ => Vec::new(),
        };
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).into_iter().collect();
    }

    let path = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };
    let mut out: Vec<Url> = Vec::new();
    for host in hosts {
        if let Ok(url) = host.join(&path) {
            if !out.contains(&url) {
                out.push(url);
            }
        }
    }
    out
}

/// Turns a listing entry plus optional detail into [`CanonicalFields`].
#[derive(Debug, Clone)]
pub struct Normalizer {
    site_url: Url,
    photo_hosts: Vec<Url>,
}

impl Normalizer {
    pub fn new(site_url: Url, photo_hosts: Vec<Url>) -> Self {
        Self { site_url, photo_hosts }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(cfg.site_url()?, cfg.photo_hosts()?))
    }

    pub fn normalize(&self, lot: &Lot, detail: Option<&LotDetail>) -> CanonicalFields {
        let roots: Vec<&Value> = detail.map(|d| &d.raw).into_iter().chain([&lot.raw]).collect();
        let text = |field| probe(field, &roots);

        let unit_id = text(Field::UnitId);
        let link = self.lot_link(&lot.id, unit_id.as_deref());

        CanonicalFields {
            id: lot.id.clone(),
            title: text(Field::Title).unwrap_or_else(|| "(tanpa judul)".to_string()),
            location: text(Field::Location),
            start: text(Field::Start),
            end: text(Field::End),
            limit_price: first_money(&roots, paths_for(Field::LimitPrice)),
            deposit: first_money(&roots, paths_for(Field::Deposit)),
            bidding_method: text(Field::BiddingMethod),
            view_count: text(Field::ViewCount),
            seller: Seller {
                name: text(Field::SellerName),
                phone: text(Field::SellerPhone),
                address: text(Field::SellerAddress),
                city: text(Field::SellerCity),
                province: text(Field::SellerProvince),
            },
            organizer: Organizer {
                name: text(Field::OrganizerName),
                phone: text(Field::OrganizerPhone),
                address: text(Field::OrganizerAddress),
            },
            items: first_list(&roots, ITEM_LISTS).into_iter().map(extract_item).collect(),
            photos: self.extract_photos(&roots),
            unit_id,
            link,
        }
    }

    fn lot_link(&self, id: &str, unit_id: Option<&str>) -> String {
        let site = self.site_url.as_str().trim_end_matches('/');
        match unit_id {
            Some(unit) => format!("{site}/kpknl/{unit}/detail-auction/{id}"),
            None => format!("{site}/lot-lelang/{id}"),
        }
    }

    fn extract_photos(&self, roots: &[&Value]) -> Vec<Photo> {
        first_list(roots, PHOTO_LISTS)
            .into_iter()
            .filter_map(|p| {
                let raw_url = first_text(&[p], PHOTO_URL)?;
                let candidates = resolve_photo_url(&raw_url, &self.photo_hosts);
                if candidates.is_empty() {
                    return None;
                }
                let is_cover = PHOTO_COVER
                    .iter()
                    .filter_map(|k| lookup(p, k))
                    .any(as_flag);
                Some(Photo { candidates, is_cover })
            })
            .collect()
    }
}

fn extract_item(raw: &Value) -> Item {
    let roots = [raw];
    Item {
        name: first_text(&roots, ITEM_NAME),
        year: first_text(&roots, ITEM_YEAR),
        color: first_text(&roots, ITEM_COLOR),
        chassis_number: first_text(&roots, ITEM_CHASSIS),
        plate_number: first_text(&roots, ITEM_PLATE),
        ownership_proof: first_text(&roots, ITEM_PROOF),
        ownership_number: first_text(&roots, ITEM_PROOF_NUMBER),
    }
}
