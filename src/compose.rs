//! Rendering of canonical lot fields into a Telegram HTML message.
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use teloxide::utils::html::escape;

use crate::model::{CanonicalFields, Item, Photo};

/// Appended to a caption that was cut short.
pub const ELLIPSIS: &str = "\n…";

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// A composed notification for one lot.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Complete text, used for text-only delivery and the follow-up.
    pub text: String,
    /// Caption for the photo, at most the configured limit.
    pub photo_caption: String,
    /// When true the full text must follow a successful photo.
    pub truncated: bool,
    pub photo: Option<Photo>,
}

#[derive(Debug, Clone)]
pub struct Composer {
    caption_limit: usize,
}

impl Composer {
    pub fn new(caption_limit: usize) -> Self {
        Self {
            caption_limit: caption_limit.max(ELLIPSIS.chars().count() + 1),
        }
    }

    pub fn caption_limit(&self) -> usize {
        self.caption_limit
    }

    pub fn compose(&self, fields: &CanonicalFields) -> Message {
        let text = render(fields);
        let (photo_caption, truncated) = truncate_caption(&text, self.caption_limit);
        Message {
            text,
            photo_caption,
            truncated,
            photo: fields.cover().cloned(),
        }
    }
}

fn render(f: &CanonicalFields) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("🔔 <b>Lelang baru: {}</b>", escape(&f.title)));
    if let Some(org) = &f.organizer.name {
        lines.push(format!("🏢 {}", escape(org)));
    }
    if let Some(loc) = &f.location {
        lines.push(format!("📍 Lokasi: {}", escape(loc)));
    }
    match (&f.start, &f.end) {
        (Some(start), Some(end)) => lines.push(format!(
            "🗓 {} → {}",
            escape(&format_date(start)),
            escape(&format_date(end))
        )),
        (Some(start), None) => lines.push(format!("🗓 Mulai {}", escape(&format_date(start)))),
        (None, Some(end)) => lines.push(format!("🗓 Selesai {}", escape(&format_date(end)))),
        (None, None) => {}
    }
    lines.push(format!("💰 Nilai limit: {}", format_rupiah(f.limit_price)));
    lines.push(format!("💵 Uang jaminan: {}", format_rupiah(f.deposit)));
    if let Some(method) = &f.bidding_method {
        lines.push(format!("⚖️ Cara penawaran: {}", escape(&humanize_tag(method))));
    }
    if let Some(views) = &f.view_count {
        lines.push(format!("👁 Dilihat: {}x", escape(views)));
    }
    // html::escape leaves quotes alone; the href needs them escaped too.
    lines.push(format!(
        "🔗 <a href=\"{}\">Lihat detail lelang</a>",
        escape(&f.link).replace('"', "&quot;")
    ));

    let seller = &f.seller;
    let place: Vec<&str> = [&seller.address, &seller.city, &seller.province]
        .into_iter()
        .filter_map(|v| v.as_deref())
        .collect();
    if seller.name.is_some() || seller.phone.is_some() || !place.is_empty() {
        lines.push(String::new());
        lines.push(format!(
            "👤 <b>Penjual:</b> {}",
            escape(seller.name.as_deref().unwrap_or("-"))
        ));
        if let Some(phone) = &seller.phone {
            lines.push(format!("📞 {}", escape(phone)));
        }
        if !place.is_empty() {
            lines.push(format!("🏠 {}", escape(&place.join(", "))));
        }
    }

    let org = &f.organizer;
    if org.phone.is_some() || org.address.is_some() {
        lines.push(String::new());
        lines.push("🏛 <b>Penyelenggara</b>".to_string());
        if let Some(phone) = &org.phone {
            lines.push(format!("📞 {}", escape(phone)));
        }
        if let Some(addr) = &org.address {
            lines.push(format!("🏠 {}", escape(addr)));
        }
    }

    if !f.items.is_empty() {
        lines.push(String::new());
        lines.push(format!("📦 <b>Barang ({})</b>", f.items.len()));
        for (idx, item) in f.items.iter().enumerate() {
            render_item(&mut lines, idx + 1, item);
        }
    }

    lines.join("\n")
}

fn render_item(lines: &mut Vec<String>, n: usize, item: &Item) {
    let name = item.name.as_deref().unwrap_or("Barang");
    match &item.year {
        Some(year) => lines.push(format!("{n}. {} ({})", escape(name), escape(year))),
        None => lines.push(format!("{n}. {}", escape(name))),
    }

    let specs: Vec<String> = [
        ("Warna", &item.color),
        ("Rangka", &item.chassis_number),
        ("Nopol", &item.plate_number),
    ]
    .into_iter()
    .filter_map(|(label, v)| v.as_deref().map(|v| format!("{label}: {}", escape(v))))
    .collect();
    if !specs.is_empty() {
        lines.push(format!("   {}", specs.join(" | ")));
    }

    match (&item.ownership_proof, &item.ownership_number) {
        (Some(kind), Some(no)) => lines.push(format!("   Bukti: {} {}", escape(kind), escape(no))),
        (Some(v), None) | (None, Some(v)) => lines.push(format!("   Bukti: {}", escape(v))),
        (None, None) => {}
    }
}

/// `CLOSED_BID` → `Closed Bid`; free text passes through.
fn humanize_tag(tag: &str) -> String {
    if !tag.contains('_') || tag.chars().any(|c| c.is_lowercase()) {
        return tag.to_string();
    }
    tag.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render ISO timestamps as `dd Mon yyyy[ HH:MM]`; anything else falls
/// back to its first 10 characters.
pub fn format_date(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%d %b %Y %H:%M").to_string();
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, pattern) {
            return dt.format("%d %b %Y %H:%M").to_string();
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.format("%d %b %Y").to_string();
    }
    raw.chars().take(10).collect()
}

/// `Some(150000000.0)` → `Rp 150.000.000`, `None` → `Rp -`.
pub fn format_rupiah(amount: Option<f64>) -> String {
    let Some(value) = amount.filter(|v| v.is_finite()) else {
        return "Rp -".to_string();
    };
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if rounded < 0 {
        format!("Rp -{grouped}")
    } else {
        format!("Rp {grouped}")
    }
}

/// Cut `text` to at most `limit` characters at a line boundary and append
/// [`ELLIPSIS`]. Returns the caption and whether it was cut.
pub fn truncate_caption(text: &str, limit: usize) -> (String, bool) {
    if text.chars().count() <= limit {
        return (text.to_string(), false);
    }
    let budget = limit.saturating_sub(ELLIPSIS.chars().count());

    let mut kept = String::new();
    let mut used = 0;
    for line in text.lines() {
        let cost = line.chars().count() + usize::from(!kept.is_empty());
        if used + cost > budget {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        used += cost;
    }

    let kept = kept.trim_end().to_string();
    if kept.is_empty() {
        // Not even the first line fits: drop its markup and cut it.
        let first = text.lines().next().unwrap_or_default();
        let plain = TAG.replace_all(first, "");
        let mut cut: String = plain.chars().take(budget).collect();
        if let Some(amp) = cut.rfind('&') {
            if !cut[amp..].contains(';') {
                cut.truncate(amp);
            }
        }
        return (format!("{}{ELLIPSIS}", cut.trim_end()), true);
    }
    (format!("{kept}{ELLIPSIS}"), true)
}
