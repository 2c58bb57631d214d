//! Renders CTO events into Telegram HTML messages

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use teloxide::utils::html;

use crate::utils::dexscreener::{CtoEvent, TokenDetails, Windowed};

/// Placeholder for any figure the upstream did not provide
pub const UNAVAILABLE: &str = "N/A";

const MAX_DESCRIPTION_CHARS: usize = 280;
const MAX_LINKS: usize = 6;

/// URL button shown under a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLink {
    pub label: String,
    pub url: String,
}

/// A ready-to-send notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// HTML formatted body
    pub text: String,
    pub image: Option<String>,
    pub links: Vec<ActionLink>,
}

pub fn format_usd(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let abs = v.abs();
            if abs >= 1_000_000_000.0 {
                format!("${:.2}B", v / 1_000_000_000.0)
            } else if abs >= 1_000_000.0 {
                format!("${:.2}M", v / 1_000_000.0)
            } else if abs >= 1_000.0 {
                format!("${:.1}K", v / 1_000.0)
            } else {
                format!("${:.0}", v)
            }
        }
        _ => UNAVAILABLE.to_string(),
    }
}

pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:+.2}%", v),
        _ => UNAVAILABLE.to_string(),
    }
}

/// Human age such as `2d 4h`, `3h 12m` or `45m`
pub fn format_age(created_at_ms: Option<i64>, now: DateTime<Utc>) -> String {
    let Some(created) = created_at_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()) else {
        return UNAVAILABLE.to_string();
    };
    let minutes = (now - created).num_minutes().max(0);
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}m", mins)
    }
}

fn format_claim_date(raw: Option<&str>) -> String {
    raw.and_then(|r| DateTime::parse_from_rfc3339(r.trim()).ok())
        .map(|ts| ts.with_timezone(&Utc).format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

fn format_windows(w: &Windowed, fmt: fn(Option<f64>) -> String) -> String {
    format!(
        "5m {} | 1h {} | 6h {} | 24h {}",
        fmt(w.m5),
        fmt(w.h1),
        fmt(w.h6),
        fmt(w.h24)
    )
}

fn link_label(link_type: Option<&str>, label: Option<&str>) -> String {
    let raw = label
        .or(link_type)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Link");
    let emoji = match raw.to_lowercase().as_str() {
        "twitter" | "x" => "🐦",
        "telegram" => "💬",
        "discord" => "🎮",
        "website" => "🌐",
        _ => "🔗",
    };
    let mut chars = raw.chars();
    let title = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    format!("{} {}", emoji, title)
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Build the message for one event. Missing details render as [`UNAVAILABLE`].
pub fn format_event(
    event: &CtoEvent,
    details: Option<&TokenDetails>,
    now: DateTime<Utc>,
) -> Notification {
    let chain = event.chain_id.as_deref().unwrap_or_default().trim();
    let address = event.token_address.as_deref().unwrap_or_default().trim();
    let empty = TokenDetails::default();
    let d = details.unwrap_or(&empty);

    let name = d.name.as_deref().unwrap_or("Unknown");
    let symbol = d.symbol.as_deref().unwrap_or("???");

    let mut text = String::new();
    text.push_str(&format!("🔄 {}\n\n", html::bold("Community Takeover")));
    text.push_str(&format!(
        "{} ({})\n",
        html::bold(&html::escape(name)),
        html::escape(symbol)
    ));
    text.push_str(&format!("⛓ Chain: {}\n", html::escape(&chain.to_uppercase())));
    text.push_str(&format!("📍 {}\n", html::code_inline(address)));
    text.push_str(&format!("🕒 Claimed: {}\n", format_claim_date(event.claim_date.as_deref())));
    text.push_str(&format!("📅 Pair age: {}\n\n", format_age(d.pair_created_at, now)));
    text.push_str(&format!("💰 Market cap: {}\n", format_usd(d.market_cap)));
    text.push_str(&format!("📊 Volume: {}\n", format_windows(&d.volume, format_usd)));
    text.push_str(&format!("📈 Price: {}", format_windows(&d.price_change, format_percent)));

    if let Some(description) = event.description.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let mut short: String = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            short.push('…');
        }
        text.push_str(&format!("\n\n{}", html::italic(&html::escape(&short))));
    }

    let chart_url = event
        .url
        .clone()
        .filter(|u| is_http_url(u))
        .unwrap_or_else(|| {
            format!(
                "https://dexscreener.com/{}/{}",
                chain.to_lowercase(),
                address
            )
        });

    let mut links = vec![ActionLink {
        label: "📊 DexScreener".to_string(),
        url: chart_url,
    }];
    links.extend(
        event
            .links
            .iter()
            .filter_map(|l| {
                let url = l.url.as_deref()?.trim();
                is_http_url(url).then(|| ActionLink {
                    label: link_label(l.link_type.as_deref(), l.label.as_deref()),
                    url: url.to_string(),
                })
            })
            .take(MAX_LINKS - 1),
    );

    let image = d
        .banner_image
        .as_deref()
        .or(event.image())
        .filter(|u| is_http_url(u))
        .map(str::to_string);

    Notification { text, image, links }
}
