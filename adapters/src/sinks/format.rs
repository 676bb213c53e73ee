//! Human-facing rendering of alerts (Telegram HTML).

use std::time::Duration;

use corelib::AlertEvent;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

const MAX_MARKS: usize = 10;

pub fn format_alert_message(alert: &AlertEvent) -> String {
    let change = if alert.percent_change > Decimal::ZERO {
        format!("+{:.2}%", alert.percent_change)
    } else {
        format!("{:.2}%", alert.percent_change)
    };

    format!(
        "⚡ <b>ALERT</b>\n\n\
         <b>{}</b>\n\n\
         📈 <b>Price change:</b> {} {}\n\
         💰 <b>Volume:</b> {} {}\n\
         ⏰ <b>Time:</b> {}",
        alert.symbol,
        change,
        price_marks(alert.percent_change),
        format_volume(alert.volume),
        volume_marks(alert.volume),
        alert.fired_at.format("%H:%M:%S"),
    )
}

/// `1.5M`, `6.0K`, `999`.
pub fn format_volume(volume: u64) -> String {
    if volume >= 1_000_000 {
        format!("{:.1}M", volume as f64 / 1_000_000.0)
    } else if volume >= 1_000 {
        format!("{:.1}K", volume as f64 / 1_000.0)
    } else {
        volume.to_string()
    }
}

/// Eye plus one flame per volume tier. Nothing below 10k.
pub fn volume_marks(volume: u64) -> String {
    let fires = match volume {
        0..10_000 => return String::new(),
        10_000..50_000 => 0,
        50_000..100_000 => 1,
        100_000..150_000 => 2,
        150_000..200_000 => 3,
        _ => (((volume - 200_000) / 50_000) as usize + 3).min(MAX_MARKS),
    };
    format!("👁{}", "🔥".repeat(fires))
}

/// One circle per started 10% of absolute change.
pub fn price_marks(percent_change: Decimal) -> String {
    let tens = (percent_change.abs() / Decimal::TEN)
        .trunc()
        .to_usize()
        .unwrap_or(MAX_MARKS);
    "🔵".repeat((tens + 1).min(MAX_MARKS))
}

/// `45s`, `12m`, `2h`, `1h30m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        _ => {
            let (hours, minutes) = (secs / 3600, (secs / 60) % 60);
            if minutes == 0 {
                format!("{hours}h")
            } else {
                format!("{hours}h{minutes}m")
            }
        }
    }
}
