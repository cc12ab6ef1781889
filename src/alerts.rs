use serde::Serialize;

use crate::events::SpeedingEvent;

/// Telegram parse mode used for alert text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    Markdown,
}

/// A formatted alert addressed to a chat
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    pub parse_mode: ParseMode,
}

impl OutboundMessage {
    pub fn speeding_alert(chat_id: &str, event: &SpeedingEvent, driver_name: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            text: format_speeding_alert(event, driver_name),
            parse_mode: ParseMode::Markdown,
        }
    }
}

/// Render a speeding event as the Markdown alert posted to the channel.
/// Speeds are always shown with one decimal place.
pub fn format_speeding_alert(event: &SpeedingEvent, driver_name: &str) -> String {
    let status = event.status.as_deref().unwrap_or("None");
    format!(
        "🚨 **SPEEDING ALERT** 🚨\n\n\
         **Driver:** {driver_name}\n\
         **Vehicle ID:** {vehicle_id}\n\
         **Event ID:** {event_id}\n\n\
         **Speed Details:**\n\
         • Posted Limit: {limit:.1} km/h\n\
         • Vehicle Speed: {speed:.1} km/h\n\
         • Over Limit: {over:.1} km/h\n\n\
         **Status:** {status}",
        vehicle_id = event.vehicle_id,
        event_id = event.id,
        limit = event.max_posted_speed_limit_in_kph,
        speed = event.max_vehicle_speed,
        over = event.max_over_speed_in_kph,
    )
}
