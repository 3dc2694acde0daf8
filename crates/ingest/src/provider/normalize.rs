//! Provider item normalization
//!
//! Converts raw provider items into `ProviderRecord`s. This is the only place
//! that looks at item shapes; everything downstream matches on record kinds.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::api::{WireEvent, WireMessage, WirePerson, WireThread};
use super::{
    DeletedRecord, EventRecord, MessageRecord, OccurrenceRecord, ProviderRecord, RejectedItem,
    ThreadRecord,
};
use crate::models::{EmailAddress, Source, Thread};

/// Label the provider puts on messages the tenant sent
const SENT_LABEL: &str = "SENT";

/// Normalize a batch of raw items, keeping rejects separate
pub fn normalize_items(items: Vec<Value>, source: Source) -> (Vec<ProviderRecord>, Vec<RejectedItem>) {
    let mut records = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for item in items {
        match normalize_item(item, source) {
            Ok(record) => records.push(record),
            Err(reject) => rejected.push(reject),
        }
    }

    (records, rejected)
}

/// Normalize one raw item
pub fn normalize_item(item: Value, source: Source) -> Result<ProviderRecord, RejectedItem> {
    let external_id = item.get("id").and_then(Value::as_str).map(str::to_string);
    let reject = |reason: String| RejectedItem {
        external_id: external_id.clone(),
        reason,
    };

    if !item.is_object() {
        return Err(reject(format!("expected an object, got {}", type_name(&item))));
    }

    if item.get("deleted").and_then(Value::as_bool) == Some(true) {
        let id = external_id.clone().ok_or_else(|| reject("deleted item without id".into()))?;
        return Ok(ProviderRecord::Deleted(DeletedRecord {
            source,
            external_id: id,
        }));
    }

    if item.get("messages").is_some_and(Value::is_array) {
        if source != Source::Mail {
            return Err(reject("thread item in a calendar feed".into()));
        }
        let wire: WireThread = serde_json::from_value(item)
            .map_err(|e| reject(format!("malformed thread: {}", e)))?;
        return normalize_thread(wire).map(ProviderRecord::ThreadChanged).map_err(reject);
    }

    if item.get("start").is_some_and(Value::is_object) {
        if source != Source::Calendar {
            return Err(reject("event item in a mail feed".into()));
        }
        let wire: WireEvent = serde_json::from_value(item)
            .map_err(|e| reject(format!("malformed event: {}", e)))?;
        return normalize_event(wire).map(ProviderRecord::EventChanged).map_err(reject);
    }

    Err(reject("unrecognized item shape".into()))
}

fn normalize_thread(wire: WireThread) -> Result<ThreadRecord, String> {
    if wire.id.is_empty() {
        return Err("thread with empty id".into());
    }

    let mut messages = wire
        .messages
        .into_iter()
        .map(normalize_message)
        .collect::<Result<Vec<_>, _>>()?;
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));

    let participant = thread_participant(&messages);
    let subject = wire
        .subject
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Thread::NO_SUBJECT.to_string());
    // Prefer the provider's thread snippet, fall back to the newest message
    let snippet = wire
        .snippet
        .filter(|s| !s.is_empty())
        .or_else(|| messages.last().map(|m| m.snippet.clone()))
        .map(|s| decode_html_entities(&s))
        .unwrap_or_default();

    Ok(ThreadRecord {
        external_id: wire.id,
        subject,
        snippet,
        participant,
        messages,
    })
}

fn normalize_message(wire: WireMessage) -> Result<MessageRecord, String> {
    let millis: i64 = wire
        .internal_date
        .parse()
        .map_err(|_| format!("message {} has bad internalDate {:?}", wire.id, wire.internal_date))?;
    let sent_at = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| format!("message {} has out-of-range internalDate", wire.id))?;

    Ok(MessageRecord {
        external_id: wire.id,
        sent_at,
        from: wire.from.as_deref().map(EmailAddress::parse),
        to: wire.to.as_deref().map(parse_address_list).unwrap_or_default(),
        snippet: wire.snippet.map(|s| decode_html_entities(&s)).unwrap_or_default(),
        labels: wire.label_ids.unwrap_or_default(),
    })
}

/// Pick the counterpart of a thread
///
/// The sender of the newest received message wins; for threads the tenant
/// only sent into, the first recipient of the newest sent message is used.
fn thread_participant(messages: &[MessageRecord]) -> Option<EmailAddress> {
    let is_sent = |m: &MessageRecord| m.labels.iter().any(|l| l == SENT_LABEL);

    messages
        .iter()
        .rev()
        .filter(|m| !is_sent(m))
        .find_map(|m| m.from.clone().filter(|a| a.normalized().is_some()))
        .or_else(|| {
            messages
                .iter()
                .rev()
                .filter(|m| is_sent(m))
                .find_map(|m| m.to.iter().find(|a| a.normalized().is_some()).cloned())
        })
}

fn normalize_event(wire: WireEvent) -> Result<EventRecord, String> {
    if wire.id.is_empty() {
        return Err("event with empty id".into());
    }

    let participant = event_participant(wire.attendees.as_deref(), wire.organizer.as_ref());

    let occurrences = match wire.instances {
        Some(instances) if !instances.is_empty() => instances
            .into_iter()
            .map(|inst| {
                let starts_at = inst
                    .start
                    .to_utc()
                    .ok_or_else(|| format!("instance {} has no start", inst.id))?;
                Ok(OccurrenceRecord {
                    external_id: inst.id,
                    starts_at,
                    ends_at: inst.end.as_ref().and_then(|e| e.to_utc()),
                    status: inst.status,
                })
            })
            .collect::<Result<Vec<_>, String>>()?,
        _ => {
            let starts_at = wire
                .start
                .to_utc()
                .ok_or_else(|| format!("event {} has no start", wire.id))?;
            vec![OccurrenceRecord {
                external_id: wire.id.clone(),
                starts_at,
                ends_at: wire.end.as_ref().and_then(|e| e.to_utc()),
                status: wire.status.clone(),
            }]
        }
    };

    Ok(EventRecord {
        external_id: wire.id,
        title: wire
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "(untitled event)".to_string()),
        status: wire.status,
        participant,
        occurrences,
    })
}

/// First human attendee that is not the tenant, else the organizer
fn event_participant(attendees: Option<&[WirePerson]>, organizer: Option<&WirePerson>) -> Option<EmailAddress> {
    let to_address = |p: &WirePerson| {
        let email = p.email.as_deref()?;
        let addr = match &p.display_name {
            Some(name) => EmailAddress::with_name(name.clone(), email),
            None => EmailAddress::new(email),
        };
        addr.normalized().is_some().then_some(addr)
    };

    attendees
        .unwrap_or_default()
        .iter()
        .filter(|p| !p.is_self && !p.resource)
        .find_map(to_address)
        .or_else(|| organizer.filter(|o| !o.is_self).and_then(to_address))
}

/// Parse a comma-separated list of email addresses
fn parse_address_list(s: &str) -> Vec<EmailAddress> {
    s.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(EmailAddress::parse)
        .collect()
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Parse a `Retry-After` header (delta-seconds or HTTP date)
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
