//! Maps a raw [`Record`] to [`NotificationFields`].
//!
//! Properties are located with [`Properties::find_like`], so a renamed column
//! keeps working as long as it still contains its label. When several
//! properties match a label, the first in API order wins. Nothing here
//! returns an error; every missing or oddly shaped value falls back to the
//! defaults in [`crate::models::notification`].

use crate::config::FieldLabels;
use crate::models::notification::{
    NotificationFields, DEFAULT_CATEGORY, DEFAULT_DATE, DEFAULT_NOTE, DEFAULT_SUBMITTER,
    DEFAULT_TITLE,
};
use crate::models::record::{PartialUser, Properties, PropertyValue, Record};

pub fn extract_fields(record: &Record, labels: &FieldLabels) -> NotificationFields {
    let props = &record.properties;
    let (start, end) = date_range(props, labels);

    NotificationFields {
        title: first_text(props.find_like(&labels.title)).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        category: category(props.find_like(&labels.category))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        start,
        end,
        note: first_text(props.find_like(&labels.note)).unwrap_or_else(|| DEFAULT_NOTE.to_string()),
        submitter: submitter(record, labels).unwrap_or_else(|| DEFAULT_SUBMITTER.to_string()),
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn first_text(value: Option<&PropertyValue>) -> Option<String> {
    value?.text_runs().first()?.content().and_then(non_blank)
}

// Single select first, then multi select joined with ", ".
fn category(value: Option<&PropertyValue>) -> Option<String> {
    match value? {
        PropertyValue::Select(Some(option)) => option.name.as_deref().and_then(non_blank),
        PropertyValue::MultiSelect(options) => {
            let names: Vec<String> = options
                .iter()
                .filter_map(|o| o.name.as_deref().and_then(non_blank))
                .collect();
            (!names.is_empty()).then(|| names.join(", "))
        }
        _ => None,
    }
}

fn date_start(value: Option<&PropertyValue>) -> Option<String> {
    match value? {
        PropertyValue::Date(Some(range)) => range.start.as_deref().and_then(non_blank),
        _ => None,
    }
}

fn date_end(value: Option<&PropertyValue>) -> Option<String> {
    match value? {
        PropertyValue::Date(Some(range)) => range.end.as_deref().and_then(non_blank),
        _ => None,
    }
}

fn date_range(props: &Properties, labels: &FieldLabels) -> (String, String) {
    // Older forms used two separate date columns instead of one range.
    let (start, end) = match props.find_like(&labels.date) {
        Some(range) => (date_start(Some(range)), date_end(Some(range))),
        None => (
            date_start(props.find_like(&labels.start_date)),
            date_start(props.find_like(&labels.end_date)),
        ),
    };

    let start = start.unwrap_or_else(|| DEFAULT_DATE.to_string());
    let end = end.unwrap_or_else(|| start.clone());
    (start, end)
}

fn describe(user: &PartialUser) -> Option<String> {
    let name = user.name.as_deref().and_then(non_blank);
    let email = user.email().and_then(non_blank);

    match (name, email) {
        (Some(name), Some(email)) => Some(format!("{} ({})", name, email)),
        (None, Some(email)) => Some(email),
        (Some(name), None) => Some(name),
        (None, None) => None,
    }
}

fn submitter(record: &Record, labels: &FieldLabels) -> Option<String> {
    match record.properties.find_like(&labels.submitter) {
        Some(PropertyValue::CreatedBy(Some(user))) => describe(user),
        Some(PropertyValue::People(people)) => people.first().and_then(describe),
        Some(_) => None,
        None => record.created_by.as_ref().and_then(describe),
    }
}
