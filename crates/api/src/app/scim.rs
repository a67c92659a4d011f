//! Translation of SCIM request fragments into reconciler inputs.
//!
//! Lenient by design of the protocol surface: an operation that cannot be
//! understood is dropped with a warning and the rest of the request proceeds.

use serde_json::Value;

use forgeops_core::UserId;
use forgeops_provisioning::PatchOperation;

use crate::app::dto::{PatchOp, ScimMember};

pub const DEFAULT_COUNT: usize = 25;
pub const MAX_COUNT: usize = 100;

/// Display name from a `displayName eq "<value>"` filter.
///
/// Anything else (other attributes, other operators, unquoted values) yields
/// `None`, which callers treat as "no filter".
pub fn display_name_filter(filter: &str) -> Option<String> {
    let (attribute, rest) = filter.trim().split_once(char::is_whitespace)?;
    let (operator, value) = rest.trim_start().split_once(char::is_whitespace)?;
    if !attribute.eq_ignore_ascii_case("displayName") || !operator.eq_ignore_ascii_case("eq") {
        return None;
    }
    let quoted = value.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some(quoted.replace("\\\"", "\"").replace("\\\\", "\\"))
}

/// 1-based start index and page size, clamped to the supported range.
pub fn page_bounds(start_index: Option<i64>, count: Option<i64>) -> (usize, usize) {
    let start = start_index.filter(|s| *s >= 1).unwrap_or(1);
    let count = count.map(|c| c.clamp(0, MAX_COUNT as i64)).unwrap_or(DEFAULT_COUNT as i64);
    (
        usize::try_from(start).unwrap_or(1),
        usize::try_from(count).unwrap_or(DEFAULT_COUNT),
    )
}

/// Member ids from request members; unparseable values are dropped.
pub fn member_ids(members: &[ScimMember]) -> Vec<UserId> {
    members
        .iter()
        .filter_map(|m| match m.value.parse::<UserId>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = %m.value, "skipping member with malformed id");
                None
            }
        })
        .collect()
}

/// Translate PATCH operations in order, dropping the ones that do not parse.
pub fn patch_operations(ops: &[PatchOp]) -> Vec<PatchOperation> {
    let mut translated = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        match translate(op) {
            Ok(mut operations) => translated.append(&mut operations),
            Err(reason) => tracing::warn!(
                index,
                op = %op.op,
                path = op.path.as_deref().unwrap_or(""),
                reason,
                "skipping PATCH operation"
            ),
        }
    }
    translated
}

enum Target {
    Members,
    Member(UserId),
    DisplayName,
    ExternalId,
    Whole,
}

fn target(path: Option<&str>) -> Result<Target, &'static str> {
    let Some(path) = path.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(Target::Whole);
    };
    if path.eq_ignore_ascii_case("members") {
        return Ok(Target::Members);
    }
    if path.eq_ignore_ascii_case("displayName") {
        return Ok(Target::DisplayName);
    }
    if path.eq_ignore_ascii_case("externalId") {
        return Ok(Target::ExternalId);
    }
    member_filter(path).map(Target::Member).ok_or("unsupported path")
}

/// `members[value eq "<id>"]`
fn member_filter(path: &str) -> Option<UserId> {
    let (prefix, rest) = path.split_at_checked(8)?;
    if !prefix.eq_ignore_ascii_case("members[") {
        return None;
    }
    let inner = rest.strip_suffix(']')?;
    let mut parts = inner.split_whitespace();
    let (attribute, operator, value) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || attribute != "value" || !operator.eq_ignore_ascii_case("eq") {
        return None;
    }
    value.trim_matches('"').parse().ok()
}

fn translate(op: &PatchOp) -> Result<Vec<PatchOperation>, &'static str> {
    let kind = op.op.to_ascii_lowercase();
    let target = target(op.path.as_deref())?;
    let value = op.value.as_ref();

    match (kind.as_str(), target) {
        ("add", Target::Members) => Ok(vec![PatchOperation::AddMembers(members_in(value)?)]),
        ("add", Target::Member(id)) => Ok(vec![PatchOperation::AddMembers(vec![id])]),
        ("replace", Target::Members) => Ok(vec![PatchOperation::ReplaceMembers(match value {
            None | Some(Value::Null) => Vec::new(),
            Some(_) => members_in(value)?,
        })]),
        ("remove", Target::Members) => match value {
            None | Some(Value::Null) => Ok(vec![PatchOperation::RemoveAllMembers]),
            Some(Value::Array(items)) if items.is_empty() => Ok(vec![PatchOperation::RemoveAllMembers]),
            // Azure AD style: remove on `members` carrying the ids to drop.
            Some(_) => Ok(vec![PatchOperation::RemoveMembers(members_in(value)?)]),
        },
        ("remove", Target::Member(id)) => Ok(vec![PatchOperation::RemoveMembers(vec![id])]),
        ("add" | "replace", Target::DisplayName) => Ok(vec![PatchOperation::Rename(string_in(value)?)]),
        ("add" | "replace", Target::ExternalId) => Ok(vec![PatchOperation::SetExternalId(optional_string_in(value)?)]),
        ("remove", Target::ExternalId) => Ok(vec![PatchOperation::SetExternalId(None)]),
        ("add", Target::Whole) => match value {
            Some(Value::Array(_)) => Ok(vec![PatchOperation::AddMembers(members_in(value)?)]),
            Some(Value::Object(_)) => whole_object(value, PatchOperation::AddMembers),
            _ => Err("add without path needs an object or member array value"),
        },
        ("replace", Target::Whole) => whole_object(value, PatchOperation::ReplaceMembers),
        ("add" | "replace" | "remove", _) => Err("unsupported path for this operation"),
        _ => Err("unknown op"),
    }
}

/// Path-less operation whose value object carries attributes.
fn whole_object(
    value: Option<&Value>,
    members_op: fn(Vec<UserId>) -> PatchOperation,
) -> Result<Vec<PatchOperation>, &'static str> {
    let Some(Value::Object(attributes)) = value else {
        return Err("path-less operation needs an object value");
    };
    let mut operations = Vec::new();
    for (name, attribute) in attributes {
        if name.eq_ignore_ascii_case("displayName") {
            operations.push(PatchOperation::Rename(string_in(Some(attribute))?));
        } else if name.eq_ignore_ascii_case("externalId") {
            operations.push(PatchOperation::SetExternalId(optional_string_in(Some(attribute))?));
        } else if name.eq_ignore_ascii_case("members") {
            operations.push(members_op(members_in(Some(attribute))?));
        } else {
            tracing::debug!(attribute = %name, "ignoring unsupported attribute in PATCH value");
        }
    }
    if operations.is_empty() {
        return Err("value carries no supported attribute");
    }
    Ok(operations)
}

fn members_in(value: Option<&Value>) -> Result<Vec<UserId>, &'static str> {
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => return Err("members value must be an object or an array"),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| {
            let id = item.get("value").and_then(Value::as_str).and_then(|s| s.parse::<UserId>().ok());
            if id.is_none() {
                tracing::warn!(member = %item, "skipping member with malformed id");
            }
            id
        })
        .collect())
}

fn string_in(value: Option<&Value>) -> Result<String, &'static str> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err("value must be a string"),
    }
}

fn optional_string_in(value: Option<&Value>) -> Result<Option<String>, &'static str> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        _ => Err("value must be a string or null"),
    }
}
