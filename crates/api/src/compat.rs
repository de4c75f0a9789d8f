//! GET-only write compatibility layer.
//!
//! Some caller tooling can only issue GET requests, so every write operation
//! is also reachable through `GET /record` with all parameters encoded as
//! query string values: a `type` discriminator selects the operation,
//! list-valued fields arrive comma-separated (`tags`, `preferences`) or
//! pipe-separated (`reasoning`, `alternatives`).
//!
//! This module is boundary adaptation only. Parameters are decoded into the
//! same strongly-typed inputs the JSON routes use; the stores never see the
//! delimiter format.

use chrono::{DateTime, Utc};
use engram_common::{MemoryError, NewDecision, NewEpisode, ProfilePatch, Result};
use std::collections::HashMap;

/// A decoded `/record` operation.
#[derive(Debug)]
pub enum RecordOp {
    Decision(NewDecision),
    Episode(NewEpisode),
    Profile {
        sender_id: String,
        patch: ProfilePatch,
    },
    Outcome {
        decision_id: String,
        outcome: String,
    },
}

pub fn parse_record(params: &HashMap<String, String>) -> Result<RecordOp> {
    let kind = params
        .get("type")
        .map(String::as_str)
        .ok_or_else(|| {
            MemoryError::validation(
                "type parameter is required (one of: episode, decision, profile, outcome)",
            )
        })?;

    match kind {
        "decision" => Ok(RecordOp::Decision(NewDecision {
            sender_id: optional(params, "sender_id"),
            context: required(params, "context")?,
            decision: required(params, "decision")?,
            reasoning: optional(params, "reasoning")
                .map(|raw| split_pipes(&raw))
                .unwrap_or_default(),
            alternatives: optional(params, "alternatives")
                .map(|raw| split_pipes(&raw))
                .unwrap_or_default(),
            tags: optional(params, "tags")
                .map(|raw| split_commas(&raw))
                .unwrap_or_default(),
        })),
        "episode" => Ok(RecordOp::Episode(NewEpisode {
            sender_id: optional(params, "sender_id"),
            summary: required(params, "summary")?,
            tags: optional(params, "tags")
                .map(|raw| split_commas(&raw))
                .unwrap_or_default(),
            happened_at: optional(params, "happened_at")
                .map(|raw| parse_timestamp(&raw))
                .transpose()?,
        })),
        "profile" => {
            let patch = ProfilePatch {
                name: optional(params, "name"),
                role: optional(params, "role"),
                timezone: optional(params, "timezone"),
                communication_style: optional(params, "communication_style"),
                current_focus: optional(params, "current_focus"),
                preferences: optional(params, "preferences").map(|raw| split_commas(&raw)),
            };
            if patch.is_empty() {
                return Err(MemoryError::validation(
                    "at least one profile field is required",
                ));
            }
            Ok(RecordOp::Profile {
                sender_id: optional(params, "sender_id").unwrap_or_else(|| "default".to_string()),
                patch,
            })
        }
        "outcome" => Ok(RecordOp::Outcome {
            decision_id: required(params, "decision_id")?,
            outcome: required(params, "outcome")?,
        }),
        other => Err(MemoryError::validation(format!(
            "unknown type '{other}' (expected one of: episode, decision, profile, outcome)"
        ))),
    }
}

fn required(params: &HashMap<String, String>, name: &str) -> Result<String> {
    params
        .get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MemoryError::validation(format!("{name} parameter is required")))
}

fn optional(params: &HashMap<String, String>, name: &str) -> Option<String> {
    params
        .get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::validation(format!("invalid happened_at timestamp: {e}")))
}

/// Comma-separated list fields: `tags`, `preferences`.
pub fn split_commas(raw: &str) -> Vec<String> {
    split_on(raw, ',')
}

/// Pipe-separated list fields: `reasoning`, `alternatives`.
pub fn split_pipes(raw: &str) -> Vec<String> {
    split_on(raw, '|')
}

fn split_on(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
