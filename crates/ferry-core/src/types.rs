// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the upstream client, storage, and pipeline components.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Upstream message sequence id. Strictly increasing within one channel.
pub type SeqId = i64;

/// Stable external channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a trait object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Upstream,
    Storage,
    Sink,
    Observability,
}

/// A monitored channel as held by the registry and the catalog store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// Discovery group tag, e.g. "archive" or "monitor".
    pub group_tag: String,
    pub enabled: bool,
    /// Highest sequence id ingested for this channel. 0 when nothing was ingested.
    pub cursor: SeqId,
    /// When discovery last changed this entry.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// A freshly discovered, enabled channel with an empty cursor.
    pub fn discovered(id: ChannelId, name: impl Into<String>, group_tag: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            group_tag: group_tag.into(),
            enabled: true,
            cursor: 0,
            last_synced_at: None,
        }
    }

    /// True when discovery-owned attributes differ (cursor and sync stamp excluded).
    pub fn differs_from(&self, other: &Channel) -> bool {
        self.name != other.name || self.group_tag != other.group_tag || self.enabled != other.enabled
    }
}

/// Where a published event came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Live,
    Backfill,
}

/// Reference to a media attachment. The payload itself is never downloaded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: String,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Content payload of a normalized message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
}

/// Normalized unit published downstream.
///
/// `(channel_id, seq_id)` is globally unique; the publisher deduplicates on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel_id: ChannelId,
    pub seq_id: SeqId,
    pub timestamp: DateTime<Utc>,
    pub payload: MessagePayload,
    pub origin: Origin,
}

/// A message as delivered by the upstream, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub channel_id: ChannelId,
    pub seq_id: SeqId,
    /// Unix timestamp in seconds.
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl RawMessage {
    /// Normalize into a [`MessageEvent`] tagged with `origin`.
    pub fn normalize(self, origin: Origin) -> MessageEvent {
        let text = self.text.filter(|t| !t.is_empty());
        MessageEvent {
            channel_id: self.channel_id,
            seq_id: self.seq_id,
            timestamp: DateTime::from_timestamp(self.date, 0).unwrap_or_default(),
            payload: MessagePayload {
                text,
                media: self.media,
            },
            origin,
        }
    }
}

/// An external folder/label grouping channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub channels: Vec<FolderChannel>,
}

/// A channel listed inside a [`Folder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderChannel {
    pub id: ChannelId,
    pub title: String,
}

/// Request for one page of channel history, ascending from `after` (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    pub channel_id: ChannelId,
    pub after: SeqId,
    pub limit: u32,
}

/// One page of channel history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Messages in ascending sequence order.
    pub messages: Vec<RawMessage>,
    /// Newest sequence id in the channel at the time of the fetch.
    pub head: SeqId,
}

impl HistoryPage {
    /// Sequence id of the last message in the page.
    pub fn end(&self) -> Option<SeqId> {
        self.messages.last().map(|m| m.seq_id)
    }
}

/// Backfill job lifecycle state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Running,
    PausedFloodWait,
    Completed,
    Failed,
}

impl JobStatus {
    /// All states, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::PausedFloodWait,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Completed and failed jobs are never picked up again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Paginated historical fetch for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillJob {
    pub channel_id: ChannelId,
    /// Last persisted page boundary. Fetching resumes strictly after it.
    pub from_seq: SeqId,
    /// Inclusive upper bound. `None` means "until now".
    pub to_seq: Option<SeqId>,
    /// Channel head observed on the most recent page fetch.
    pub head_seq: Option<SeqId>,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BackfillJob {
    /// A pending open-ended job resuming after `from_seq`.
    pub fn open_ended(channel_id: ChannelId, from_seq: SeqId) -> Self {
        Self {
            channel_id,
            from_seq,
            to_seq: None,
            head_seq: None,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// A pending job covering `(from_seq, to_seq]`.
    pub fn bounded(channel_id: ChannelId, from_seq: SeqId, to_seq: SeqId) -> Self {
        Self {
            to_seq: Some(to_seq),
            ..Self::open_ended(channel_id, from_seq)
        }
    }

    pub fn is_open_ended(&self) -> bool {
        self.to_seq.is_none()
    }

    /// Set the status and bump `updated_at`.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Upstream call categories, each with its own cost against the rate budget.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum CostClass {
    Auth,
    Discovery,
    History,
    Subscribe,
}

/// Authenticated upstream connection state.
///
/// Owned by the session manager; other components only ever see it borrowed
/// for the duration of one upstream call.
#[derive(Debug)]
pub struct Session {
    /// Credential identity (phone number or account handle).
    pub identity: String,
    /// Opaque persisted session blob.
    pub blob: SecretString,
    pub user_id: Option<i64>,
    pub renewed_at: DateTime<Utc>,
}

impl Session {
    pub fn new(identity: impl Into<String>, blob: SecretString) -> Self {
        Self {
            identity: identity.into(),
            blob,
            user_id: None,
            renewed_at: Utc::now(),
        }
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            blob: SecretString::from(self.blob.expose_secret().to_string()),
            user_id: self.user_id,
            renewed_at: self.renewed_at,
        }
    }
}

/// Pending interactive login, returned by the upstream after a code was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginChallenge {
    pub id: String,
    pub identity: String,
}

/// Result of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PublishOutcome {
    Accepted,
    /// The `(channel, seq)` key was already published inside the dedup window.
    DuplicateIgnored,
}

/// Result of a registry upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_mutation(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}
