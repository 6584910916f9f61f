use super::sidecar::EntryMeta;
use crate::key::CacheKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvictionReason {
    Expired,
    /// Payload without a readable side-car, or the reverse.
    Orphaned,
    OverSizeLimit,
}

/// One token found while scanning a store directory.
#[derive(Debug, Clone)]
pub(crate) struct ScannedEntry {
    pub token: String,
    /// Payload file length; `None` when only the side-car exists.
    pub payload_bytes: Option<u64>,
    pub meta: Option<EntryMeta>,
}

impl ScannedEntry {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            payload_bytes: None,
            meta: None,
        }
    }

    fn is_orphan(&self) -> bool {
        self.payload_bytes.is_none() || self.meta.is_none()
    }

    fn key(&self) -> Option<CacheKey> {
        if self.payload_bytes.is_some() {
            self.meta.as_ref().map(|m| m.key.clone())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlannedEviction {
    pub token: String,
    /// Only set for complete entries.
    pub key: Option<CacheKey>,
    pub payload_bytes: u64,
    pub reason: EvictionReason,
}

#[derive(Debug, Default)]
pub(crate) struct EvictionPlan {
    pub planned: Vec<PlannedEviction>,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
}

pub(crate) fn total_payload_bytes(entries: &[ScannedEntry]) -> u64 {
    entries
        .iter()
        .filter_map(|e| e.payload_bytes)
        .fold(0u64, u64::saturating_add)
}

/// Every entry expired at `reference_ms`, plus every half-written entry.
pub(crate) fn plan_expired(
    entries: Vec<ScannedEntry>,
    reference_ms: u64,
) -> EvictionPlan {
    let mut plan = EvictionPlan {
        total_bytes_before: total_payload_bytes(&entries),
        ..EvictionPlan::default()
    };
    let mut total = plan.total_bytes_before;

    for entry in entries {
        let reason = if entry.is_orphan() {
            EvictionReason::Orphaned
        } else if entry
            .meta
            .as_ref()
            .is_some_and(|m| m.is_expired(reference_ms))
        {
            EvictionReason::Expired
        } else {
            continue;
        };
        let payload_bytes = entry.payload_bytes.unwrap_or(0);
        total = total.saturating_sub(payload_bytes);
        plan.planned.push(PlannedEviction {
            key: entry.key(),
            token: entry.token,
            payload_bytes,
            reason,
        });
    }

    plan.total_bytes_after = total;
    plan
}

/// Least-recently-accessed entries until the total is at most half of
/// `size_limit`. Nothing is planned when the limit is zero or the total is
/// still below it.
pub(crate) fn plan_half_size(
    entries: Vec<ScannedEntry>,
    size_limit: u64,
) -> EvictionPlan {
    let total_before = total_payload_bytes(&entries);
    let mut plan = EvictionPlan {
        total_bytes_before: total_before,
        total_bytes_after: total_before,
        ..EvictionPlan::default()
    };
    if size_limit == 0 || total_before < size_limit {
        return plan;
    }

    let target = size_limit / 2;
    let mut candidates: Vec<ScannedEntry> = entries
        .into_iter()
        .filter(|e| e.payload_bytes.is_some())
        .collect();
    // Payloads missing their side-car have no access time and go first.
    candidates.sort_by(|a, b| {
        let a_ms = a.meta.as_ref().map_or(0, |m| m.last_access_ms);
        let b_ms = b.meta.as_ref().map_or(0, |m| m.last_access_ms);
        a_ms.cmp(&b_ms).then_with(|| a.token.cmp(&b.token))
    });

    let mut total = total_before;
    for entry in candidates {
        if total <= target {
            break;
        }
        let payload_bytes = entry.payload_bytes.unwrap_or(0);
        total = total.saturating_sub(payload_bytes);
        plan.planned.push(PlannedEviction {
            key: entry.key(),
            token: entry.token,
            payload_bytes,
            reason: EvictionReason::OverSizeLimit,
        });
    }

    plan.total_bytes_after = total;
    plan
}
