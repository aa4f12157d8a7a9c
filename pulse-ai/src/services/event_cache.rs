//! Event Cache
//!
//! In-memory, time-indexed store of play-by-play events per broadcast, plus
//! the broadcast registry.
//!
//! # Concurrency
//! The outer map only takes its write lock to create a broadcast slot. Each
//! slot has its own lock, so writers to different broadcasts never contend
//! and readers only block for the duration of a single upsert.
//!
//! # Eviction
//! On every write to a broadcast, events older than `newest - horizon` are
//! dropped. There is no background sweep.

use crate::types::{seconds_to_ms, BroadcastInfo, PlayEvent};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Events within one broadcast, ordered by (timestamp ms, event type)
type Timeline = BTreeMap<(i64, String), PlayEvent>;

#[derive(Debug, Default)]
struct BroadcastSlot {
    timeline: RwLock<Timeline>,
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Same identity already present; the first write is kept
    Duplicate,
    /// Older than the rewind horizon of the broadcast's newest event
    Expired,
}

/// Demo-mode selection from the registry
#[derive(Debug, Clone, PartialEq)]
pub struct DemoSelection {
    pub broadcast_id: String,
    pub offset_seconds: f64,
    pub match_reason: String,
}

pub struct EventCache {
    slots: RwLock<HashMap<String, Arc<BroadcastSlot>>>,
    registry: RwLock<BTreeMap<String, BroadcastInfo>>,
    horizon_ms: i64,
}

impl EventCache {
    pub fn new(rewind_horizon_seconds: f64) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            registry: RwLock::new(BTreeMap::new()),
            horizon_ms: seconds_to_ms(rewind_horizon_seconds),
        }
    }

    fn slot(&self, broadcast_id: &str) -> Option<Arc<BroadcastSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(broadcast_id)
            .cloned()
    }

    fn slot_or_create(&self, broadcast_id: &str) -> Arc<BroadcastSlot> {
        if let Some(slot) = self.slot(broadcast_id) {
            return slot;
        }
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(broadcast_id.to_string())
            .or_default()
            .clone()
    }

    /// Insert an event; duplicates are idempotently dropped
    pub fn upsert(&self, event: PlayEvent) -> UpsertOutcome {
        let slot = self.slot_or_create(&event.broadcast_id);
        let mut timeline = slot.timeline.write().unwrap_or_else(PoisonError::into_inner);

        let ts_ms = seconds_to_ms(event.timestamp_seconds);
        let newest = timeline.keys().next_back().map(|(ts, _)| *ts);
        if let Some(newest) = newest {
            if ts_ms < newest.saturating_sub(self.horizon_ms) {
                return UpsertOutcome::Expired;
            }
        }

        let key = (ts_ms, event.event_type.clone());
        if timeline.contains_key(&key) {
            return UpsertOutcome::Duplicate;
        }
        let broadcast_id = event.broadcast_id.clone();
        timeline.insert(key, event);

        let newest = newest.map_or(ts_ms, |n| n.max(ts_ms));
        let cutoff = newest.saturating_sub(self.horizon_ms);
        let retained = timeline.split_off(&(cutoff, String::new()));
        let evicted = timeline.len();
        *timeline = retained;
        if evicted > 0 {
            debug!(broadcast_id = %broadcast_id, evicted, "Evicted events beyond rewind horizon");
        }

        UpsertOutcome::Inserted
    }

    /// Most recent event at or before `as_of_seconds`
    pub fn lookup(&self, broadcast_id: &str, as_of_seconds: f64) -> Option<PlayEvent> {
        let slot = self.slot(broadcast_id)?;
        let timeline = slot.timeline.read().unwrap_or_else(PoisonError::into_inner);
        let as_of_ms = seconds_to_ms(as_of_seconds);
        timeline
            .range(..(as_of_ms.saturating_add(1), String::new()))
            .next_back()
            .map(|(_, event)| event.clone())
    }

    /// Events with `from <= timestamp <= to`, ascending
    pub fn range(&self, broadcast_id: &str, from_seconds: f64, to_seconds: f64) -> Vec<PlayEvent> {
        let Some(slot) = self.slot(broadcast_id) else {
            return Vec::new();
        };
        let from_ms = seconds_to_ms(from_seconds);
        let to_ms = seconds_to_ms(to_seconds);
        if from_ms > to_ms {
            return Vec::new();
        }
        let timeline = slot.timeline.read().unwrap_or_else(PoisonError::into_inner);
        timeline
            .range((from_ms, String::new())..(to_ms.saturating_add(1), String::new()))
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Newest event timestamp for a broadcast
    pub fn newest_timestamp(&self, broadcast_id: &str) -> Option<f64> {
        let slot = self.slot(broadcast_id)?;
        let timeline = slot.timeline.read().unwrap_or_else(PoisonError::into_inner);
        timeline
            .values()
            .next_back()
            .map(|event| event.timestamp_seconds)
    }

    pub fn event_count(&self, broadcast_id: &str) -> usize {
        self.slot(broadcast_id)
            .map(|slot| slot.timeline.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Add or replace a registry entry
    pub fn register_broadcast(&self, info: BroadcastInfo) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.broadcast_id.clone(), info);
    }

    pub fn broadcast(&self, broadcast_id: &str) -> Option<BroadcastInfo> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(broadcast_id)
            .cloned()
    }

    /// All registered broadcasts, ordered by id
    pub fn broadcasts(&self) -> Vec<BroadcastInfo> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Pick a broadcast without audio
    ///
    /// Preference: live in a preferred league, then any live, then any.
    /// Broadcasts without events are skipped. Offset is the newest event.
    pub fn select_demo(&self, preferred_leagues: &[String]) -> Option<DemoSelection> {
        let candidates: Vec<(BroadcastInfo, f64)> = self
            .broadcasts()
            .into_iter()
            .filter_map(|info| {
                let newest = self.newest_timestamp(&info.broadcast_id)?;
                Some((info, newest))
            })
            .collect();

        let preferred = |info: &BroadcastInfo| {
            preferred_leagues
                .iter()
                .any(|league| league.eq_ignore_ascii_case(&info.league))
        };

        let (info, offset, reason) = if let Some((info, offset)) = candidates
            .iter()
            .find(|(info, _)| info.live && preferred(info))
        {
            let reason = format!(
                "Live {} game matching your preferred leagues: {} vs {}",
                info.league, info.home_team, info.away_team
            );
            (info, *offset, reason)
        } else if let Some((info, offset)) = candidates.iter().find(|(info, _)| info.live) {
            let reason = format!(
                "Live {} game currently in progress: {} vs {}",
                info.league, info.home_team, info.away_team
            );
            (info, *offset, reason)
        } else {
            let (info, offset) = candidates.first()?;
            let reason = format!(
                "Most recent available {} game: {} vs {}",
                info.league, info.home_team, info.away_team
            );
            (info, *offset, reason)
        };

        Some(DemoSelection {
            broadcast_id: info.broadcast_id.clone(),
            offset_seconds: offset,
            match_reason: reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(broadcast: &str, ts: f64, event_type: &str) -> PlayEvent {
        PlayEvent {
            broadcast_id: broadcast.into(),
            timestamp_seconds: ts,
            event_type: event_type.into(),
            description: format!("{} at {}", event_type, ts),
            team_ref: "Seahawks".into(),
            player_ref: None,
            raw_stats: BTreeMap::new(),
        }
    }

    fn info(id: &str, league: &str, live: bool) -> BroadcastInfo {
        BroadcastInfo {
            broadcast_id: id.into(),
            league: league.into(),
            home_team: "Home".into(),
            away_team: "Away".into(),
            live,
        }
    }

    #[test]
    fn test_lookup_returns_latest_at_or_before() {
        let cache = EventCache::new(14_400.0);
        cache.upsert(event("g", 100.0, "sack"));
        cache.upsert(event("g", 200.0, "touchdown"));
        cache.upsert(event("g", 300.0, "field_goal"));

        assert_eq!(cache.lookup("g", 250.0).unwrap().event_type, "touchdown");
        assert_eq!(cache.lookup("g", 200.0).unwrap().event_type, "touchdown");
        assert!(cache.lookup("g", 99.9).is_none());
        assert!(cache.lookup("other", 500.0).is_none());
    }

    #[test]
    fn test_lookup_independent_of_arrival_order() {
        let events = [
            event("g", 300.0, "field_goal"),
            event("g", 100.0, "sack"),
            event("g", 200.0, "touchdown"),
        ];
        let forward = EventCache::new(14_400.0);
        let backward = EventCache::new(14_400.0);
        for e in events.iter() {
            forward.upsert(e.clone());
        }
        for e in events.iter().rev() {
            backward.upsert(e.clone());
        }
        for t in [50.0, 150.0, 250.0, 350.0] {
            assert_eq!(forward.lookup("g", t), backward.lookup("g", t));
        }
    }

    fn permutations(items: &[PlayEvent]) -> Vec<Vec<PlayEvent>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_lookup_identical_for_every_insertion_order() {
        let events = [
            event("g", 100.0, "touchdown"),
            event("g", 100.0, "extra_point"),
            event("g", 250.5, "sack"),
            event("g", 400.0, "interception"),
        ];
        let probes = [0.0, 99.999, 100.0, 100.0004, 175.0, 250.499, 250.5, 300.0, 400.0, 1_000.0];

        let reference = EventCache::new(14_400.0);
        for e in events.iter() {
            reference.upsert(e.clone());
        }

        let orders = permutations(&events);
        assert_eq!(orders.len(), 24);
        for order in orders {
            let cache = EventCache::new(14_400.0);
            for e in order {
                cache.upsert(e);
            }
            for t in probes {
                assert_eq!(
                    cache.lookup("g", t).map(|e| e.key()),
                    reference.lookup("g", t).map(|e| e.key()),
                    "lookup at {}",
                    t
                );
            }
            assert_eq!(cache.range("g", 0.0, 1_000.0), reference.range("g", 0.0, 1_000.0));
        }
    }

    #[test]
    fn test_extreme_negative_timestamp_does_not_overflow() {
        let cache = EventCache::new(14_400.0);
        assert_eq!(cache.upsert(event("g", -1e300, "kickoff")), UpsertOutcome::Inserted);
        assert_eq!(cache.upsert(event("g", -1e300, "sack")), UpsertOutcome::Inserted);
        assert_eq!(cache.upsert(event("g", 10.0, "touchdown")), UpsertOutcome::Inserted);
        assert_eq!(cache.upsert(event("g", -1e300, "late")), UpsertOutcome::Expired);
        assert_eq!(cache.event_count("g"), 1);
    }

    #[test]
    fn test_duplicate_keeps_first_write() {
        let cache = EventCache::new(14_400.0);
        let first = event("g", 100.0, "touchdown");
        let mut second = first.clone();
        second.description = "rewritten".into();

        assert_eq!(cache.upsert(first.clone()), UpsertOutcome::Inserted);
        assert_eq!(cache.upsert(second), UpsertOutcome::Duplicate);
        assert_eq!(cache.lookup("g", 100.0).unwrap().description, first.description);
        assert_eq!(cache.event_count("g"), 1);
    }

    #[test]
    fn test_same_millisecond_ordered_by_type() {
        let cache = EventCache::new(14_400.0);
        cache.upsert(event("g", 100.0, "touchdown"));
        cache.upsert(event("g", 100.0, "extra_point"));
        let types: Vec<String> = cache
            .range("g", 0.0, 200.0)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types, vec!["extra_point", "touchdown"]);
        assert_eq!(cache.lookup("g", 100.0).unwrap().event_type, "touchdown");
    }

    #[test]
    fn test_range_is_inclusive_and_ascending() {
        let cache = EventCache::new(14_400.0);
        for ts in [30.0, 10.0, 20.0, 40.0] {
            cache.upsert(event("g", ts, "play"));
        }
        let stamps: Vec<f64> = cache
            .range("g", 10.0, 30.0)
            .into_iter()
            .map(|e| e.timestamp_seconds)
            .collect();
        assert_eq!(stamps, vec![10.0, 20.0, 30.0]);
        assert!(cache.range("g", 30.0, 10.0).is_empty());
    }

    #[test]
    fn test_eviction_respects_horizon() {
        let cache = EventCache::new(100.0);
        cache.upsert(event("g", 0.0, "kickoff"));
        cache.upsert(event("g", 50.0, "sack"));
        cache.upsert(event("g", 120.0, "touchdown"));

        // 0.0 is older than 120 - 100; 50.0 is inside the horizon
        assert!(cache.lookup("g", 10.0).is_none());
        assert_eq!(cache.lookup("g", 60.0).unwrap().event_type, "sack");
        assert_eq!(cache.upsert(event("g", 5.0, "late")), UpsertOutcome::Expired);
    }

    #[test]
    fn test_select_demo_preference_order() {
        let cache = EventCache::new(14_400.0);
        cache.register_broadcast(info("nba_live", "NBA", true));
        cache.register_broadcast(info("nfl_live", "NFL", true));
        cache.register_broadcast(info("nfl_old", "NFL", false));
        cache.register_broadcast(info("empty", "NFL", true));
        cache.upsert(event("nba_live", 10.0, "rebound"));
        cache.upsert(event("nfl_live", 20.0, "sack"));
        cache.upsert(event("nfl_live", 30.0, "touchdown"));
        cache.upsert(event("nfl_old", 40.0, "sack"));

        let nfl = cache.select_demo(&["nfl".to_string()]).unwrap();
        assert_eq!(nfl.broadcast_id, "nfl_live");
        assert_eq!(nfl.offset_seconds, 30.0);
        assert!(nfl.match_reason.contains("preferred"));

        let any_live = cache.select_demo(&["MLB".to_string()]).unwrap();
        assert_eq!(any_live.broadcast_id, "nba_live");

        let empty = EventCache::new(14_400.0);
        assert!(empty.select_demo(&[]).is_none());
    }
}
