use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::config::{AppConfig, TurnServer, GOOGLE_STUN_URL};
use crate::unix_now;

/// Drop everything except `[A-Za-z0-9_-]` from a room or client id
#[must_use]
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Which peer posted a batch of ICE candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Viewer,
    Teacher,
}

impl Side {
    /// Anything starting with `v` is the viewer; everything else is the teacher
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.trim().to_lowercase().starts_with('v') {
            Self::Viewer
        } else {
            Self::Teacher
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Room {
    active: bool,
    updated: i64,
    offers: HashMap<String, Value>,
    answers: HashMap<String, Value>,
    viewer_candidates: HashMap<String, Vec<Value>>,
    teacher_candidates: HashMap<String, Vec<Value>>,
}

impl Room {
    fn fresh(now: i64) -> Self {
        Self {
            updated: now,
            ..Self::default()
        }
    }

    fn bucket_mut(&mut self, side: Side) -> &mut HashMap<String, Vec<Value>> {
        match side {
            Side::Viewer => &mut self.viewer_candidates,
            Side::Teacher => &mut self.teacher_candidates,
        }
    }
}

/// Snapshot of a room for troubleshooting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDiag {
    pub active: bool,
    pub offers: usize,
    pub answers: usize,
    pub cand_v: BTreeMap<String, usize>,
    pub cand_t: BTreeMap<String, usize>,
}

/// Entry of the `iceServers` list handed to WebRTC peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Google STUN plus the configured TURN relay, if any
#[must_use]
pub fn ice_servers(turn: Option<&TurnServer>) -> Vec<IceServer> {
    let mut servers = vec![IceServer {
        urls: GOOGLE_STUN_URL.to_string(),
        username: None,
        credential: None,
    }];
    if let Some(turn) = turn.filter(|t| {
        !t.url.is_empty() && !t.username.is_empty() && !t.credential.is_empty()
    }) {
        servers.push(IceServer {
            urls: turn.url.clone(),
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
    }
    servers
}

/// In-memory WebRTC signaling rooms for teacher screen presentation.
///
/// Viewers post offers and poll for answers; both peers trickle ICE
/// candidates through per-side buckets. Rooms idle past the TTL are pruned.
pub struct PresentationStore {
    rooms: DashMap<String, Room>,
    ttl_secs: i64,
    turn: Option<TurnServer>,
}

impl PresentationStore {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            ttl_secs: i64::try_from(config.presentation_ttl_secs).unwrap_or(i64::MAX),
            turn: config.turn.clone(),
        }
    }

    fn with_room<T>(&self, room: &str, f: impl FnOnce(&mut Room, i64) -> T) -> T {
        let now = unix_now();
        let mut entry = self
            .rooms
            .entry(sanitize_id(room))
            .or_insert_with(|| Room::fresh(now));
        f(entry.value_mut(), now)
    }

    /// Mark the room live; returns the sanitized room id
    pub fn start(&self, room: &str) -> String {
        self.prune();
        let id = sanitize_id(room);
        self.with_room(&id, |r, now| {
            r.active = true;
            r.updated = now;
        });
        log::info!("Presentation started in room '{id}'");
        id
    }

    /// Reset the room to an empty, inactive state
    pub fn end(&self, room: &str) {
        let id = sanitize_id(room);
        self.rooms.insert(id.clone(), Room::fresh(unix_now()));
        log::info!("Presentation ended in room '{id}'");
    }

    #[must_use]
    pub fn status(&self, room: &str) -> bool {
        self.rooms
            .get(&sanitize_id(room))
            .is_some_and(|r| r.active)
    }

    /// Store a viewer offer; returns the client id (generated when absent)
    pub fn post_offer(&self, room: &str, client_id: Option<&str>, sdp: Value) -> String {
        let client_id = client_id
            .map(sanitize_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.with_room(room, |r, now| {
            r.offers.insert(client_id.clone(), sdp);
            r.updated = now;
        });
        client_id
    }

    #[must_use]
    pub fn offers(&self, room: &str) -> HashMap<String, Value> {
        self.rooms
            .get(&sanitize_id(room))
            .map(|r| r.offers.clone())
            .unwrap_or_default()
    }

    /// Store the teacher's answer and retire the matching offer
    pub fn post_answer(&self, room: &str, client_id: &str, sdp: Value) {
        let client_id = sanitize_id(client_id);
        self.with_room(room, |r, now| {
            r.offers.remove(&client_id);
            r.answers.insert(client_id, sdp);
            r.updated = now;
        });
    }

    #[must_use]
    pub fn answer(&self, room: &str, client_id: &str) -> Option<Value> {
        self.rooms
            .get(&sanitize_id(room))
            .and_then(|r| r.answers.get(&sanitize_id(client_id)).cloned())
    }

    /// Append candidates to the poster's own bucket
    pub fn post_candidates(&self, room: &str, side: Side, client_id: &str, candidates: Vec<Value>) {
        let client_id = sanitize_id(client_id);
        self.with_room(room, |r, now| {
            if !candidates.is_empty() {
                r.bucket_mut(side)
                    .entry(client_id)
                    .or_default()
                    .extend(candidates);
            }
            r.updated = now;
        });
    }

    /// Return and clear the candidates the other side posted for this client
    pub fn take_candidates(&self, room: &str, side: Side, client_id: &str) -> Vec<Value> {
        let client_id = sanitize_id(client_id);
        let incoming = match side {
            Side::Viewer => Side::Teacher,
            Side::Teacher => Side::Viewer,
        };
        self.with_room(room, |r, _| {
            r.bucket_mut(incoming)
                .insert(client_id, Vec::new())
                .unwrap_or_default()
        })
    }

    #[must_use]
    pub fn diag(&self, room: &str) -> RoomDiag {
        let count = |bucket: &HashMap<String, Vec<Value>>| {
            bucket
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect::<BTreeMap<_, _>>()
        };
        self.rooms
            .get(&sanitize_id(room))
            .map(|r| RoomDiag {
                active: r.active,
                offers: r.offers.len(),
                answers: r.answers.len(),
                cand_v: count(&r.viewer_candidates),
                cand_t: count(&r.teacher_candidates),
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn ice_servers(&self) -> Vec<IceServer> {
        ice_servers(self.turn.as_ref())
    }

    /// Drop rooms not touched within the TTL; returns how many were removed
    pub fn prune(&self) -> usize {
        self.prune_at(unix_now())
    }

    pub fn prune_at(&self, now: i64) -> usize {
        let before = self.rooms.len();
        self.rooms
            .retain(|_, room| now.saturating_sub(room.updated) <= self.ttl_secs);
        let removed = before.saturating_sub(self.rooms.len());
        if removed > 0 {
            log::debug!("Pruned {removed} idle presentation rooms");
        }
        removed
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
