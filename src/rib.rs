use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use ipnet::Ipv4Net;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::error::{Error, RibError};
use crate::event::RibEvent;
use crate::path::{RouteEntry, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdateKind {
    Add,
    Withdraw,
}

/// Change of the best route for one prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteUpdate {
    pub kind: RouteUpdateKind,
    pub entry: RouteEntry,
}

impl RouteUpdate {
    fn add(entry: RouteEntry) -> Self {
        Self {
            kind: RouteUpdateKind::Add,
            entry,
        }
    }

    fn withdraw(entry: RouteEntry) -> Self {
        Self {
            kind: RouteUpdateKind::Withdraw,
            entry,
        }
    }
}

/// Routes received from one session, keyed by prefix.
#[derive(Debug, Default)]
pub(crate) struct AdjRibIn {
    table: HashMap<Ipv4Net, RouteEntry>,
}

impl AdjRibIn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the prefix is new or its attributes changed.
    pub fn insert(&mut self, entry: RouteEntry) -> bool {
        match self.table.get(&entry.prefix()) {
            Some(old) if *old == entry => false,
            _ => {
                self.table.insert(entry.prefix(), entry);
                true
            }
        }
    }

    pub fn remove(&mut self, prefix: &Ipv4Net) -> Option<RouteEntry> {
        self.table.remove(prefix)
    }

    /// All routes ordered by prefix.
    pub fn routes(&self) -> Vec<RouteEntry> {
        let mut routes: Vec<RouteEntry> = self.table.values().cloned().collect();
        routes.sort_by_key(|r| r.prefix());
        routes
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

/// Orders routes by preference; `Ordering::Less` means `a` is preferred.
///
/// https://www.rfc-editor.org/rfc/rfc4271#section-9.1.2.2
pub(crate) fn compare(a: &RouteEntry, b: &RouteEntry) -> Ordering {
    b.local_pref()
        .cmp(&a.local_pref())
        .then_with(|| a.as_path().length().cmp(&b.as_path().length()))
        .then_with(|| a.origin().cmp(&b.origin()))
        .then_with(|| match (a.med(), b.med()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.peer_id().cmp(&b.peer_id()))
        .then_with(|| a.next_hop().cmp(&b.next_hop()))
        .then_with(|| a.session().cmp(&b.session()))
}

/// Best route per prefix across all sessions.
#[derive(Debug, Default)]
pub(crate) struct LocRib {
    candidates: HashMap<Ipv4Net, HashMap<SessionId, RouteEntry>>,
    best: HashMap<Ipv4Net, RouteEntry>,
    index: HashMap<SessionId, HashSet<Ipv4Net>>,
}

impl LocRib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, session: SessionId, entries: Vec<RouteEntry>) -> Vec<RouteUpdate> {
        let mut updates = Vec::new();
        for entry in entries.into_iter() {
            let prefix = entry.prefix();
            self.candidates
                .entry(prefix)
                .or_default()
                .insert(session, entry);
            self.index.entry(session).or_default().insert(prefix);
            if let Some(update) = self.select(prefix) {
                updates.push(update);
            }
        }
        updates
    }

    pub fn drop_paths(&mut self, session: SessionId, prefixes: Vec<Ipv4Net>) -> Vec<RouteUpdate> {
        let mut updates = Vec::new();
        for prefix in prefixes.into_iter() {
            if let Some(owned) = self.index.get_mut(&session) {
                owned.remove(&prefix);
            }
            if let Some(update) = self.remove_candidate(session, prefix) {
                updates.push(update);
            }
        }
        if self.index.get(&session).map_or(false, |p| p.is_empty()) {
            self.index.remove(&session);
        }
        updates
    }

    pub fn drop_session(&mut self, session: SessionId) -> Vec<RouteUpdate> {
        let mut prefixes: Vec<Ipv4Net> = self
            .index
            .remove(&session)
            .map(|p| p.into_iter().collect())
            .unwrap_or_default();
        prefixes.sort();
        prefixes
            .into_iter()
            .filter_map(|prefix| self.remove_candidate(session, prefix))
            .collect()
    }

    /// Withdraw every best route and forget all candidates.
    pub fn withdraw_all(&mut self) -> Vec<RouteUpdate> {
        self.candidates.clear();
        self.index.clear();
        let mut updates: Vec<RouteUpdate> = self
            .best
            .drain()
            .map(|(_, entry)| RouteUpdate::withdraw(entry))
            .collect();
        updates.sort_by_key(|u| u.entry.prefix());
        updates
    }

    /// Best routes ordered by prefix.
    pub fn best_routes(&self) -> Vec<RouteEntry> {
        let mut routes: Vec<RouteEntry> = self.best.values().cloned().collect();
        routes.sort_by_key(|r| r.prefix());
        routes
    }

    fn remove_candidate(&mut self, session: SessionId, prefix: Ipv4Net) -> Option<RouteUpdate> {
        let candidates = self.candidates.get_mut(&prefix)?;
        candidates.remove(&session)?;
        if candidates.is_empty() {
            self.candidates.remove(&prefix);
        }
        self.select(prefix)
    }

    // Recompute the best route for `prefix` and report a change if there is one.
    fn select(&mut self, prefix: Ipv4Net) -> Option<RouteUpdate> {
        let winner = self
            .candidates
            .get(&prefix)
            .and_then(|c| c.values().min_by(|a, b| compare(a, b)))
            .cloned();
        let current = self.best.get(&prefix).cloned();
        match (winner, current) {
            (None, None) => None,
            (None, Some(_)) => self.best.remove(&prefix).map(RouteUpdate::withdraw),
            (Some(winner), Some(current)) if winner == current => {
                if winner.session() != current.session() {
                    self.best.insert(prefix, winner);
                }
                None
            }
            (Some(winner), _) => {
                self.best.insert(prefix, winner.clone());
                Some(RouteUpdate::add(winner))
            }
        }
    }
}

/// Owns all writes to the global table.
#[derive(Debug)]
pub(crate) struct RibManager {
    loc_rib: Arc<Mutex<LocRib>>,
    listener_tx: Sender<Vec<RouteUpdate>>,
}

impl RibManager {
    pub fn new(loc_rib: Arc<Mutex<LocRib>>, listener_tx: Sender<Vec<RouteUpdate>>) -> Self {
        Self {
            loc_rib,
            listener_tx,
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(mut self, mut rx: Receiver<RibEvent>) {
        tracing::info!("start rib manager");
        while let Some(event) = rx.recv().await {
            match event {
                RibEvent::Shutdown(ack) => {
                    let updates = self
                        .loc_rib
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .withdraw_all();
                    tracing::info!(withdrawn = updates.len(), "withdraw all routes");
                    if let Err(e) = self.dispatch(updates).await {
                        tracing::error!(error = %e, "failed to dispatch withdrawals");
                    }
                    let _ = ack.send(());
                    break;
                }
                event => {
                    if let Err(e) = self.handle(event).await {
                        tracing::error!(error = %e, "failed to handle rib event");
                    }
                }
            }
        }
        tracing::info!("stop rib manager");
    }

    #[tracing::instrument(skip(self))]
    async fn handle(&mut self, event: RibEvent) -> Result<(), Error> {
        let updates = {
            let mut loc_rib = self.loc_rib.lock().unwrap_or_else(PoisonError::into_inner);
            match event {
                RibEvent::InstallPaths(session, entries) => loc_rib.install(session, entries),
                RibEvent::DropPaths(session, prefixes) => loc_rib.drop_paths(session, prefixes),
                RibEvent::DropSession(session) => loc_rib.drop_session(session),
                RibEvent::Shutdown(_) => return Err(Error::Rib(RibError::ManagerStopped)),
            }
        };
        self.dispatch(updates).await
    }

    async fn dispatch(&self, updates: Vec<RouteUpdate>) -> Result<(), Error> {
        if updates.is_empty() {
            return Ok(());
        }
        for update in updates.iter() {
            tracing::debug!(kind = ?update.kind, route = %update.entry, "best path changed");
        }
        self.listener_tx
            .send(updates)
            .await
            .map_err(|_| Error::Rib(RibError::ListenerClosed))
    }
}
