//! Session Store
//!
//! Holds the wallet session state machine and the derived read model
//! (account, chain, balance), re-publishing a snapshot on every change.
//! All mutations happen on one event timeline: a single ordered stream
//! of `SessionEvent`s consumed by one task. Balance reads are spawned
//! as discrete tasks whose completions come back on the same stream,
//! tagged with a trigger generation so stale results can be discarded.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::balance::BalanceReader;
use crate::types::{ProviderEvent, Session, SessionEvent, SessionStatus};

/// Handle given to event producers and snapshot consumers.
#[derive(Clone)]
pub struct SessionHandle {
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub snapshot: watch::Receiver<Session>,
}

pub struct SessionStore {
    reader: BalanceReader,
    session: Session,
    /// Monotonic trigger counter for balance reads. A completion whose
    /// generation is older than the current one lost the race and is
    /// discarded (last writer wins on the trigger).
    generation: u64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    snapshot_tx: watch::Sender<Session>,
}

impl SessionStore {
    /// Create the store plus the event stream it consumes and the
    /// handle its consumers use.
    pub fn new(
        reader: BalanceReader,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>, SessionHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Session::disconnected());
        let handle = SessionHandle {
            events: events_tx.clone(),
            snapshot: snapshot_rx,
        };
        let store = SessionStore {
            reader,
            session: Session::disconnected(),
            generation: 0,
            events_tx,
            snapshot_tx,
        };
        (store, events_rx, handle)
    }

    /// Drive the store until every event sender is dropped.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Session event stream closed, store stopping");
    }

    /// Apply one event. All state transitions live here.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ConnectRequested => {
                self.session = Session::connecting();
                self.publish();
            }
            SessionEvent::ConnectCompleted { account, chain_id } => {
                self.session = Session::active(account, chain_id);
                self.publish();
                self.start_balance_read(account);
            }
            SessionEvent::ConnectFailed | SessionEvent::DisconnectRequested => {
                self.reset();
            }
            SessionEvent::Provider(ProviderEvent::AccountsChanged(None)) => {
                info!("Provider lost the active account");
                self.reset();
            }
            SessionEvent::Provider(ProviderEvent::AccountsChanged(Some(account))) => {
                if !self.session.is_active() {
                    return;
                }
                self.session.account = Some(account);
                self.session.balance = None;
                self.publish();
                self.start_balance_read(account);
            }
            SessionEvent::Provider(ProviderEvent::ChainChanged(chain_id)) => {
                if !self.session.is_active() {
                    return;
                }
                self.session.chain_id = Some(chain_id);
                self.publish();
            }
            SessionEvent::BalanceRead {
                generation,
                account,
                result,
            } => {
                // Stale completion: a newer trigger superseded this
                // read, or the session moved on.
                if generation != self.generation
                    || self.session.account != Some(account)
                    || !self.session.is_active()
                {
                    debug!(
                        "Discarding stale balance read (generation {generation}, account {account})"
                    );
                    return;
                }
                match result {
                    Ok(amount) => {
                        self.session.balance = Some(amount.to_decimal_string());
                        self.publish();
                    }
                    Err(e) => warn!("Balance read failed: {e}"),
                }
            }
            SessionEvent::RefreshBalance => {
                if let (SessionStatus::Active, Some(account)) =
                    (self.session.status, self.session.account)
                {
                    self.start_balance_read(account);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.session = Session::disconnected();
        self.publish();
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(self.session.clone());
    }

    /// Spawn exactly one balance read for `account`, superseding any
    /// read still in flight.
    fn start_balance_read(&mut self, account: alloy_primitives::Address) {
        self.generation += 1;
        let generation = self.generation;
        let reader = self.reader.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = reader.read(account).await;
            let _ = events.send(SessionEvent::BalanceRead {
                generation,
                account,
                result,
            });
        });
    }
}
