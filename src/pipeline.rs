//! Transaction Pipeline
//!
//! Drives a transaction intent from submission to its terminal phase:
//! precondition checks, idempotent dispatch, provider submission with
//! error classification, then monitoring (inclusion wait, one
//! authoritative receipt read, result payload fetch, balance refresh).
//! Phases only ever move forward; a terminal record is never revisited.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::contract;
use crate::error::{classify_read, classify_submission, WalletError};
use crate::gateway::WalletProvider;
use crate::types::{
    ChainId, IntentKind, ReceiptStatus, Session, SessionEvent, TransactionIntent,
    TransactionRecord, TxPhase,
};

/// Equivalence key for idempotent dispatch: same account, same kind
/// (including amount). Distinct kinds may be in flight concurrently.
pub type IntentKey = (Address, IntentKind);

pub struct TransactionPipeline {
    provider: Arc<dyn WalletProvider>,
    contract: Address,
    required_chain: ChainId,
    session: watch::Receiver<Session>,
    session_events: mpsc::UnboundedSender<SessionEvent>,
    records: HashMap<IntentKey, TransactionRecord>,
}

impl TransactionPipeline {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        contract: Address,
        required_chain: ChainId,
        session: watch::Receiver<Session>,
        session_events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        TransactionPipeline {
            provider,
            contract,
            required_chain,
            session,
            session_events,
            records: HashMap::new(),
        }
    }

    /// Read-only view of the record for an intent, if any.
    pub fn record(&self, key: &IntentKey) -> Option<&TransactionRecord> {
        self.records.get(key)
    }

    /// Submit an intent. On success the record is `Submitted` with its
    /// hash recorded and the returned key identifies it for `monitor`.
    pub async fn submit(
        &mut self,
        intent: TransactionIntent,
    ) -> Result<(IntentKey, TxHash), WalletError> {
        // Precondition gate: no network contact, no record, on failure.
        let snapshot = self.session.borrow().clone();
        let (account, chain) = match (snapshot.status, snapshot.account, snapshot.chain_id) {
            (crate::types::SessionStatus::Active, Some(account), Some(chain)) => (account, chain),
            _ => return Err(WalletError::NotConnected),
        };
        if chain != self.required_chain {
            return Err(WalletError::WrongChain {
                session: chain,
                required: self.required_chain,
            });
        }

        // Idempotent dispatch: an equivalent intent still being
        // submitted blocks a second submission for the same account.
        let key: IntentKey = (account, intent.kind.clone());
        if let Some(existing) = self.records.get(&key) {
            if matches!(existing.phase, TxPhase::Created | TxPhase::Submitted) {
                debug!("Rejecting duplicate intent for {account}");
                return Err(WalletError::DuplicateIntent);
            }
        }

        let (data, value) = match &intent.kind {
            IntentKind::BuyToken(amount) => {
                let value = amount.native_value().ok_or_else(|| {
                    WalletError::SubmissionError(
                        "amount is not exactly representable at the LKT/ETH rate".to_string(),
                    )
                })?;
                (contract::buy_calldata(), value)
            }
            IntentKind::BuyMessage => (contract::buy_message_calldata(), U256::ZERO),
        };

        self.records
            .insert(key.clone(), TransactionRecord::created(intent));

        match self.provider.send_transaction(self.contract, data, value).await {
            Ok(hash) => {
                info!("Transaction submitted: {hash:?}");
                if let Some(record) = self.records.get_mut(&key) {
                    record.hash = Some(hash);
                    Self::advance(record, TxPhase::Submitted);
                }
                Ok((key, hash))
            }
            Err(raw) => {
                let classified = classify_submission(&raw);
                warn!("Submission failed: {classified}");
                if let Some(record) = self.records.get_mut(&key) {
                    Self::advance(record, TxPhase::Failed(classified.clone()));
                }
                Err(classified)
            }
        }
    }

    /// Monitor a submitted record to its terminal phase. Waits for the
    /// first inclusion event, then performs exactly one authoritative
    /// receipt read to decide the outcome. Always returns the terminal
    /// record once the intent is known; the outcome lives in its phase.
    pub async fn monitor(&mut self, key: &IntentKey) -> Result<TransactionRecord, WalletError> {
        let (hash, kind) = {
            let record = self
                .records
                .get(key)
                .ok_or_else(|| WalletError::SubmissionError("unknown intent".to_string()))?;
            let hash = record.hash.ok_or_else(|| {
                WalletError::SubmissionError("record has no transaction hash".to_string())
            })?;
            (hash, record.intent.kind.clone())
        };

        self.set_phase(key, TxPhase::PendingConfirmation);

        if let Err(raw) = self.provider.wait_for_inclusion(hash).await {
            let failed = WalletError::ConfirmationCheckError(raw.message);
            self.set_phase(key, TxPhase::Failed(failed));
            return self.terminal_record(key);
        }

        match self.provider.transaction_receipt(hash).await {
            Ok(Some(ReceiptStatus::Success)) => {
                info!("Transaction confirmed: {hash:?}");
                self.set_phase(key, TxPhase::Confirmed);

                if kind == IntentKind::BuyMessage {
                    match self.fetch_last_message().await {
                        Ok(message) => {
                            if let Some(record) = self.records.get_mut(key) {
                                record.result_payload = Some(message);
                            }
                        }
                        Err(e) => warn!("Result payload fetch failed: {e}"),
                    }
                }

                let _ = self.session_events.send(SessionEvent::RefreshBalance);
            }
            Ok(Some(ReceiptStatus::Reverted)) => {
                warn!("Transaction reverted on-chain: {hash:?}");
                self.set_phase(key, TxPhase::Failed(WalletError::OnChainRevert));
            }
            Ok(None) => {
                let failed = WalletError::ConfirmationCheckError(
                    "receipt unavailable after inclusion".to_string(),
                );
                self.set_phase(key, TxPhase::Failed(failed));
            }
            Err(raw) => {
                // Reported, not retried: the caller may `recheck`.
                let failed = WalletError::ConfirmationCheckError(raw.message);
                self.set_phase(key, TxPhase::Failed(failed));
            }
        }

        self.terminal_record(key)
    }

    fn terminal_record(&self, key: &IntentKey) -> Result<TransactionRecord, WalletError> {
        self.records
            .get(key)
            .cloned()
            .ok_or_else(|| WalletError::SubmissionError("unknown intent".to_string()))
    }

    /// Re-run the receipt check for a stored hash after a
    /// `ConfirmationCheckError`. The original record stays terminal;
    /// this is a fresh report of the on-chain outcome. A success here
    /// still refreshes the balance.
    pub async fn recheck(&self, hash: TxHash) -> Result<ReceiptStatus, WalletError> {
        match self.provider.transaction_receipt(hash).await {
            Ok(Some(status)) => {
                if status == ReceiptStatus::Success {
                    let _ = self.session_events.send(SessionEvent::RefreshBalance);
                }
                Ok(status)
            }
            Ok(None) => Err(WalletError::ConfirmationCheckError(
                "receipt not available".to_string(),
            )),
            Err(raw) => Err(WalletError::ConfirmationCheckError(raw.message)),
        }
    }

    /// Explicitly abandon local monitoring of an intent. The broadcast
    /// transaction itself cannot be cancelled; the record (hash
    /// included) is handed back for a later `recheck`.
    pub fn abandon(&mut self, key: &IntentKey) -> Option<TransactionRecord> {
        let record = self.records.remove(key);
        if let Some(ref r) = record {
            info!("Abandoned local monitoring of {:?}", r.hash);
        }
        record
    }

    async fn fetch_last_message(&self) -> Result<String, WalletError> {
        let raw = self
            .provider
            .call(self.contract, contract::get_last_message_calldata())
            .await
            .map_err(|e| classify_read(&e))?;
        contract::decode_last_message(&raw)
    }

    fn set_phase(&mut self, key: &IntentKey, next: TxPhase) {
        if let Some(record) = self.records.get_mut(key) {
            Self::advance(record, next);
        }
    }

    /// Forward-only phase transition. A terminal record is never
    /// moved again; an out-of-order transition is dropped loudly.
    fn advance(record: &mut TransactionRecord, next: TxPhase) {
        if record.phase.is_terminal() {
            warn!(
                "Ignoring phase transition from terminal {:?} to {:?}",
                record.phase, next
            );
            return;
        }
        if next.rank() < record.phase.rank() {
            warn!(
                "Ignoring backwards phase transition {:?} -> {:?}",
                record.phase, next
            );
            return;
        }
        record.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{CONTRACT_ADDRESS, REQUIRED_CHAIN_ID};
    use crate::error::ProviderFailure;
    use crate::gateway::mock::{account_a, tx_hash_1, MockProvider};
    use crate::types::TokenAmount;
    use std::sync::atomic::Ordering;

    struct Harness {
        provider: Arc<MockProvider>,
        pipeline: TransactionPipeline,
        session_tx: watch::Sender<Session>,
        refreshes: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn harness_with_session(session: Session) -> Harness {
        let provider = Arc::new(MockProvider::default());
        let (session_tx, session_rx) = watch::channel(session);
        let (events_tx, refreshes) = mpsc::unbounded_channel();
        let pipeline = TransactionPipeline::new(
            Arc::clone(&provider) as Arc<dyn WalletProvider>,
            CONTRACT_ADDRESS,
            REQUIRED_CHAIN_ID,
            session_rx,
            events_tx,
        );
        Harness {
            provider,
            pipeline,
            session_tx,
            refreshes,
        }
    }

    fn active_harness() -> Harness {
        harness_with_session(Session::active(account_a(), REQUIRED_CHAIN_ID))
    }

    fn buy_two_lkt() -> TransactionIntent {
        TransactionIntent::new(IntentKind::BuyToken(TokenAmount::from_lkt("2").unwrap()))
    }

    fn refresh_count(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> usize {
        let mut n = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::RefreshBalance) {
                n += 1;
            }
        }
        n
    }

    #[tokio::test]
    async fn test_buy_token_confirms_and_refreshes_once() {
        let mut h = active_harness();

        let (key, hash) = h.pipeline.submit(buy_two_lkt()).await.unwrap();
        assert_eq!(hash, tx_hash_1());
        assert_eq!(h.pipeline.record(&key).unwrap().phase, TxPhase::Submitted);

        let record = h.pipeline.monitor(&key).await.unwrap();
        assert_eq!(record.phase, TxPhase::Confirmed);
        assert_eq!(h.provider.receipt_count.load(Ordering::SeqCst), 1);
        assert_eq!(refresh_count(&mut h.refreshes), 1);

        // 2 LKT at 10 LKT/ETH: a buy() call carrying 0.2 ETH.
        let sent = h.provider.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(contract::selector_matches(&sent[0].1, contract::BUY_SELECTOR));
        let expected = U256::from(2u64) * U256::from(10u64).pow(U256::from(17u64));
        assert_eq!(sent[0].2, expected);
    }

    #[tokio::test]
    async fn test_buy_message_fetches_payload() {
        let mut h = active_harness();

        let (key, _) = h
            .pipeline
            .submit(TransactionIntent::new(IntentKind::BuyMessage))
            .await
            .unwrap();
        let record = h.pipeline.monitor(&key).await.unwrap();

        assert_eq!(record.phase, TxPhase::Confirmed);
        assert_eq!(
            record.result_payload.as_deref(),
            Some("May fortune follow you")
        );
        assert_eq!(refresh_count(&mut h.refreshes), 1);

        // A zero-value buyMessage() call.
        let sent = h.provider.sent.lock().unwrap();
        assert!(contract::selector_matches(
            &sent[0].1,
            contract::BUY_MESSAGE_SELECTOR
        ));
        assert_eq!(sent[0].2, U256::ZERO);
    }

    #[tokio::test]
    async fn test_submit_while_disconnected_fails_synchronously() {
        let mut h = harness_with_session(Session::disconnected());

        let result = h.pipeline.submit(buy_two_lkt()).await;
        assert_eq!(result, Err(WalletError::NotConnected));
        // No network contact and no record.
        assert_eq!(h.provider.send_count.load(Ordering::SeqCst), 0);
        assert!(h
            .pipeline
            .record(&(account_a(), buy_two_lkt().kind))
            .is_none());
    }

    #[tokio::test]
    async fn test_submit_on_wrong_chain_fails_synchronously() {
        let mut h = harness_with_session(Session::active(account_a(), 1));

        let result = h.pipeline.submit(buy_two_lkt()).await;
        assert_eq!(
            result,
            Err(WalletError::WrongChain {
                session: 1,
                required: REQUIRED_CHAIN_ID
            })
        );
        assert_eq!(h.provider.send_count.load(Ordering::SeqCst), 0);
        assert!(h
            .pipeline
            .record(&(account_a(), buy_two_lkt().kind))
            .is_none());
    }

    #[tokio::test]
    async fn test_signing_rejection_fails_with_user_rejected() {
        let mut h = active_harness();
        *h.provider.send_response.lock().unwrap() = Err(ProviderFailure::new(
            Some(4001),
            "User denied transaction signature",
        ));

        let result = h.pipeline.submit(buy_two_lkt()).await;
        assert_eq!(result, Err(WalletError::UserRejected));

        let record = h
            .pipeline
            .record(&(account_a(), buy_two_lkt().kind))
            .unwrap();
        assert_eq!(record.phase, TxPhase::Failed(WalletError::UserRejected));
        // Only the rejected prompt itself touched the provider.
        assert_eq!(h.provider.send_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_classification() {
        let mut h = active_harness();
        *h.provider.send_response.lock().unwrap() =
            Err(ProviderFailure::new(Some(-32603), "Internal JSON-RPC error"));

        let result = h.pipeline.submit(buy_two_lkt()).await;
        assert_eq!(result, Err(WalletError::InsufficientFunds));
    }

    #[tokio::test]
    async fn test_gas_estimation_classification() {
        let mut h = active_harness();
        *h.provider.send_response.lock().unwrap() = Err(ProviderFailure::new(
            None,
            "cannot estimate gas; transaction may fail",
        ));

        let result = h.pipeline.submit(buy_two_lkt()).await;
        assert_eq!(result, Err(WalletError::GasEstimationFailed));
    }

    #[tokio::test]
    async fn test_duplicate_intent_yields_one_submitted_record() {
        let mut h = active_harness();

        let first = h.pipeline.submit(buy_two_lkt()).await;
        assert!(first.is_ok());

        let second = h.pipeline.submit(buy_two_lkt()).await;
        assert_eq!(second, Err(WalletError::DuplicateIntent));

        assert_eq!(h.provider.send_count.load(Ordering::SeqCst), 1);
        let record = h
            .pipeline
            .record(&(account_a(), buy_two_lkt().kind))
            .unwrap();
        assert_eq!(record.phase, TxPhase::Submitted);
    }

    #[tokio::test]
    async fn test_distinct_intents_may_run_concurrently() {
        let mut h = active_harness();

        h.pipeline.submit(buy_two_lkt()).await.unwrap();
        let second = h
            .pipeline
            .submit(TransactionIntent::new(IntentKind::BuyMessage))
            .await;
        assert!(second.is_ok());
        assert_eq!(h.provider.send_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_revert_fails_without_balance_refresh() {
        let mut h = active_harness();
        *h.provider.receipt_response.lock().unwrap() = Ok(Some(ReceiptStatus::Reverted));

        let (key, _) = h.pipeline.submit(buy_two_lkt()).await.unwrap();
        let record = h.pipeline.monitor(&key).await.unwrap();

        assert_eq!(record.phase, TxPhase::Failed(WalletError::OnChainRevert));
        assert_eq!(refresh_count(&mut h.refreshes), 0);
    }

    #[tokio::test]
    async fn test_receipt_error_reports_confirmation_check_error() {
        let mut h = active_harness();
        *h.provider.receipt_response.lock().unwrap() =
            Err(ProviderFailure::new(None, "node unavailable"));

        let (key, _) = h.pipeline.submit(buy_two_lkt()).await.unwrap();
        let record = h.pipeline.monitor(&key).await.unwrap();

        assert_eq!(
            record.phase,
            TxPhase::Failed(WalletError::ConfirmationCheckError(
                "node unavailable".to_string()
            ))
        );
        assert_eq!(refresh_count(&mut h.refreshes), 0);
    }

    #[tokio::test]
    async fn test_recheck_reports_without_rewinding_record() {
        let mut h = active_harness();
        *h.provider.receipt_response.lock().unwrap() =
            Err(ProviderFailure::new(None, "node unavailable"));

        let (key, hash) = h.pipeline.submit(buy_two_lkt()).await.unwrap();
        h.pipeline.monitor(&key).await.unwrap();

        // The node recovered; recheck reports success but the original
        // record stays terminal.
        *h.provider.receipt_response.lock().unwrap() = Ok(Some(ReceiptStatus::Success));
        let status = h.pipeline.recheck(hash).await.unwrap();
        assert_eq!(status, ReceiptStatus::Success);
        assert_eq!(refresh_count(&mut h.refreshes), 1);
        assert!(matches!(
            h.pipeline.record(&key).unwrap().phase,
            TxPhase::Failed(WalletError::ConfirmationCheckError(_))
        ));
    }

    #[tokio::test]
    async fn test_abandon_returns_record_with_hash() {
        let mut h = active_harness();

        let (key, hash) = h.pipeline.submit(buy_two_lkt()).await.unwrap();
        let abandoned = h.pipeline.abandon(&key).unwrap();

        assert_eq!(abandoned.hash, Some(hash));
        assert!(h.pipeline.record(&key).is_none());
    }

    #[tokio::test]
    async fn test_phases_never_leave_terminal() {
        let mut record = TransactionRecord::created(buy_two_lkt());
        TransactionPipeline::advance(&mut record, TxPhase::Submitted);
        TransactionPipeline::advance(&mut record, TxPhase::PendingConfirmation);
        TransactionPipeline::advance(&mut record, TxPhase::Confirmed);

        TransactionPipeline::advance(&mut record, TxPhase::Failed(WalletError::OnChainRevert));
        assert_eq!(record.phase, TxPhase::Confirmed);

        TransactionPipeline::advance(&mut record, TxPhase::Created);
        assert_eq!(record.phase, TxPhase::Confirmed);
    }

    #[tokio::test]
    async fn test_resubmit_after_terminal_phase_is_allowed() {
        let mut h = active_harness();
        *h.provider.send_response.lock().unwrap() =
            Err(ProviderFailure::new(Some(4001), "denied"));

        let _ = h.pipeline.submit(buy_two_lkt()).await;
        // Explicit re-invocation after a terminal failure is permitted.
        *h.provider.send_response.lock().unwrap() = Ok(tx_hash_1());
        let retry = h.pipeline.submit(buy_two_lkt()).await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn test_inclusion_failure_returns_terminal_record() {
        let mut h = active_harness();
        *h.provider.inclusion_response.lock().unwrap() =
            Err(ProviderFailure::new(None, "connection reset"));

        let (key, hash) = h.pipeline.submit(buy_two_lkt()).await.unwrap();
        // One terminal-record surface regardless of which step broke.
        let record = h.pipeline.monitor(&key).await.unwrap();

        assert_eq!(record.hash, Some(hash));
        assert_eq!(
            record.phase,
            TxPhase::Failed(WalletError::ConfirmationCheckError(
                "connection reset".to_string()
            ))
        );
        assert_eq!(refresh_count(&mut h.refreshes), 0);
    }

    #[tokio::test]
    async fn test_required_chain_follows_configuration() {
        let provider = Arc::new(MockProvider::default());
        let (_session_tx, session_rx) = watch::channel(Session::active(account_a(), 1));
        let (events_tx, _refreshes) = mpsc::unbounded_channel();
        let mut pipeline = TransactionPipeline::new(
            Arc::clone(&provider) as Arc<dyn WalletProvider>,
            CONTRACT_ADDRESS,
            1,
            session_rx,
            events_tx,
        );

        // Chain 1 is acceptable when the pipeline was built for it.
        assert!(pipeline.submit(buy_two_lkt()).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_after_published_connect_snapshot_succeeds() {
        // The wiring the CLI uses: a running store publishing snapshots
        // that the pipeline reads at submit time. A connect completion
        // is only safe to act on once the Active snapshot is visible.
        let provider = Arc::new(MockProvider::default());
        let reader = crate::balance::BalanceReader::new(
            Arc::clone(&provider) as Arc<dyn WalletProvider>,
            CONTRACT_ADDRESS,
        );
        let (store, events_rx, handle) = crate::session::SessionStore::new(reader);
        tokio::spawn(store.run(events_rx));

        let mut pipeline = TransactionPipeline::new(
            Arc::clone(&provider) as Arc<dyn WalletProvider>,
            CONTRACT_ADDRESS,
            REQUIRED_CHAIN_ID,
            handle.snapshot.clone(),
            handle.events.clone(),
        );

        handle
            .events
            .send(SessionEvent::ConnectCompleted {
                account: account_a(),
                chain_id: REQUIRED_CHAIN_ID,
            })
            .unwrap();

        let mut snapshot = handle.snapshot.clone();
        snapshot.wait_for(Session::is_active).await.unwrap();

        assert!(pipeline.submit(buy_two_lkt()).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_updates_are_observed_at_submit_time() {
        let mut h = harness_with_session(Session::disconnected());

        assert_eq!(
            h.pipeline.submit(buy_two_lkt()).await,
            Err(WalletError::NotConnected)
        );

        h.session_tx
            .send(Session::active(account_a(), REQUIRED_CHAIN_ID))
            .unwrap();
        assert!(h.pipeline.submit(buy_two_lkt()).await.is_ok());
    }
}
