//! Unit tests for individual LedgerLink components, through their public API

#[cfg(test)]
mod provider_tests {
    use ledgerlink::provider::{normalize_failure, IntentOutcome, ProviderError};

    #[test]
    fn test_rejection_signals_are_normalized() {
        assert_eq!(normalize_failure(Some(4001), "nope"), ProviderError::UserRejected);
        assert_eq!(normalize_failure(Some(-4), "declined"), ProviderError::UserRejected);
        assert_eq!(
            normalize_failure(None, "The user rejected the request"),
            ProviderError::UserRejected
        );
        assert!(matches!(
            normalize_failure(Some(-32603), "internal"),
            ProviderError::Failed(_)
        ));
    }

    #[test]
    fn test_cancelled_intent_is_a_rejection() {
        assert_eq!(IntentOutcome::Cancelled.into_result(), Err(ProviderError::UserRejected));
        assert_eq!(
            IntentOutcome::Completed("GUSER".into()).into_result(),
            Ok("GUSER".to_string())
        );
    }
}

#[cfg(test)]
mod ledger_tests {
    use ledgerlink::ledger::retry::reconnect_delay;
    use ledgerlink::ledger::{BackoffStrategy, Network, RpcError};
    use std::time::Duration;

    #[test]
    fn test_backoff_strictly_increases() {
        let strategy = BackoffStrategy::default();
        let delays: Vec<_> = (1..=5).map(|a| strategy.calculate_delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(delays[0], Duration::from_secs(2));
    }

    #[test]
    fn test_reconnect_delay_is_capped() {
        let cap = Duration::from_secs(30);
        assert_eq!(reconnect_delay(1, cap), Duration::from_secs(1));
        assert_eq!(reconnect_delay(3, cap), Duration::from_secs(4));
        assert_eq!(reconnect_delay(20, cap), cap);
    }

    #[test]
    fn test_only_path_failures_are_transient() {
        assert!(RpcError::Timeout.is_transient());
        assert!(RpcError::TryAgainLater("busy".into()).is_transient());
        assert!(!RpcError::Rejected {
            code: "tx_bad_seq".into(),
            detail: String::new()
        }
        .is_transient());
        assert!(!RpcError::NotFound("GNOBODY".into()).is_transient());
    }

    #[test]
    fn test_network_passphrases_round_trip() {
        for network in [Network::Public, Network::Testnet, Network::Futurenet] {
            assert_eq!(Network::from_passphrase(network.passphrase()), network);
        }
        let custom = Network::from_passphrase("Standalone Network ; February 2017");
        assert!(matches!(custom, Network::Custom { .. }));
    }
}

#[cfg(test)]
mod event_tests {
    use chrono::{TimeZone, Utc};
    use ledgerlink::events::{scval, ContractEvent, EventKind, EventStore};
    use serde_json::json;
    use tempfile::TempDir;

    fn event(id: &str, contract: &str, kind: EventKind, secs: i64) -> ContractEvent {
        ContractEvent {
            id: id.to_string(),
            contract_id: contract.to_string(),
            kind,
            topics: vec![],
            data: json!(null),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            transaction_hash: format!("tx-{}", id),
            ledger_sequence: secs as u32,
        }
    }

    #[test]
    fn test_scval_decoding() {
        let map = json!({"map": [
            {"key": {"symbol": "amount"}, "val": {"i128": "-42"}},
            {"key": {"symbol": "who"}, "val": {"address": "GABC"}}
        ]});
        let plain = scval::to_plain(&map);

        assert_eq!(scval::field(&plain, &["amount"]).and_then(scval::as_i128), Some(-42));
        assert_eq!(
            scval::field(&plain, &["user", "who"]).and_then(scval::as_text),
            Some("GABC".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_queries_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = EventStore::with_storage(dir.path()).unwrap();

        let reward = EventKind::Reward {
            recipient: Some("GWINNER".into()),
            amount: Some(10),
        };
        let engagement = EventKind::Engagement {
            actor: None,
            action: "click".into(),
        };
        let stored = store
            .put(vec![
                event("a", "C1", reward.clone(), 100),
                event("b", "C2", engagement, 300),
                event("c", "C1", reward, 200),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 3);

        let by_contract: Vec<_> = store.by_contract("C1").await.into_iter().map(|e| e.id).collect();
        assert_eq!(by_contract, vec!["c", "a"]);
        assert_eq!(store.by_type("engagement").await.len(), 1);
        let recent: Vec<_> = store.recent(2).await.into_iter().map(|e| e.id).collect();
        assert_eq!(recent, vec!["b", "c"]);

        let reopened = EventStore::with_storage(dir.path()).unwrap();
        assert_eq!(reopened.len().await, 3);
        assert_eq!(reopened.purge_contract("C1").await.unwrap(), 2);
        assert_eq!(reopened.len().await, 1);
    }
}

#[cfg(test)]
mod queue_tests {
    use ledgerlink::queue::{OfflineQueue, QueueError, QueueStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_queue_lifecycle_is_persisted() {
        let dir = TempDir::new().unwrap();
        let queue = OfflineQueue::with_storage(dir.path()).unwrap();

        let first = queue.enqueue("payload-1".into()).await.unwrap();
        let second = queue.enqueue("payload-2".into()).await.unwrap();
        assert_eq!(queue.peek_pending().await.map(|t| t.id), Some(first.clone()));

        queue.begin_retry(&first).await.unwrap();
        assert!(matches!(queue.begin_retry(&first).await, Err(QueueError::InFlight(_))));
        queue.mark_failed(&first, "still offline".into()).await.unwrap();

        let reopened = OfflineQueue::with_storage(dir.path()).unwrap();
        let failed = reopened.get(&first).await.unwrap();
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("still offline"));

        reopened.remove(&second).await.unwrap();
        assert_eq!(reopened.len().await, 1);
    }
}
