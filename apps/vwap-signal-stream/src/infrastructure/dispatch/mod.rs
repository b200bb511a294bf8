//! Signal Lookup Dispatcher
//!
//! Runs each option-chain lookup on its own Tokio task so the ingestion loop
//! never waits on the network. Every lookup ends in exactly one
//! [`DispatchOutcome`] on the outcome channel, including timeouts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::application::ports::{
    DispatchFailure, DispatchOutcome, OptionChainPort, SignalDispatchPort, SignalRequest,
    Underlying,
};
use crate::domain::signal::SignalReport;

/// Dispatches signal lookups onto the Tokio runtime.
pub struct TokioSignalDispatcher {
    source: Arc<dyn OptionChainPort>,
    underlying: Underlying,
    timeout: Duration,
    outcomes: mpsc::UnboundedSender<DispatchOutcome>,
}

impl std::fmt::Debug for TokioSignalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSignalDispatcher")
            .field("underlying", &self.underlying)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TokioSignalDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        source: Arc<dyn OptionChainPort>,
        underlying: Underlying,
        timeout: Duration,
        outcomes: mpsc::UnboundedSender<DispatchOutcome>,
    ) -> Self {
        Self {
            source,
            underlying,
            timeout,
            outcomes,
        }
    }
}

impl SignalDispatchPort for TokioSignalDispatcher {
    fn dispatch(&self, request: SignalRequest) {
        let source = Arc::clone(&self.source);
        let underlying = self.underlying.clone();
        let timeout = self.timeout;
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            tracing::debug!(dispatch = %request.id, %underlying, "Fetching option chain");

            let result =
                match tokio::time::timeout(timeout, source.fetch_option_chain(&underlying)).await {
                    Ok(Ok(snapshot)) => Ok(SignalReport::new(&snapshot, request.price, request.vwap)),
                    Ok(Err(err)) => Err(DispatchFailure::from(err)),
                    Err(_) => Err(DispatchFailure::Timeout(timeout)),
                };

            let outcome = DispatchOutcome {
                id: request.id,
                result,
                elapsed: started.elapsed(),
            };
            if outcomes.send(outcome).is_err() {
                tracing::debug!(dispatch = %request.id, "Engine gone; dropping lookup outcome");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::OptionChainError;
    use crate::domain::signal::{
        DispatchId, OptionChainSnapshot, Signal, StrikeData, StrikeQuote,
    };

    #[derive(Debug)]
    enum FakeChain {
        Chain(OptionChainSnapshot),
        Fail(OptionChainError),
        Hang,
    }

    #[async_trait]
    impl OptionChainPort for FakeChain {
        async fn fetch_option_chain(
            &self,
            _underlying: &Underlying,
        ) -> Result<OptionChainSnapshot, OptionChainError> {
            match self {
                Self::Chain(snapshot) => Ok(snapshot.clone()),
                Self::Fail(err) => Err(err.clone()),
                Self::Hang => std::future::pending().await,
            }
        }
    }

    fn request() -> SignalRequest {
        SignalRequest {
            id: DispatchId(7),
            price: 75_010.0,
            vwap: 75_000.0,
            timestamp: 1_717_406_100,
        }
    }

    async fn run(source: FakeChain, timeout: Duration) -> DispatchOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher =
            TokioSignalDispatcher::new(Arc::new(source), Underlying::default(), timeout, tx);
        dispatcher.dispatch(request());
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn successful_lookup_reports_signal() {
        let snapshot = OptionChainSnapshot::new(
            Some("2024-06-07".to_string()),
            vec![StrikeQuote {
                strike: 75_000.0,
                data: StrikeData {
                    call_oi: 100,
                    put_oi: 150,
                    ..StrikeData::default()
                },
            }],
        );

        let outcome = run(FakeChain::Chain(snapshot), Duration::from_secs(1)).await;
        assert_eq!(outcome.id, DispatchId(7));
        let report = outcome.result.unwrap();
        assert_eq!(report.signal, Signal::BuyCall);
        assert!((report.pcr - 1.5).abs() < 1e-9);
        assert!((report.vwap - 75_000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn source_error_is_reported() {
        let err = OptionChainError::NoExpiries {
            underlying: Underlying::default(),
        };
        let outcome = run(FakeChain::Fail(err.clone()), Duration::from_secs(1)).await;
        assert_eq!(outcome.result, Err(DispatchFailure::OptionChain(err)));
    }

    #[tokio::test]
    async fn slow_lookup_times_out() {
        let outcome = run(FakeChain::Hang, Duration::from_millis(20)).await;
        assert_eq!(
            outcome.result,
            Err(DispatchFailure::Timeout(Duration::from_millis(20)))
        );
    }
}
