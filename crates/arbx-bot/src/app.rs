//! Main application.

use std::sync::Arc;

use arbx_core::TradeRequest;
use arbx_executor::{
    DynVenue, EventSink, ExecutionEngine, ExecutionEvent, PaperVenue, ProbeService, VenueRegistry,
};
use arbx_telemetry::Metrics;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;

/// Paper-trading host around one [`ExecutionEngine`].
pub struct Application {
    config: AppConfig,
    engine: Arc<ExecutionEngine>,
    events: mpsc::Receiver<ExecutionEvent>,
}

impl Application {
    /// Build the paper venues and the engine.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let mut venues = VenueRegistry::new();
        for venue in &config.venues {
            let paper = if venue.push {
                PaperVenue::new(venue.name.as_str())
            } else {
                PaperVenue::pull_only(venue.name.as_str())
            };
            info!(venue = %venue.name, push = venue.push, "Paper venue ready");
            venues = venues.with(Arc::new(paper) as DynVenue);
        }

        let (tx, events) = mpsc::channel(config.event_buffer);
        let engine = ExecutionEngine::new(config.engine.clone(), venues, EventSink::new(tx))?;

        Ok(Self {
            config,
            engine: Arc::new(engine),
            events,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Serve stdin/stdout until EOF or Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let input = BufReader::new(tokio::io::stdin());
        let output = tokio::io::stdout();
        self.run_with(input, output).await
    }

    /// Serve one JSON trade request per input line, answering each with one
    /// JSON line on `output`.
    pub async fn run_with<R, W>(self, input: R, mut output: W) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Self {
            config,
            engine,
            events,
        } = self;
        info!(mode = ?config.engine.mode, "Starting application");

        let shutdown = CancellationToken::new();
        let event_handle = tokio::spawn(log_events(events));
        let probe_handle = tokio::spawn(ProbeService::new(engine.clone()).run(shutdown.clone()));

        // Main event loop
        let mut lines = input.lines();
        let mut handled = 0u64;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("Input closed");
                        break;
                    };
                    if let Some(reply) = handle_line(&engine, &line).await {
                        handled += 1;
                        output.write_all(reply.as_bytes()).await?;
                        output.write_all(b"\n").await?;
                        output.flush().await?;
                    }
                }

                // Handle shutdown signal
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Cleanup
        info!(handled, "Shutting down");
        shutdown.cancel();
        if let Err(e) = probe_handle.await {
            error!(error = %e, "Probe task failed");
        }
        // Dropping the last engine handle closes the event channel.
        drop(engine);
        if let Err(e) = event_handle.await {
            error!(error = %e, "Event task failed");
        }

        let metrics = Metrics::render()?;
        debug!(%metrics, "Final metrics");
        Ok(())
    }
}

/// Execute one input line. Blank lines produce no reply.
async fn handle_line(engine: &ExecutionEngine, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: TradeRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejecting malformed trade request");
            return Some(json!({ "error": e.to_string() }).to_string());
        }
    };

    let result = engine.execute(&request).await;
    match serde_json::to_string(&result) {
        Ok(reply) => Some(reply),
        Err(e) => {
            error!(error = %e, pair_id = %result.pair_id, "Failed to encode execution result");
            Some(json!({ "error": e.to_string() }).to_string())
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<ExecutionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ExecutionEvent::TradeCompleted {
                pair_id,
                outcome,
                executed_quantity,
            } => {
                debug!(%pair_id, %outcome, %executed_quantity, "Trade completed");
            }
            ExecutionEvent::ReduceOnlyDetected {
                pair_id,
                leg,
                reason,
            } => {
                warn!(%pair_id, %leg, %reason, "Pair quarantined: venue is reduce-only");
            }
            ExecutionEvent::ReduceOnlyCleared { pair_id, leg } => {
                info!(%pair_id, %leg, "Pair released from reduce-only quarantine");
            }
            ExecutionEvent::CompensationFailed {
                pair_id,
                venue,
                instrument,
                unhedged_quantity,
                reason,
            } => {
                error!(
                    alert = true,
                    %pair_id,
                    %venue,
                    %instrument,
                    %unhedged_quantity,
                    %reason,
                    "Unhedged position left after failed unwind"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbx_core::{ExecutionOutcome, ExecutionResult, FailureKind};
    use rust_decimal_macros::dec;

    fn config(mode: &str) -> AppConfig {
        AppConfig::from_toml_str(&format!(
            r#"
            [engine]
            mode = "{mode}"

            [engine.probe]
            enabled = false

            [[venues]]
            name = "alpha"

            [[venues]]
            name = "beta"
            "#
        ))
        .unwrap()
    }

    const REQUEST: &str = r#"{"symbol":"ETH","legs":[{"venue":"alpha","instrument":"ETH","side":"buy","target_price":"100"},{"venue":"beta","instrument":"ETH","side":"sell","target_price":"101"}],"quantity":"0.5","intent":"open"}"#;

    async fn serve(mode: &str, input: &str) -> Vec<String> {
        let app = Application::new(config(mode)).unwrap();
        let mut output = Vec::new();
        app.run_with(input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_executes_each_request_line() {
        let input = format!("{REQUEST}\n\n{REQUEST}\n");
        let replies = serve("trading", &input).await;
        assert_eq!(replies.len(), 2);

        for reply in replies {
            let result: ExecutionResult = serde_json::from_str(&reply).unwrap();
            assert_eq!(result.outcome, ExecutionOutcome::Success);
            assert_eq!(result.executed_quantity.inner(), dec!(0.5));
        }
    }

    #[tokio::test]
    async fn test_observation_mode_places_nothing() {
        let replies = serve("observation", REQUEST).await;
        let result: ExecutionResult = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(result.outcome, ExecutionOutcome::Observed);
        assert!(result.buy_order.is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_gets_error_reply() {
        let replies = serve("trading", "{\"symbol\":\"ETH\"}\n").await;
        assert_eq!(replies.len(), 1);
        let reply: serde_json::Value = serde_json::from_str(&replies[0]).unwrap();
        assert!(reply["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_venue_is_invalid_request() {
        let request = REQUEST.replace("\"beta\"", "\"gamma\"");
        let replies = serve("trading", &request).await;
        let result: ExecutionResult = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(result.outcome, ExecutionOutcome::Failure);
        assert_eq!(result.failure, Some(FailureKind::InvalidRequest));
    }
}
