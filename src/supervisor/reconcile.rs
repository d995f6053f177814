//! Startup reconciliation: adopt balances already held on the exchange.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::InstrumentConfig;
use crate::domain::Position;
use crate::error::Result;
use crate::persistence::PositionSnapshot;
use crate::strategy::Executor;

pub const ADOPTED_TAG: &str = "adopted";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub adopted: Vec<String>,
    /// Snapshot entries with no matching exchange balance
    pub dropped: Vec<String>,
    /// Balances below the exchange minimum notional
    pub dust: Vec<String>,
}

/// Adopt every configured instrument whose free base balance is worth at
/// least `minNotional`. Snapshot fields win when present; quantity is never
/// more than the exchange balance.
pub async fn reconcile(
    executor: &Arc<Executor>,
    snapshot: Option<PositionSnapshot>,
    instruments: &[InstrumentConfig],
) -> Result<ReconcileReport> {
    let gateway = executor.gateway();
    let account = gateway.account().await?;
    let mut saved: HashMap<String, Position> = snapshot
        .map(|s| s.positions)
        .unwrap_or_default()
        .into_iter()
        .map(|p| (p.instrument.clone(), p))
        .collect();
    let exit = executor.policy().config();
    let mut report = ReconcileReport::default();

    for inst in instruments {
        let symbol = inst.symbol.as_str();
        let previous = saved.remove(symbol);
        if executor.positions().contains(symbol) {
            continue;
        }

        let filters = match gateway.symbol_precision(symbol).await {
            Ok(f) => f,
            Err(e) => {
                warn!(instrument = symbol, error = %e, "reconcile skipped, no symbol info");
                continue;
            }
        };
        let held = filters.floor_qty(account.free(&filters.base_asset));
        if held <= Decimal::ZERO {
            if previous.is_some() {
                warn!(instrument = symbol, "snapshot position has no exchange balance, dropped");
                report.dropped.push(symbol.to_string());
            }
            continue;
        }

        let price = match gateway.ticker(symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(instrument = symbol, error = %e, "reconcile skipped, no price");
                continue;
            }
        };
        if held * price < filters.min_notional {
            info!(instrument = symbol, qty = %held, price = %price, "balance below min notional, not adopted");
            if previous.is_some() {
                report.dropped.push(symbol.to_string());
            }
            report.dust.push(symbol.to_string());
            continue;
        }

        let position = match previous {
            Some(mut p) => {
                if p.quantity > held {
                    warn!(
                        instrument = symbol,
                        saved = %p.quantity,
                        held = %held,
                        "snapshot quantity trimmed to exchange balance"
                    );
                    p.quantity = held;
                }
                p
            }
            None => Position::new(
                symbol,
                filters.base_asset.clone(),
                inst.category,
                held,
                price,
                price,
                price * (Decimal::ONE - exit.hard_stop_pct),
                price * (Decimal::ONE + exit.fallback_take_profit_pct),
                ADOPTED_TAG,
                Utc::now(),
            ),
        };

        match executor.adopt(position) {
            Ok(()) => report.adopted.push(symbol.to_string()),
            Err(e) => warn!(instrument = symbol, error = %e, "adoption refused"),
        }
    }

    for (symbol, _) in saved {
        warn!(instrument = %symbol, "snapshot position for unconfigured instrument, dropped");
        report.dropped.push(symbol);
    }

    info!(
        adopted = report.adopted.len(),
        dropped = report.dropped.len(),
        dust = report.dust.len(),
        "startup reconciliation finished"
    );
    Ok(report)
}
