use crate::error::EngineError;
use crate::pipeline::CandlePipeline;
use api_client::ExchangeGateway;
use core_types::{HaCandle, Interval, Kline, TrendSignal};
use tracing::info;

/// One replayed candle, as shown by the `history` command.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub kline: Kline,
    pub candle: HaCandle,
    pub signal: TrendSignal,
}

/// The newest `count` closed klines, oldest first.
///
/// One extra kline is requested because the exchange includes the candle that
/// is still running.
pub async fn fetch_closed_klines(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    interval: Interval,
    count: u16,
) -> Result<Vec<Kline>, EngineError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let klines = gateway
        .fetch_klines(symbol, &interval.to_string(), count.saturating_add(1))
        .await?;
    let closed: Vec<Kline> = klines.into_iter().filter(|k| k.closed).collect();
    let skip = closed.len().saturating_sub(usize::from(count));
    Ok(closed.into_iter().skip(skip).collect())
}

/// Runs klines through the pipeline, keeping the ones it accepts.
pub fn replay(pipeline: &mut CandlePipeline, klines: Vec<Kline>) -> Vec<HistoryRow> {
    klines
        .into_iter()
        .filter_map(|kline| {
            let (candle, signal) = pipeline.process(kline.clone())?;
            Some(HistoryRow {
                kline,
                candle,
                signal,
            })
        })
        .collect()
}

/// Fetches and replays history on a fresh pipeline.
pub async fn load_history(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    interval: Interval,
    count: u16,
) -> Result<Vec<HistoryRow>, EngineError> {
    let klines = fetch_closed_klines(gateway, symbol, interval, count).await?;
    let mut pipeline = CandlePipeline::new(interval);
    let rows = replay(&mut pipeline, klines);
    info!(symbol, %interval, candles = rows.len(), "History loaded");
    Ok(rows)
}
