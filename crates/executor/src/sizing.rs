use crate::error::ExecutorError;
use api_client::ExchangeGateway;
use configuration::QuantityConfig;
use rust_decimal::Decimal;

const QUOTE_ASSET: &str = "USDT";

/// Turns the configured quantity mode into a raw base-asset quantity.
///
/// The result is not yet stepped; `OrderExecutor` floors it to the lot size.
#[derive(Debug, Clone)]
pub struct QuantitySizer {
    mode: QuantityConfig,
}

impl QuantitySizer {
    pub fn new(mode: QuantityConfig) -> Self {
        Self { mode }
    }

    pub async fn entry_quantity(
        &self,
        gateway: &dyn ExchangeGateway,
        entry_price: Decimal,
    ) -> Result<Decimal, ExecutorError> {
        if entry_price <= Decimal::ZERO {
            return Err(ExecutorError::InvalidPrice(format!(
                "cannot size against price {}",
                entry_price
            )));
        }
        match &self.mode {
            QuantityConfig::Fixed { quantity } => Ok(*quantity),
            QuantityConfig::Notional { notional } => Ok(*notional / entry_price),
            QuantityConfig::Percentage { percent } => {
                let available = gateway
                    .get_account_balance()
                    .await?
                    .into_iter()
                    .find(|b| b.asset == QUOTE_ASSET)
                    .map(|b| b.available_balance)
                    .filter(|b| *b > Decimal::ZERO)
                    .ok_or_else(|| ExecutorError::InsufficientBalance(QUOTE_ASSET.to_string()))?;
                Ok(available * *percent / Decimal::ONE_HUNDRED / entry_price)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::{BalanceResponse, MockExchange};
    use core_types::SymbolFilters;
    use rust_decimal_macros::dec;

    fn mock() -> MockExchange {
        MockExchange::new(SymbolFilters {
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
            min_notional: dec!(5),
        })
    }

    #[tokio::test]
    async fn fixed_and_notional_modes() {
        let gateway = mock();
        let fixed = QuantitySizer::new(QuantityConfig::Fixed { quantity: dec!(0.5) });
        assert_eq!(fixed.entry_quantity(&gateway, dec!(100)).await.unwrap(), dec!(0.5));

        let notional = QuantitySizer::new(QuantityConfig::Notional { notional: dec!(250) });
        assert_eq!(notional.entry_quantity(&gateway, dec!(100)).await.unwrap(), dec!(2.5));
    }

    #[tokio::test]
    async fn percentage_uses_available_quote_balance() {
        let gateway = mock();
        gateway
            .set_balances(vec![
                BalanceResponse {
                    asset: "BNB".to_string(),
                    balance: dec!(3),
                    available_balance: dec!(3),
                },
                BalanceResponse {
                    asset: "USDT".to_string(),
                    balance: dec!(1200),
                    available_balance: dec!(1000),
                },
            ])
            .await;
        let sizer = QuantitySizer::new(QuantityConfig::Percentage { percent: dec!(10) });
        assert_eq!(sizer.entry_quantity(&gateway, dec!(50)).await.unwrap(), dec!(2));
    }

    #[tokio::test]
    async fn percentage_without_balance_fails() {
        let sizer = QuantitySizer::new(QuantityConfig::Percentage { percent: dec!(10) });
        let err = sizer.entry_quantity(&mock(), dec!(50)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InsufficientBalance(_)));
    }
}
