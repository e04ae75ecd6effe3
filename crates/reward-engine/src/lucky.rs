use crate::config::EngineConfig;
use crate::ledger::{LedgerManager, TxMeta};
use crate::storage::RewardStore;
use crate::types::TransactionType;
use anyhow::Result;
use chrono::NaiveDate;
use reward_types::{AccountId, ProductId, UsdAmount};
use std::sync::Arc;
use tracing::info;

/// Quoted lucky-order top-up. Pure data; nothing is mutated until the
/// caller confirms.
#[derive(Debug, Clone)]
pub struct LuckyOrderQuote {
    pub product: ProductId,
    pub deposit_amount: UsdAmount,
    pub commission: UsdAmount,
    pub commission_rate: f64,
}

/// Lucky Order Trigger: the recovery path for a settlement that failed on
/// insufficient balance.
pub struct LuckyOrderDesk {
    store: Arc<dyn RewardStore>,
    ledger: Arc<LedgerManager>,
    config: EngineConfig,
}

impl LuckyOrderDesk {
    pub fn new(
        store: Arc<dyn RewardStore>,
        ledger: Arc<LedgerManager>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    /// Pure computation: required top-up plus the micro-commission it earns.
    pub fn quote(&self, product: ProductId, shortfall: UsdAmount) -> LuckyOrderQuote {
        LuckyOrderQuote {
            product,
            deposit_amount: shortfall,
            commission: shortfall.mul_rate(self.config.commission_rate),
            commission_rate: self.config.commission_rate,
        }
    }

    /// The quote is only offered once enough tasks have been completed on
    /// the operation's day. `today` comes from the caller so the check shares
    /// the settlement's boundary.
    pub async fn eligible(&self, account: AccountId, today: NaiveDate) -> Result<bool> {
        let tasks = self.store.tasks_on_day(account, today).await?;
        Ok(tasks.len() as u32 >= self.config.lucky_order_min_tasks)
    }

    /// Confirmed top-up: credit the deposit and the commission, and bump the
    /// account's lucky counters. The caller retries the settlement afterwards.
    pub async fn apply_top_up(&self, account_id: AccountId, quote: &LuckyOrderQuote) -> Result<()> {
        self.ledger
            .credit(
                account_id,
                quote.deposit_amount,
                TxMeta::new(TransactionType::Deposit, "Lucky order top-up")
                    .with_product(quote.product),
            )
            .await?;
        self.ledger
            .credit(
                account_id,
                quote.commission,
                TxMeta::new(
                    TransactionType::LuckyOrderCommission,
                    "Lucky order commission reward",
                )
                .with_product(quote.product)
                .with_commission(quote.commission_rate, quote.commission),
            )
            .await?;

        let mut account = self.ledger.require_account(account_id).await?;
        account.lucky_order_count += 1;
        account.commission_earned = account.commission_earned.saturating_add(quote.commission);
        account.total_earnings_today =
            account.total_earnings_today.saturating_add(quote.commission);
        self.store.put_account(account).await?;

        info!(
            account = %account_id,
            deposit = quote.deposit_amount.to_usd(),
            commission = quote.commission.to_usd(),
            "🍀 Lucky order confirmed"
        );
        Ok(())
    }
}
