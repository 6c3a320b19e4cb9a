//! Chain Synchronization Module variants, one per chain family.

pub mod account;
pub mod home;
pub mod nonce_account;
pub mod token;
pub mod utxo;

pub use account::{AccountModule, ConfirmationStage};
pub use home::HomeModule;
pub use nonce_account::NonceAccountModule;
pub use token::TokenModule;
pub use utxo::UtxoModule;

use ledgerlink_core::Transaction;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SyncError;
use crate::module::{ChainSync, GetTxOptions, Lookup, ModuleCore};
use crate::ports::Session;

/// Take the session, refresh the balance, and resume polling every cached
/// record that has not settled yet.
pub(crate) async fn start_module<M>(module: &M, core: &Arc<ModuleCore>, session: &Session) -> Result<(), SyncError>
where
    M: ChainSync + Clone + 'static,
{
    if !core.begin(session)? {
        return Ok(());
    }

    if let Err(e) = core.update_balance().await {
        tracing::warn!("{} initial balance fetch failed: {}", core.chain, e);
    }
    core.schedule_balance_poll();

    let unsettled = core.unsettled();
    if !unsettled.is_empty() {
        tracing::info!("{} resuming {} unsettled transactions", core.chain, unsettled.len());
    }
    for (id, timestamp) in unsettled {
        let this = module.clone();
        core.scheduler.spawn(async move {
            let options = GetTxOptions {
                force: true,
                timestamp,
                ..Default::default()
            };
            if let Err(e) = this.get_transaction(&id, options).await {
                tracing::warn!("{} resume of {} failed: {}", this.chain(), id, e);
            }
        });
    }
    Ok(())
}

/// Re-run `get_transaction` for `id` after `delay`.
pub(crate) fn reschedule<M>(module: &M, core: &Arc<ModuleCore>, id: &str, delay: Duration, options: GetTxOptions)
where
    M: ChainSync + Clone + 'static,
{
    let this = module.clone();
    let owned = id.to_string();
    core.schedule_retry(id, delay, async move {
        if let Err(e) = this.get_transaction(&owned, options).await {
            tracing::warn!("{} poll of {} failed: {}", this.chain(), owned, e);
        }
    });
}

/// Lifecycle for families that report confirmation in the same call that
/// reports the transaction.
pub(crate) async fn one_step_get<M>(
    module: &M,
    core: &Arc<ModuleCore>,
    id: &str,
    options: GetTxOptions,
) -> Result<Option<Transaction>, SyncError>
where
    M: ChainSync + Clone + 'static,
{
    let rpc = Arc::clone(&core.rpc);
    let lookup = core
        .lookup(id, &options, |id| async move { rpc.get_transaction(&id).await })
        .await?;

    match lookup {
        Lookup::Cached(tx) => return Ok(Some(tx)),
        Lookup::Found(update) => {
            let merged = core.merge_one((core.normalize)(update));
            if let Some(tx) = merged
                && !tx.status.is_settled()
                && !options.update_only
            {
                let delay = core.registered_delay(&tx);
                let next = options.retry(options.attempt);
                reschedule(module, core, id, delay, next);
            }
        }
        Lookup::Missing => {
            if let Some(delay) = core.pending_retry(id, &options) {
                reschedule(module, core, id, delay, options.retry(options.attempt + 1));
            }
        }
        Lookup::Failed(_) => {}
    }
    Ok(core.transaction(id))
}
