pub mod batch;
pub mod bundle;
pub mod bundler;
pub mod chunk;
pub mod config;
pub mod curve;
pub mod error;
pub mod events;
pub mod funds;
pub mod ledger;
pub mod lookup_table;
pub mod metrics;
pub mod observability;
pub mod program;
pub mod relay;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchBuilder, BatchPlan, TradeOrder, UnsignedTx};
pub use bundle::{BundleAssembler, BundleOutcome};
pub use bundler::{BatchOutcome, Bundler, TokenMetadata};
pub use config::{BundlerConfig, PriorityFee};
pub use curve::{ReserveState, RunningTotals};
pub use error::{BundlerError, Result};
pub use ledger::{Ledger, RpcLedger, SweepReport};
pub use lookup_table::LookupTableManager;
pub use metrics::BundlerMetrics;
pub use relay::{BundleRelay, JitoRelay};
