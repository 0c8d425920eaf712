use prometheus::{Encoder, Histogram, IntCounter, Registry, TextEncoder};

use crate::error::Result;

#[derive(Clone)]
pub struct BundlerMetrics {
    pub bundles_submitted: IntCounter,
    pub bundles_confirmed: IntCounter,
    pub bundles_failed: IntCounter,
    pub lut_pages_written: IntCounter,
    pub sweep_groups_submitted: IntCounter,
    pub sweep_groups_skipped: IntCounter,
    pub tip_hist: Histogram,
}

impl BundlerMetrics {
    pub fn new(reg: &Registry) -> Result<Self> {
        let bundles_submitted = IntCounter::new("bundles_submitted_total", "Bundles sent to the relay")?;
        let bundles_confirmed = IntCounter::new("bundles_confirmed_total", "Bundles confirmed by the relay")?;
        let bundles_failed = IntCounter::new("bundles_failed_total", "Bundles rejected or unconfirmed")?;
        let lut_pages_written = IntCounter::new("lut_pages_written_total", "Lookup table pages written")?;
        let sweep_groups_submitted =
            IntCounter::new("sweep_groups_submitted_total", "Cleanup sweep groups submitted")?;
        let sweep_groups_skipped =
            IntCounter::new("sweep_groups_skipped_total", "Cleanup sweep groups skipped on simulation failure")?;
        let tip_hist = Histogram::with_opts(
            prometheus::histogram_opts!(
                "bundle_tip_lamports",
                "Tip paid per bundle",
                prometheus::exponential_buckets(10_000.0, 4.0, 8)?
            ),
        )?;

        reg.register(Box::new(bundles_submitted.clone()))?;
        reg.register(Box::new(bundles_confirmed.clone()))?;
        reg.register(Box::new(bundles_failed.clone()))?;
        reg.register(Box::new(lut_pages_written.clone()))?;
        reg.register(Box::new(sweep_groups_submitted.clone()))?;
        reg.register(Box::new(sweep_groups_skipped.clone()))?;
        reg.register(Box::new(tip_hist.clone()))?;

        Ok(Self {
            bundles_submitted,
            bundles_confirmed,
            bundles_failed,
            lut_pages_written,
            sweep_groups_submitted,
            sweep_groups_skipped,
            tip_hist,
        })
    }

    pub fn scrape(reg: &Registry) -> String {
        let mut buf = vec![];
        TextEncoder::new().encode(&reg.gather(), &mut buf).ok();
        String::from_utf8(buf).unwrap_or_default()
    }
}
