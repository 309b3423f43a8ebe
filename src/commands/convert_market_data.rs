use crate::commands::market_data_snapshot::load_market_data;
use anyhow::Result;
use log::info;
use std::path::Path;

/// Re-encode a snapshot; the output extension picks the format.
pub fn run(input: &Path, forecast: Option<&Path>, output: &Path) -> Result<()> {
    info!(
        "Converting market data snapshot {} to {}",
        input.display(),
        output.display()
    );

    let market_data = load_market_data(input, forecast)?;
    market_data.save_to_file(output)?;
    info!(
        "Market data snapshot with {} bars successfully written to {}",
        market_data.candles().len(),
        output.display()
    );

    Ok(())
}
