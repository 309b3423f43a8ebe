pub mod backtest;
pub mod convert_market_data;
pub mod market_data_snapshot;
pub mod optimize;
pub mod strategy_args;
