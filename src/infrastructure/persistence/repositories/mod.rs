mod backtest_repository;
mod candle_repository;
mod decision_repository;
mod integrity_repository;
mod market_repository;
mod order_repository;
mod risk_event_repository;
mod snapshot_repository;

pub use backtest_repository::SqliteBacktestRepository;
pub use candle_repository::SqliteCandleRepository;
pub use decision_repository::SqliteDecisionRepository;
pub use integrity_repository::SqliteIntegrityRepository;
pub use market_repository::SqliteMarketRepository;
pub use order_repository::SqliteOrderRepository;
pub use risk_event_repository::SqliteRiskEventRepository;
pub use snapshot_repository::SqliteSnapshotRepository;
