//! # KQuant Data
//!
//! 신호 파이프라인이 소비하는 데이터 평면:
//! - `PortfolioStore`: 포지션/현금/리스크 지표의 영속 저장소 (직렬화 가능
//!   트랜잭션, 주문 ID 기준 멱등 체결 반영)
//! - `ScoreReader`: 최신 종합 점수/지표의 읽기 전용 뷰 (시장 시간 기준
//!   staleness 판정, 데이터 품질 점수)
//! - `PriceSource`: 현재가/거래량/변동성 조회
//! - `PriceCache`: Redis 가격 캐시 및 이벤트 발행 (시스템 오브 레코드 아님)

pub mod error;
pub mod price;
pub mod reader;
pub mod reader_pg;
pub mod redis_cache;
pub mod store;

pub use error::{DataError, Result};
pub use price::{CachedPriceSource, MemoryPriceSource, PriceSource};
pub use reader::{
    MarketDataReader, MemoryMarketDataReader, MemoryStockDirectory, ScoreReader, ScoreReading,
    StockDirectory,
};
pub use reader_pg::{PgMarketDataReader, PgStockDirectory};
pub use redis_cache::{PriceCache, PriceEvent};
pub use store::{MemoryPortfolioStore, PgPortfolioStore, PortfolioSnapshot, PortfolioStore};
