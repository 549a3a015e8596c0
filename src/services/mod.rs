//! Services Module
//!
//! 체인과 통신하는 서비스 레이어
//!
//! # Services
//! - `ContractReader`: 시점 고정 컨트랙트 조회 (MToken, Comptroller)
//! - `LogFeed`: 로그 폴링 → 블록 순서의 피드 배치
//! - `bindings`: abigen 생성 바인딩

pub mod bindings;
mod contract_reader;
mod event_feed;

pub use contract_reader::{ContractReader, EthContractReader, FlagQuery, ReadRequest, UintQuery};
pub use event_feed::{
    assemble_batch, decode_log, event_signatures, tick_blocks, DecodedLog, FeedConfig, LogFeed,
};

#[cfg(test)]
pub use contract_reader::mock;
