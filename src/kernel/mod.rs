//! 커널 보조 기능
//!
//! 드라이버가 의존하는 대기/깨우기 원시 연산과 오류 복구 정책입니다.

pub mod error_recovery;
pub mod event;
pub mod wait;
