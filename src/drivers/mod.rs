//! 하드웨어 드라이버 모듈
//!
//! 메모리 맵 레지스터 접근, 펌웨어 메일박스, USB 호스트 드라이버를 포함합니다.

pub mod mailbox;
pub mod mmio;
pub mod platform;
pub mod usb;
