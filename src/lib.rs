//! Raspberry Pi USB 호스트 드라이버 라이브러리
//!
//! BCM283x SoC에 내장된 DesignWare OTG(DWC2) 컨트롤러를 호스트 모드로 구동합니다.
//! 펌웨어 메일박스로 전원을 켜고, 코어를 리셋/설정한 뒤, 인터럽트를 처리하며
//! 루트 허브와 그 아래 연결된 디바이스를 열거합니다.
//!
//! 커널 쪽 협력자(인터럽트 등록, 시간, DMA 주소 변환)는
//! [`drivers::platform::Platform`] 트레이트로 주입받습니다.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod drivers;
pub mod kernel;
pub mod logging;

#[cfg(test)]
pub(crate) mod testing;

pub use drivers::usb::{UsbError, UsbSubsystem};
