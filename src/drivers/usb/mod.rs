//! USB (Universal Serial Bus) 호스트 드라이버 모듈
//!
//! BCM283x(Raspberry Pi)의 Synopsys DWC2 OTG 코어를 호스트 모드로 구동합니다.
//!
//! # 구성
//! - [`dwc`]: 전원 인가부터 인터럽트 허용까지의 컨트롤러 초기화
//! - [`interrupt`]: 인터럽트 컨텍스트의 원인 확인 및 완료 통지
//! - [`channel`], [`transfer`]: 호스트 채널 풀과 제어 전송
//! - [`roothub`]: 소프트웨어 루트 허브
//! - [`enumeration`], [`tree`]: 디바이스 열거와 단일 계층 디바이스 트리
//! - [`driver`]: 클래스/벤더 드라이버 등록과 디바이스 연결
//! - [`core`], [`worker`]: 서브시스템 컨텍스트와 포트 변경 작업자
//!
//! 루트 포트 아래 허브 연결(다단 토폴로지)과 벌크/인터럽트/등시 전송 스케줄링은 지원하지 않습니다.

pub mod channel;
pub mod core;
pub mod descriptor;
pub mod device;
pub mod dwc;
pub mod driver;
pub mod dwc_regs;
pub mod enumeration;
pub mod error;
pub mod host_controller;
pub mod interrupt;
pub mod request;
pub mod roothub;
pub mod transfer;
pub mod tree;
pub mod worker;

pub use self::core::UsbSubsystem;
pub use device::{DeviceId, UsbDevice, UsbDeviceState, UsbSpeed};
pub use driver::UsbDeviceDriver;
pub use error::{TransferError, UsbError};
pub use host_controller::{UsbHostController, UsbHostControllerType};
pub use transfer::{TransferRequest, TransferStatus};
pub use worker::UsbWorker;

/// USB 클래스 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbClassCode {
    /// Human Interface Device (키보드, 마우스 등)
    Hid = 0x03,
    /// Mass Storage (USB 저장장치)
    MassStorage = 0x08,
    /// Hub (USB 허브)
    Hub = 0x09,
    /// Video (웹캠 등)
    Video = 0x0E,
    /// Audio (오디오 장치)
    Audio = 0x01,
    /// Vendor specific
    VendorSpecific = 0xFF,
    /// Unknown/Other
    Unknown = 0x00,
}

impl From<u8> for UsbClassCode {
    fn from(code: u8) -> Self {
        match code {
            0x03 => UsbClassCode::Hid,
            0x08 => UsbClassCode::MassStorage,
            0x09 => UsbClassCode::Hub,
            0x0E => UsbClassCode::Video,
            0x01 => UsbClassCode::Audio,
            0xFF => UsbClassCode::VendorSpecific,
            _ => UsbClassCode::Unknown,
        }
    }
}
