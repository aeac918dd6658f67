//! USB 호스트 컨트롤러 인터페이스
//!
//! 코어 계층이 컨트롤러 하드웨어에 기대하는 최소한의 수명 주기 동작입니다.
//! 현재 구현은 BCM283x의 DWC2 OTG 코어([`DwcController`](crate::drivers::usb::dwc::DwcController)) 하나입니다.

use crate::drivers::usb::error::UsbError;

/// USB 호스트 컨트롤러 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbHostControllerType {
    /// Synopsys DesignWare USB 2.0 OTG
    Dwc2,
}

impl UsbHostControllerType {
    pub fn as_str(self) -> &'static str {
        match self {
            UsbHostControllerType::Dwc2 => "DWC2 OTG",
        }
    }
}

/// USB 호스트 컨트롤러 인터페이스
pub trait UsbHostController: Send + Sync {
    /// 코어 소프트 리셋
    fn reset(&self) -> Result<(), UsbError>;

    /// 인터럽트를 끄고 정지
    fn stop(&self);

    /// 호스트 컨트롤러 타입
    fn controller_type(&self) -> UsbHostControllerType;

    /// 컨트롤러가 동작 중인지 확인
    fn is_running(&self) -> bool;
}
