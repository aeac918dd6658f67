//! USB 작업자 태스크
//!
//! 인터럽트 디스패처는 포트 변경을 기록하고 재스케줄만 요청합니다. 연결 처리와
//! 열거는 이 태스크가 인터럽트 밖에서 수행합니다. 할 일이 없으면 포트 이벤트에서
//! 잠들고, 디스패처가 포트 변경을 기록하면 깨어납니다.

use alloc::sync::Arc;

use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::Platform;
use crate::drivers::usb::core::UsbSubsystem;

pub struct UsbWorker<R: RegisterBlock + 'static, P: Platform + 'static> {
    subsystem: Arc<UsbSubsystem<R, P>>,
}

impl<R: RegisterBlock + 'static, P: Platform + 'static> UsbWorker<R, P> {
    pub fn new(subsystem: Arc<UsbSubsystem<R, P>>) -> Self {
        Self { subsystem }
    }

    /// 대기 중인 신호 하나 처리. 한 일이 있으면 `true`
    pub fn run_once(&self) -> bool {
        match self.subsystem.process_port_events() {
            Ok(handled) => handled,
            Err(e) => {
                crate::log_warn!("USB port event handling failed: {}", e);
                true
            }
        }
    }

    /// 작업자 태스크 본문
    pub fn run(&self) -> ! {
        let event = self.subsystem.port_events().event();
        loop {
            let seen = event.generation();
            if !self.run_once() {
                self.subsystem.platform().wait_event(event, seen, u64::MAX);
            }
        }
    }
}
