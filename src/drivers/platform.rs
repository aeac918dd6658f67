//! 호스트 커널 협력자 계약
//!
//! 드라이버는 커널의 인터럽트 등록, 시간, DMA 주소 변환을 직접 구현하지 않고
//! 이 트레이트를 통해 사용합니다. 실제 커널과 테스트용 가짜 플랫폼이
//! 같은 계약을 구현합니다.

use alloc::sync::Arc;

use crate::drivers::usb::error::UsbError;
use crate::kernel::event::Event;

/// 인터럽트 핸들러 반환값
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// 이 컨트롤러의 인터럽트가 아님
    NotHandled,
    /// 처리 완료, 스케줄링 불필요
    Handled,
    /// 처리 완료, 대기 중인 태스크를 깨우기 위해 재스케줄 요청
    Reschedule,
}

/// 인터럽트 컨텍스트에서 호출되는 핸들러
pub trait InterruptHandler: Send + Sync {
    fn handle_irq(&self, irq: u32) -> IrqReturn;
}

/// 플랫폼 서비스
pub trait Platform: Send + Sync {
    /// 단조 증가 시각 (마이크로초)
    fn now_us(&self) -> u64;

    /// 바쁜 대기 지연
    fn delay_us(&self, us: u64);

    /// 밀리초 지연
    fn delay_ms(&self, ms: u32) {
        self.delay_us(u64::from(ms) * 1_000);
    }

    /// 대기 루프의 한 번의 양보 지점
    ///
    /// 커널은 여기서 다른 태스크로 전환하거나 `wfe`로 이벤트를 기다릴 수 있습니다.
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// `event`의 세대가 `seen`에서 바뀔 때까지 현재 태스크를 재움
    ///
    /// `deadline_us`(단조 시각)가 지나면 돌아와야 합니다. 일찍 돌아오는 것은 허용되며
    /// 호출자가 조건을 다시 확인합니다. 세대 비교와 잠들기 사이에 도착한
    /// [`wake_event`](Platform::wake_event)를 놓치면 안 됩니다. 기본 구현은 한 번 양보합니다.
    fn wait_event(&self, event: &Event, seen: u32, deadline_us: u64) {
        let _ = (event, seen, deadline_us);
        self.relax();
    }

    /// `event`에서 잠든 태스크를 깨움 (인터럽트 컨텍스트에서도 호출됨)
    fn wake_event(&self, event: &Event) {
        let _ = event;
    }

    /// `register_interrupt_handler(irq, callback)`
    fn register_interrupt_handler(
        &self,
        irq: u32,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<(), UsbError>;

    /// `unmask_interrupt(irq)`
    fn unmask_interrupt(&self, irq: u32);

    /// `mask_interrupt(irq)`
    fn mask_interrupt(&self, irq: u32);

    /// CPU 주소를 컨트롤러가 보는 버스 주소로 변환
    ///
    /// BCM283x에서는 보통 물리 주소에 `0xC000_0000`(캐시 우회 별칭)을 더합니다.
    fn dma_address(&self, ptr: *const u8) -> u32;
}
