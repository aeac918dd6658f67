//! 드라이버 설정
//!
//! FIFO 크기, 채널 수, 각종 대기 시간과 재시도 횟수를 한 곳에 모읍니다.
//! 기본값은 보드 프로필([`board`])과 USB 2.0 규격의 타이밍을 따릅니다.

pub mod board;

use crate::kernel::error_recovery::RetryConfig;
use crate::kernel::wait::WaitPolicy;

pub use board::{current_board, Board};

/// USB 호스트 드라이버 설정
#[derive(Debug, Clone, Copy)]
pub struct UsbHostConfig {
    /// 수신 FIFO 크기 (워드)
    pub rx_fifo_words: u32,
    /// 비주기 송신 FIFO 크기 (워드)
    pub nonperiodic_tx_fifo_words: u32,
    /// 주기 송신 FIFO 크기 (워드)
    pub periodic_tx_fifo_words: u32,
    /// 사용할 호스트 채널 수 (최대 8)
    pub channel_count: usize,
    /// 등록할 IRQ 라인
    pub irq_lines: &'static [u32],
    /// 메일박스 응답 대기
    pub mailbox_wait: WaitPolicy,
    /// 코어 소프트 리셋 대기
    pub reset_wait: WaitPolicy,
    /// 빈 채널 대기
    pub channel_wait: WaitPolicy,
    /// 전송 완료 대기
    pub transfer_wait: WaitPolicy,
    /// 시간 초과 후 채널 정지(CHHLTD) 대기
    pub halt_wait: WaitPolicy,
    /// 주소 0 점유 대기
    pub default_address_wait: WaitPolicy,
    /// NAK/CRC 재시도 정책
    pub transfer_retry: RetryConfig,
    /// 포트 리셋 신호 유지 시간 (ms)
    pub port_reset_ms: u32,
    /// 포트 리셋 후 안정화 시간 (ms)
    pub reset_recovery_ms: u32,
    /// SET_ADDRESS 후 안정화 시간 (ms)
    pub set_address_recovery_ms: u32,
}

impl UsbHostConfig {
    /// 보드 프로필 기본값
    pub const fn for_board(board: Board) -> Self {
        Self {
            rx_fifo_words: 1024,
            nonperiodic_tx_fifo_words: 1024,
            periodic_tx_fifo_words: 1024,
            channel_count: 8,
            irq_lines: board.usb_irq_lines(),
            mailbox_wait: WaitPolicy::new(100_000, 0x10_0000),
            reset_wait: WaitPolicy::new(100_000, 0x10_0000),
            channel_wait: WaitPolicy::new(1_000_000, u32::MAX),
            transfer_wait: WaitPolicy::new(1_000_000, u32::MAX),
            halt_wait: WaitPolicy::new(10_000, u32::MAX),
            default_address_wait: WaitPolicy::new(2_000_000, u32::MAX),
            transfer_retry: RetryConfig {
                max_retries: 3,
                retry_delay_us: 1_000,
                exponential_backoff: false,
            },
            port_reset_ms: 50,
            reset_recovery_ms: 10,
            set_address_recovery_ms: 2,
        }
    }
}

impl Default for UsbHostConfig {
    fn default() -> Self {
        Self::for_board(current_board())
    }
}
