//! 에러 복구 메커니즘
//!
//! 버스에서 생기는 일시적 오류(NAK, CRC)는 정해진 횟수만큼 재시도합니다.
//! 재시도를 모두 소진한 경우는 [`UsbError::RetriesExhausted`]로 보고되어
//! 프로토콜 수준의 STALL과 구분됩니다.

use spin::Mutex;

use crate::drivers::platform::Platform;
use crate::drivers::usb::error::UsbError;

/// 드라이버 재시도 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 간격 (마이크로초)
    pub retry_delay_us: u64,
    /// 지수 백오프 사용 여부
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_us: 1_000,
            exponential_backoff: true,
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> u64 {
        if self.exponential_backoff {
            self.retry_delay_us.saturating_mul(1u64 << attempt.min(16))
        } else {
            self.retry_delay_us
        }
    }
}

/// 드라이버 레벨 재시도
///
/// `operation`은 시도 번호(0부터)를 받습니다. 일시적이지 않은 오류는 즉시 반환됩니다.
pub fn driver_retry<P, F, T>(platform: &P, config: RetryConfig, mut operation: F) -> Result<T, UsbError>
where
    P: Platform + ?Sized,
    F: FnMut(u32) -> Result<T, UsbError>,
{
    let mut attempt = 0;
    loop {
        let error = match operation(attempt) {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let Some(kind) = error.transient_kind() else {
            return Err(error);
        };

        if attempt >= config.max_retries {
            record_recovery_event(RecoveryEvent::RetriesExhausted);
            crate::log_warn!("Transient {} persisted after {} retries", kind, config.max_retries);
            return Err(UsbError::RetriesExhausted(kind));
        }

        let delay = config.delay_for(attempt);
        record_recovery_event(RecoveryEvent::DriverRetry);
        crate::log_debug!(
            "{}, retrying in {}us (attempt {}/{})",
            kind,
            delay,
            attempt + 1,
            config.max_retries
        );
        platform.delay_us(delay);
        attempt += 1;
    }
}

/// 복구 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    DriverRetry,
    RetriesExhausted,
    DeviceDisconnected,
}

/// 에러 복구 통계
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    pub driver_retries: u64,
    pub retries_exhausted: u64,
    pub devices_disconnected: u64,
}

static RECOVERY_STATS: Mutex<RecoveryStats> = Mutex::new(RecoveryStats {
    driver_retries: 0,
    retries_exhausted: 0,
    devices_disconnected: 0,
});

/// 복구 통계 업데이트
pub fn record_recovery_event(event: RecoveryEvent) {
    let mut stats = RECOVERY_STATS.lock();
    match event {
        RecoveryEvent::DriverRetry => stats.driver_retries += 1,
        RecoveryEvent::RetriesExhausted => stats.retries_exhausted += 1,
        RecoveryEvent::DeviceDisconnected => stats.devices_disconnected += 1,
    }
}

/// 복구 통계 가져오기
pub fn recovery_stats() -> RecoveryStats {
    *RECOVERY_STATS.lock()
}
