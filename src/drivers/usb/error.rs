//! USB 에러 타입

use core::fmt;

/// 채널 전송 실패 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// 엔드포인트가 STALL로 응답
    Stall,
    /// 디바이스가 NAK로 응답
    Nak,
    /// CRC, 비트 스터핑, 무응답 등 트랜잭션 오류
    TransactionError,
    /// 디바이스가 최대 패킷보다 많이 전송
    Babble,
    /// 데이터 토글 불일치
    DataToggle,
    /// 프레임 안에 끝나지 않음
    FrameOverrun,
    /// DMA 중 AHB 버스 오류
    AhbError,
    /// 완료 인터럽트가 오지 않음
    Timeout,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Stall => write!(f, "endpoint stalled"),
            TransferError::Nak => write!(f, "device NAK"),
            TransferError::TransactionError => write!(f, "transaction error (CRC/timeout)"),
            TransferError::Babble => write!(f, "babble"),
            TransferError::DataToggle => write!(f, "data toggle error"),
            TransferError::FrameOverrun => write!(f, "frame overrun"),
            TransferError::AhbError => write!(f, "AHB DMA error"),
            TransferError::Timeout => write!(f, "transfer timeout"),
        }
    }
}

/// USB 관련 에러
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum UsbError {
    /// 초기화되지 않음
    NotInitialized,
    /// 잘못된 파라미터
    InvalidParameter,
    /// 펌웨어가 전원 도메인을 켜지 않음
    PowerOnFailed,
    /// 메일박스 응답 없음
    MailboxTimeout,
    /// 코어 소프트 리셋이 풀리지 않음
    ResetTimeout,
    /// 커널에 인터럽트 핸들러 등록 실패
    InterruptRegistrationFailed,
    /// 빈 호스트 채널을 얻지 못함
    ChannelAllocationFailed,
    /// 전송 실패
    Transfer(TransferError),
    /// 일시적 오류가 재시도 후에도 계속됨
    RetriesExhausted(TransferError),
    /// 디스크립터 읽기 실패
    DescriptorReadFailed,
    /// 잘못된 디스크립터
    InvalidDescriptor,
    /// 요청한 길이만큼 전송되지 않음
    InvalidData,
    /// 루트 허브가 처리하지 않는 요청
    UnsupportedRequest,
    /// 디바이스를 찾을 수 없음
    DeviceNotFound,
    /// 디바이스 제한 도달
    DeviceLimitReached,
    /// 분리 중이거나 분리된 디바이스
    DeviceDetached,
    /// 다른 디바이스가 기본 주소(0)를 너무 오래 점유
    EnumerationBusy,
    /// 단일 계층을 벗어나는 토폴로지
    UnsupportedTopology,
    /// 드라이버가 맡지 않는 디바이스
    DeviceUnsupported,
}

impl UsbError {
    /// 재시도할 가치가 있는 버스 오류라면 그 원인
    pub fn transient_kind(&self) -> Option<TransferError> {
        match self {
            UsbError::Transfer(kind @ (TransferError::Nak | TransferError::TransactionError)) => {
                Some(*kind)
            }
            _ => None,
        }
    }
}

impl From<TransferError> for UsbError {
    fn from(error: TransferError) -> Self {
        UsbError::Transfer(error)
    }
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbError::NotInitialized => write!(f, "USB subsystem not initialized"),
            UsbError::InvalidParameter => write!(f, "Invalid USB parameter"),
            UsbError::PowerOnFailed => write!(f, "USB power-on failed"),
            UsbError::MailboxTimeout => write!(f, "Firmware mailbox timeout"),
            UsbError::ResetTimeout => write!(f, "USB core soft reset timeout"),
            UsbError::InterruptRegistrationFailed => write!(f, "USB interrupt registration failed"),
            UsbError::ChannelAllocationFailed => write!(f, "No free USB host channel"),
            UsbError::Transfer(kind) => write!(f, "USB transfer failed: {}", kind),
            UsbError::RetriesExhausted(kind) => write!(f, "USB transfer retries exhausted: {}", kind),
            UsbError::DescriptorReadFailed => write!(f, "USB descriptor read failed"),
            UsbError::InvalidDescriptor => write!(f, "Invalid USB descriptor"),
            UsbError::InvalidData => write!(f, "Short USB transfer"),
            UsbError::UnsupportedRequest => write!(f, "Unsupported USB request"),
            UsbError::DeviceNotFound => write!(f, "USB device not found"),
            UsbError::DeviceLimitReached => write!(f, "USB device limit reached"),
            UsbError::DeviceDetached => write!(f, "USB device detached"),
            UsbError::EnumerationBusy => write!(f, "Default address busy"),
            UsbError::UnsupportedTopology => write!(f, "Nested USB hubs are not supported"),
            UsbError::DeviceUnsupported => write!(f, "USB device not supported by driver"),
        }
    }
}
