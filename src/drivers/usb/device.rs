//! USB 디바이스 관리
//!
//! 이 모듈은 USB 디바이스 레코드의 상태 및 정보를 관리합니다.
//! 레코드는 [`DeviceTree`](crate::drivers::usb::tree::DeviceTree) 아레나 안에 살며,
//! 부모는 소유 관계가 아닌 인덱스([`DeviceId`])로만 가리킵니다.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::drivers::usb::descriptor::{ConfigurationInfo, DeviceDescriptor};
use crate::drivers::usb::driver::UsbDeviceDriver;
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::UsbClassCode;

/// 디바이스 트리 아레나 슬롯과 세대
///
/// 슬롯은 분리 후 재사용되지만 세대는 할당마다 바뀌므로, 분리된 디바이스의
/// ID로는 같은 슬롯의 새 디바이스에 닿을 수 없습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    slot: usize,
    generation: u32,
}

impl DeviceId {
    pub(crate) const fn new(slot: usize, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// 아레나 슬롯 번호
    pub fn index(self) -> usize {
        self.slot
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.slot)
    }
}

/// 버스 속도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbSpeed {
    High,
    Full,
    Low,
}

impl UsbSpeed {
    pub fn as_str(self) -> &'static str {
        match self {
            UsbSpeed::High => "high",
            UsbSpeed::Full => "full",
            UsbSpeed::Low => "low",
        }
    }
}

/// 열거 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbDeviceState {
    /// 연결 안 됨 (또는 열거 실패 후)
    Disconnected,
    /// 포트 연결 감지, 기본 주소(0) 대기
    Connected,
    /// 8바이트 디스크립터로 기본 파이프 최대 패킷 크기 확인
    ProbingDefaultDescriptor,
    /// 18바이트 디바이스 디스크립터 확보
    DescriptorKnown,
    /// 고유 주소 할당됨
    Addressed,
    /// 구성 설정됨
    Configured,
}

impl UsbDeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            UsbDeviceState::Disconnected => "disconnected",
            UsbDeviceState::Connected => "connected",
            UsbDeviceState::ProbingDefaultDescriptor => "probing",
            UsbDeviceState::DescriptorKnown => "descriptor",
            UsbDeviceState::Addressed => "addressed",
            UsbDeviceState::Configured => "configured",
        }
    }
}

/// 기본 파이프의 초기 최대 패킷 크기
pub const DEFAULT_MAX_PACKET_SIZE: u16 = 8;

/// USB 디바이스
pub struct UsbDevice {
    id: DeviceId,
    /// 디바이스 주소 (0 = 미할당)
    address: u8,
    /// 부모 (루트 허브는 None)
    parent: Option<DeviceId>,
    /// 부모 허브의 포트 번호
    port: u8,
    speed: UsbSpeed,
    state: UsbDeviceState,
    device_descriptor: DeviceDescriptor,
    configuration: Option<ConfigurationInfo>,
    manufacturer: Option<String>,
    product: Option<String>,
    /// 이 디바이스를 맡은 드라이버
    driver: Option<Arc<dyn UsbDeviceDriver>>,
    /// 기본 파이프 최대 패킷 크기
    max_packet_size: u16,
    class_code: UsbClassCode,
    /// 분리 진행 중 (새 전송 거부)
    detaching: bool,
    error_count: u32,
    last_error: Option<UsbError>,
}

impl UsbDevice {
    /// 새 USB 디바이스 생성
    pub fn new(id: DeviceId, parent: Option<DeviceId>, port: u8, speed: UsbSpeed) -> Self {
        Self {
            id,
            address: 0,
            parent,
            port,
            speed,
            state: UsbDeviceState::Disconnected,
            device_descriptor: DeviceDescriptor::default(),
            configuration: None,
            manufacturer: None,
            product: None,
            driver: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            class_code: UsbClassCode::Unknown,
            detaching: false,
            error_count: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// 디바이스 주소 가져오기
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn parent(&self) -> Option<DeviceId> {
        self.parent
    }

    pub fn is_root_hub(&self) -> bool {
        self.parent.is_none()
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    /// 디바이스 상태 가져오기
    pub fn state(&self) -> UsbDeviceState {
        self.state
    }

    /// 디바이스 상태 설정
    pub fn set_state(&mut self, state: UsbDeviceState) {
        crate::log_trace!("{}: {} -> {}", self.id, self.state.as_str(), state.as_str());
        self.state = state;
    }

    /// 디바이스 클래스 가져오기
    pub fn class_code(&self) -> UsbClassCode {
        self.class_code
    }

    /// 디바이스 디스크립터 설정
    pub fn set_device_descriptor(&mut self, descriptor: DeviceDescriptor) {
        self.device_descriptor = descriptor;
        self.max_packet_size = u16::from(descriptor.max_packet_size);

        if descriptor.device_class != 0 {
            self.class_code = UsbClassCode::from(descriptor.device_class);
        }
    }

    /// 디바이스 디스크립터 가져오기
    pub fn device_descriptor(&self) -> &DeviceDescriptor {
        &self.device_descriptor
    }

    pub fn set_configuration(&mut self, configuration: ConfigurationInfo) {
        // 디바이스 클래스가 인터페이스에 위임된 경우 첫 인터페이스로 표시
        if self.device_descriptor.device_class == 0 {
            if let Some(first) = configuration.interfaces.first() {
                self.class_code = UsbClassCode::from(first.descriptor.interface_class);
            }
        }
        self.configuration = Some(configuration);
    }

    pub fn configuration(&self) -> Option<&ConfigurationInfo> {
        self.configuration.as_ref()
    }

    /// 최대 패킷 크기 가져오기
    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn set_max_packet_size(&mut self, size: u16) {
        self.max_packet_size = size;
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn set_strings(&mut self, manufacturer: Option<String>, product: Option<String>) {
        self.manufacturer = manufacturer;
        self.product = product;
    }

    pub fn driver(&self) -> Option<&Arc<dyn UsbDeviceDriver>> {
        self.driver.as_ref()
    }

    pub fn set_driver(&mut self, driver: Arc<dyn UsbDeviceDriver>) {
        self.driver = Some(driver);
    }

    pub fn take_driver(&mut self) -> Option<Arc<dyn UsbDeviceDriver>> {
        self.driver.take()
    }

    pub fn is_detaching(&self) -> bool {
        self.detaching
    }

    pub fn mark_detaching(&mut self) {
        self.detaching = true;
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<UsbError> {
        self.last_error
    }

    pub fn record_error(&mut self, error: UsbError) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(error);
    }

    /// 열거 실패 또는 분리 후 자원 반납
    ///
    /// 누적 오류 기록은 남겨둡니다.
    pub fn reset_to_disconnected(&mut self) {
        self.address = 0;
        self.configuration = None;
        self.manufacturer = None;
        self.product = None;
        self.max_packet_size = DEFAULT_MAX_PACKET_SIZE;
        self.set_state(UsbDeviceState::Disconnected);
    }
}

impl fmt::Debug for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbDevice")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("parent", &self.parent)
            .field("state", &self.state)
            .field("vendor_id", &self.device_descriptor.vendor_id)
            .field("product_id", &self.device_descriptor.product_id)
            .field("driver", &self.driver.as_ref().map(|d| d.name()))
            .finish()
    }
}
