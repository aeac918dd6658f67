//! 디바이스 열거 상태 기계
//!
//! `Disconnected → Connected → ProbingDefaultDescriptor → DescriptorKnown → Addressed → Configured`
//!
//! [`UsbSubsystem::enumerate_step`]은 한 번에 한 전이만 수행합니다. 어느 단계에서든
//! 전송이 실패하면 그 디바이스만 `Disconnected`로 돌아가고 자원을 반납하며,
//! 다른 디바이스의 열거에는 영향을 주지 않습니다.
//!
//! 아직 주소가 없는 디바이스는 모두 주소 0을 공유하므로, `Connected`에서
//! `Addressed`까지는 기본 주소 점유권을 가진 디바이스 하나만 진행할 수 있습니다.
//! 기다리는 디바이스는 점유권이 풀릴 때 올라가는 이벤트에서 잠듭니다.
//!
//! 구성이 끝나면 등록된 드라이버에 디바이스를 맡깁니다. 맡는 드라이버가 없어도
//! 열거는 성공입니다.

use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::Platform;
use crate::drivers::usb::core::UsbSubsystem;
use crate::drivers::usb::descriptor::{
    parse_configuration, ConfigurationDescriptor, DescriptorType, DeviceDescriptor,
};
use crate::drivers::usb::device::{DeviceId, UsbDeviceState, DEFAULT_MAX_PACKET_SIZE};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::request::UsbControlRequest;
use crate::drivers::usb::tree::DeviceTree;
use crate::kernel::error_recovery::{record_recovery_event, RecoveryEvent};
use crate::kernel::wait::wait_on;

/// 구성 디스크립터 블록 최대 길이
const MAX_CONFIGURATION_LENGTH: usize = 1024;

impl<R: RegisterBlock + 'static, P: Platform + 'static> UsbSubsystem<R, P> {
    /// `Configured`에 이를 때까지 열거
    pub fn enumerate(&self, id: DeviceId) -> Result<(), UsbError> {
        loop {
            if self.enumerate_step(id)? == UsbDeviceState::Configured {
                return Ok(());
            }
        }
    }

    /// 열거 한 단계 진행 후 새 상태 반환
    pub fn enumerate_step(&self, id: DeviceId) -> Result<UsbDeviceState, UsbError> {
        let state = self.device_state(id).ok_or(UsbError::DeviceNotFound)?;
        let result = match state {
            UsbDeviceState::Disconnected => return Err(UsbError::DeviceDetached),
            UsbDeviceState::Configured => return Ok(UsbDeviceState::Configured),
            UsbDeviceState::Connected => self.probe_default_descriptor(id),
            UsbDeviceState::ProbingDefaultDescriptor => self.read_device_descriptor(id),
            UsbDeviceState::DescriptorKnown => self.assign_address(id),
            UsbDeviceState::Addressed => self.configure(id),
        };

        result.map_err(|cause| {
            let error = match (state, cause) {
                (
                    UsbDeviceState::Connected | UsbDeviceState::ProbingDefaultDescriptor,
                    UsbError::Transfer(_)
                    | UsbError::RetriesExhausted(_)
                    | UsbError::ChannelAllocationFailed
                    | UsbError::InvalidData,
                ) => UsbError::DescriptorReadFailed,
                _ => cause,
            };
            self.fail_enumeration(id, state, cause);
            error
        })
    }

    /// 기본 주소 점유 후 8바이트 디스크립터로 최대 패킷 크기 확인
    fn probe_default_descriptor(&self, id: DeviceId) -> Result<UsbDeviceState, UsbError> {
        self.claim_default_address(id)?;
        self.update(id, |d| {
            d.set_max_packet_size(DEFAULT_MAX_PACKET_SIZE);
            d.set_state(UsbDeviceState::ProbingDefaultDescriptor);
        })?;

        let probe = self.read_descriptor_block(id, DescriptorType::Device, DeviceDescriptor::PROBE_LENGTH)?;
        let max_packet_size = DeviceDescriptor::probe_max_packet_size(&probe)?;
        self.update(id, |d| d.set_max_packet_size(u16::from(max_packet_size)))?;
        crate::log_debug!("{}: default pipe max packet size {}", id, max_packet_size);
        Ok(UsbDeviceState::ProbingDefaultDescriptor)
    }

    /// 확인한 패킷 크기로 18바이트 디바이스 디스크립터 읽기
    fn read_device_descriptor(&self, id: DeviceId) -> Result<UsbDeviceState, UsbError> {
        let bytes = self.read_descriptor_block(id, DescriptorType::Device, DeviceDescriptor::LENGTH)?;
        let descriptor = DeviceDescriptor::parse(&bytes)?;
        self.update(id, |d| {
            d.set_device_descriptor(descriptor);
            d.set_state(UsbDeviceState::DescriptorKnown);
        })?;
        crate::log_info!(
            "{}: USB {:x}.{:02x} device {:04x}:{:04x} class {:#04x}",
            id,
            descriptor.usb_version >> 8,
            descriptor.usb_version & 0xFF,
            descriptor.vendor_id,
            descriptor.product_id,
            descriptor.device_class
        );
        Ok(UsbDeviceState::DescriptorKnown)
    }

    /// SET_ADDRESS 후 기본 주소 반납
    fn assign_address(&self, id: DeviceId) -> Result<UsbDeviceState, UsbError> {
        let address = DeviceTree::address_for(id);
        self.control_msg(id, UsbControlRequest::new_set_address(address), &mut [])?;
        self.platform.delay_ms(self.config.set_address_recovery_ms);

        self.update(id, |d| {
            d.set_address(address);
            d.set_state(UsbDeviceState::Addressed);
        })?;
        self.release_default_address(id);
        crate::log_debug!("{}: address {}", id, address);
        Ok(UsbDeviceState::Addressed)
    }

    /// 문자열을 읽고, 구성 디스크립터 블록을 읽어 첫 구성 선택 후 드라이버 연결
    fn configure(&self, id: DeviceId) -> Result<UsbDeviceState, UsbError> {
        self.read_device_strings(id);

        let mut header = [0u8; ConfigurationDescriptor::LENGTH];
        self.get_descriptor(id, DescriptorType::Configuration, 0, &mut header)?;
        let total = ConfigurationDescriptor::parse(&header)?.total_length as usize;
        if total < ConfigurationDescriptor::LENGTH || total > MAX_CONFIGURATION_LENGTH {
            return Err(UsbError::InvalidDescriptor);
        }

        let block = self.read_descriptor_block(id, DescriptorType::Configuration, total)?;
        let configuration = parse_configuration(&block)?;
        let value = configuration.descriptor.configuration_value;
        self.set_configuration(id, value)?;

        let interfaces = configuration.interfaces.len();
        self.update(id, |d| {
            d.set_configuration(configuration);
            d.set_state(UsbDeviceState::Configured);
        })?;
        crate::log_info!("{}: configuration {} set ({} interfaces)", id, value, interfaces);

        match self.try_to_bind_device_driver(id) {
            Ok(()) | Err(UsbError::DeviceUnsupported) => Ok(UsbDeviceState::Configured),
            Err(e) => Err(e),
        }
    }

    /// 기본 주소 점유. 다른 디바이스가 쥐고 있으면 마감까지 대기
    pub(crate) fn claim_default_address(&self, id: DeviceId) -> Result<(), UsbError> {
        let try_claim = || {
            let mut owner = self.default_address.lock();
            match *owner {
                None => {
                    *owner = Some(id);
                    true
                }
                Some(current) => current == id,
            }
        };
        if try_claim() {
            return Ok(());
        }

        crate::log_debug!("{}: waiting for address 0", id);
        wait_on(&*self.platform, &self.address_event, self.config.default_address_wait, try_claim).map_err(|_| {
            crate::log_warn!("{}: address 0 stayed busy", id);
            UsbError::EnumerationBusy
        })
    }

    pub(crate) fn release_default_address(&self, id: DeviceId) {
        let mut owner = self.default_address.lock();
        if *owner == Some(id) {
            *owner = None;
            drop(owner);
            self.address_event.signal(&*self.platform);
        }
    }

    pub fn default_address_owner(&self) -> Option<DeviceId> {
        *self.default_address.lock()
    }

    /// 실패한 디바이스만 초기 상태로
    fn fail_enumeration(&self, id: DeviceId, state: UsbDeviceState, cause: UsbError) {
        self.release_default_address(id);
        let mut devices = self.devices.lock();
        if let Some(device) = devices.get_mut(id) {
            device.record_error(cause);
            device.reset_to_disconnected();
            record_recovery_event(RecoveryEvent::DeviceDisconnected);
        }
        drop(devices);
        crate::log_warn!("{}: enumeration failed in {} state: {}", id, state.as_str(), cause);
    }
}
