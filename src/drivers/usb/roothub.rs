//! 루트 허브 에뮬레이션
//!
//! DWC2에는 실제 허브가 없고 포트 하나(HPRT)만 있습니다. 위쪽 계층이 허브 클래스
//! 드라이버와 같은 방식으로 포트를 다룰 수 있도록, 루트 허브로 가는 제어 요청은
//! 하드웨어 채널을 쓰지 않고 여기서 소프트웨어로 응답합니다.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use bitflags::bitflags;

use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::Platform;
use crate::drivers::usb::descriptor::{
    ConfigurationDescriptor, DescriptorType, DeviceDescriptor, EndpointDescriptor, HubDescriptor,
    InterfaceDescriptor,
};
use crate::drivers::usb::device::UsbSpeed;
use crate::drivers::usb::dwc_regs::{HostPort, HPRT};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::interrupt::PortEvents;
use crate::drivers::usb::request::{
    PortFeature, UsbControlRequest, UsbRequestRecipient, UsbRequestType, UsbStandardRequest,
};
use crate::drivers::usb::UsbClassCode;

/// 루트 허브의 유일한 다운스트림 포트
pub const ROOT_PORT: u8 = 1;

bitflags! {
    /// wPortStatus (USB 2.0 표 11-21)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortStatus: u16 {
        const CONNECTION = 1 << 0;
        const ENABLE = 1 << 1;
        const SUSPEND = 1 << 2;
        const OVER_CURRENT = 1 << 3;
        const RESET = 1 << 4;
        const POWER = 1 << 8;
        const LOW_SPEED = 1 << 9;
        const HIGH_SPEED = 1 << 10;
    }
}

bitflags! {
    /// wPortChange (USB 2.0 표 11-22)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortChange: u16 {
        const CONNECTION = 1 << 0;
        const ENABLE = 1 << 1;
        const SUSPEND = 1 << 2;
        const OVER_CURRENT = 1 << 3;
        const RESET = 1 << 4;
    }
}

impl PortStatus {
    pub fn speed(self) -> UsbSpeed {
        if self.contains(PortStatus::LOW_SPEED) {
            UsbSpeed::Low
        } else if self.contains(PortStatus::HIGH_SPEED) {
            UsbSpeed::High
        } else {
            UsbSpeed::Full
        }
    }
}

/// GET_PORT_STATUS 응답 해석
pub fn parse_port_status(bytes: &[u8]) -> Result<(PortStatus, PortChange), UsbError> {
    if bytes.len() < 4 {
        return Err(UsbError::InvalidData);
    }
    Ok((
        PortStatus::from_bits_retain(u16::from_le_bytes([bytes[0], bytes[1]])),
        PortChange::from_bits_retain(u16::from_le_bytes([bytes[2], bytes[3]])),
    ))
}

const ROOT_HUB_DEVICE: DeviceDescriptor = DeviceDescriptor {
    length: DeviceDescriptor::LENGTH as u8,
    descriptor_type: DescriptorType::Device as u8,
    usb_version: 0x0200,
    device_class: UsbClassCode::Hub as u8,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size: 64,
    vendor_id: 0,
    product_id: 0,
    device_version: 0x0100,
    manufacturer_string: 0,
    product_string: if cfg!(feature = "roothub_strings") { 1 } else { 0 },
    serial_string: 0,
    num_configurations: 1,
};

const ROOT_HUB_CONFIGURATION_VALUE: u8 = 1;
const ROOT_HUB_CONFIGURATION_LENGTH: usize =
    ConfigurationDescriptor::LENGTH + InterfaceDescriptor::LENGTH + EndpointDescriptor::LENGTH;

const ROOT_HUB_HUB: HubDescriptor = HubDescriptor {
    num_ports: 1,
    // 전원 스위칭 없음, 과전류 보호 공통
    characteristics: 0x0000,
    power_on_to_power_good: 0,
    control_current: 0,
    device_removable: 0,
};

#[cfg(feature = "roothub_strings")]
const ROOT_HUB_PRODUCT: &str = "DWC2 Root Hub";

fn root_hub_configuration() -> [u8; ROOT_HUB_CONFIGURATION_LENGTH] {
    let configuration = ConfigurationDescriptor {
        length: ConfigurationDescriptor::LENGTH as u8,
        descriptor_type: DescriptorType::Configuration as u8,
        total_length: ROOT_HUB_CONFIGURATION_LENGTH as u16,
        num_interfaces: 1,
        configuration_value: ROOT_HUB_CONFIGURATION_VALUE,
        configuration_string: 0,
        // 자체 전원
        attributes: 0xC0,
        max_power: 0,
    };
    let interface = InterfaceDescriptor {
        length: InterfaceDescriptor::LENGTH as u8,
        descriptor_type: DescriptorType::Interface as u8,
        interface_number: 0,
        alternate_setting: 0,
        num_endpoints: 1,
        interface_class: UsbClassCode::Hub as u8,
        interface_subclass: 0,
        interface_protocol: 0,
        interface_string: 0,
    };
    // 상태 변경 인터럽트 엔드포인트
    let endpoint = EndpointDescriptor {
        length: EndpointDescriptor::LENGTH as u8,
        descriptor_type: DescriptorType::Endpoint as u8,
        endpoint_address: 0x81,
        attributes: 0x03,
        max_packet_size: 64,
        interval: 0xFF,
    };

    let mut out = [0u8; ROOT_HUB_CONFIGURATION_LENGTH];
    let (head, rest) = out.split_at_mut(ConfigurationDescriptor::LENGTH);
    head.copy_from_slice(&configuration.to_bytes());
    let (middle, tail) = rest.split_at_mut(InterfaceDescriptor::LENGTH);
    middle.copy_from_slice(&interface.to_bytes());
    tail.copy_from_slice(&endpoint.to_bytes());
    out
}

/// 응답을 요청 길이와 버퍼 길이에 맞춰 복사
fn reply(data: &mut [u8], bytes: &[u8], setup: &UsbControlRequest) -> usize {
    let n = bytes.len().min(data.len()).min(setup.length as usize);
    data[..n].copy_from_slice(&bytes[..n]);
    n
}

/// 소프트웨어 루트 허브
pub struct RootHub<R> {
    regs: Arc<R>,
    events: Arc<PortEvents>,
    configuration: AtomicU8,
    reset_changed: AtomicBool,
    port_reset_ms: u32,
    reset_recovery_ms: u32,
}

impl<R: RegisterBlock> RootHub<R> {
    pub fn new(regs: Arc<R>, events: Arc<PortEvents>, port_reset_ms: u32, reset_recovery_ms: u32) -> Self {
        Self {
            regs,
            events,
            configuration: AtomicU8::new(0),
            reset_changed: AtomicBool::new(false),
            port_reset_ms,
            reset_recovery_ms,
        }
    }

    /// 루트 허브로 가는 제어 요청 처리
    ///
    /// 데이터 단계가 있는 요청은 `data`에 응답을 채우고 그 길이를 반환합니다.
    pub fn handle<P: Platform + ?Sized>(
        &self,
        platform: &P,
        setup: &UsbControlRequest,
        data: &mut [u8],
    ) -> Result<usize, UsbError> {
        crate::log_trace!(
            "Root hub request {:#04x}/{:#04x} value={:#06x} index={}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index
        );
        match setup.request_kind() {
            UsbRequestType::Standard => self.standard_request(setup, data),
            UsbRequestType::Class => self.hub_request(platform, setup, data),
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn standard_request(&self, setup: &UsbControlRequest, data: &mut [u8]) -> Result<usize, UsbError> {
        let request = UsbStandardRequest::from_u8(setup.request).ok_or(UsbError::UnsupportedRequest)?;
        match request {
            UsbStandardRequest::GetDescriptor => {
                let kind = DescriptorType::from_u8((setup.value >> 8) as u8);
                let index = (setup.value & 0xFF) as u8;
                match kind {
                    Some(DescriptorType::Device) => Ok(reply(data, &ROOT_HUB_DEVICE.to_bytes(), setup)),
                    Some(DescriptorType::Configuration) => {
                        Ok(reply(data, &root_hub_configuration(), setup))
                    }
                    Some(DescriptorType::String) => self.string_descriptor(index, setup, data),
                    _ => Err(UsbError::UnsupportedRequest),
                }
            }
            UsbStandardRequest::GetStatus => {
                // 자체 전원
                Ok(reply(data, &[0x01, 0x00], setup))
            }
            UsbStandardRequest::GetConfiguration => {
                let value = self.configuration.load(Ordering::Relaxed);
                Ok(reply(data, &[value], setup))
            }
            UsbStandardRequest::SetConfiguration => {
                let value = setup.value as u8;
                if value > ROOT_HUB_CONFIGURATION_VALUE {
                    return Err(UsbError::InvalidParameter);
                }
                self.configuration.store(value, Ordering::Relaxed);
                Ok(0)
            }
            UsbStandardRequest::SetAddress
            | UsbStandardRequest::SetFeature
            | UsbStandardRequest::ClearFeature => Ok(0),
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    #[cfg(feature = "roothub_strings")]
    fn string_descriptor(&self, index: u8, setup: &UsbControlRequest, data: &mut [u8]) -> Result<usize, UsbError> {
        match index {
            // 언어 ID 목록: 영어(미국)
            0 => Ok(reply(data, &[4, DescriptorType::String as u8, 0x09, 0x04], setup)),
            1 => {
                let mut buf = [0u8; 64];
                let len = crate::drivers::usb::descriptor::write_string_descriptor(ROOT_HUB_PRODUCT, &mut buf);
                Ok(reply(data, &buf[..len], setup))
            }
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    #[cfg(not(feature = "roothub_strings"))]
    fn string_descriptor(&self, _index: u8, _setup: &UsbControlRequest, _data: &mut [u8]) -> Result<usize, UsbError> {
        Err(UsbError::UnsupportedRequest)
    }

    fn hub_request<P: Platform + ?Sized>(
        &self,
        platform: &P,
        setup: &UsbControlRequest,
        data: &mut [u8],
    ) -> Result<usize, UsbError> {
        let request = UsbStandardRequest::from_u8(setup.request).ok_or(UsbError::UnsupportedRequest)?;
        match (request, setup.recipient()) {
            (UsbStandardRequest::GetDescriptor, UsbRequestRecipient::Device) => {
                if (setup.value >> 8) as u8 != DescriptorType::Hub as u8 {
                    return Err(UsbError::UnsupportedRequest);
                }
                Ok(reply(data, &ROOT_HUB_HUB.to_bytes(), setup))
            }
            (UsbStandardRequest::GetStatus, UsbRequestRecipient::Device) => {
                // 허브 자체: 전원 정상, 과전류 없음
                Ok(reply(data, &[0, 0, 0, 0], setup))
            }
            (UsbStandardRequest::SetFeature | UsbStandardRequest::ClearFeature, UsbRequestRecipient::Device) => {
                Ok(0)
            }
            (UsbStandardRequest::GetStatus, UsbRequestRecipient::Other) => {
                self.check_port(setup.index)?;
                let (status, change) = self.port_status();
                let mut bytes = [0u8; 4];
                bytes[..2].copy_from_slice(&status.bits().to_le_bytes());
                bytes[2..].copy_from_slice(&change.bits().to_le_bytes());
                Ok(reply(data, &bytes, setup))
            }
            (UsbStandardRequest::SetFeature, UsbRequestRecipient::Other) => {
                self.check_port(setup.index)?;
                let feature = PortFeature::from_u16(setup.value).ok_or(UsbError::UnsupportedRequest)?;
                self.set_port_feature(platform, feature)?;
                Ok(0)
            }
            (UsbStandardRequest::ClearFeature, UsbRequestRecipient::Other) => {
                self.check_port(setup.index)?;
                let feature = PortFeature::from_u16(setup.value).ok_or(UsbError::UnsupportedRequest)?;
                self.clear_port_feature(feature)?;
                Ok(0)
            }
            _ => Err(UsbError::UnsupportedRequest),
        }
    }

    fn check_port(&self, index: u16) -> Result<(), UsbError> {
        if index == u16::from(ROOT_PORT) {
            Ok(())
        } else {
            Err(UsbError::InvalidParameter)
        }
    }

    /// HPRT를 허브 포트 상태 형식으로 변환
    pub fn port_status(&self) -> (PortStatus, PortChange) {
        let port = HostPort::from_bits_retain(self.regs.read(HPRT));

        let mut status = PortStatus::empty();
        status.set(PortStatus::CONNECTION, port.contains(HostPort::CONNECTED));
        status.set(PortStatus::ENABLE, port.contains(HostPort::ENABLED));
        status.set(PortStatus::SUSPEND, port.contains(HostPort::SUSPEND));
        status.set(PortStatus::OVER_CURRENT, port.contains(HostPort::OVERCURRENT_ACTIVE));
        status.set(PortStatus::RESET, port.contains(HostPort::RESET));
        status.set(PortStatus::POWER, port.contains(HostPort::POWER));
        if port.contains(HostPort::CONNECTED) {
            match port.speed() {
                UsbSpeed::Low => status.insert(PortStatus::LOW_SPEED),
                UsbSpeed::High => status.insert(PortStatus::HIGH_SPEED),
                UsbSpeed::Full => {}
            }
        }

        // 하드웨어 변경 비트는 인터럽트에서 이미 지워졌으므로 기록된 값을 사용
        let latched = self.events.latched() | (port & HostPort::CHANGES);
        let mut change = PortChange::empty();
        change.set(PortChange::CONNECTION, latched.contains(HostPort::CONNECT_DETECTED));
        change.set(PortChange::ENABLE, latched.contains(HostPort::ENABLE_CHANGED));
        change.set(PortChange::OVER_CURRENT, latched.contains(HostPort::OVERCURRENT_CHANGED));
        change.set(PortChange::RESET, self.reset_changed.load(Ordering::Acquire));

        (status, change)
    }

    /// 값 비트만 바꾸는 HPRT 쓰기 (변경 비트와 ENABLED는 건드리지 않음)
    fn write_port(&self, set: HostPort, clear: HostPort) {
        let raw = self.regs.read(HPRT);
        let value = (HostPort::write_value(raw, HostPort::empty()) | set.bits()) & !clear.bits();
        self.regs.write(HPRT, value);
    }

    fn set_port_feature<P: Platform + ?Sized>(&self, platform: &P, feature: PortFeature) -> Result<(), UsbError> {
        match feature {
            PortFeature::Power => {
                crate::log_debug!("Root port power on");
                self.write_port(HostPort::POWER, HostPort::empty());
            }
            PortFeature::Reset => self.reset_port(platform),
            PortFeature::Suspend => self.write_port(HostPort::SUSPEND, HostPort::empty()),
            _ => return Err(UsbError::UnsupportedRequest),
        }
        Ok(())
    }

    /// 포트 리셋 신호 유지 후 해제
    fn reset_port<P: Platform + ?Sized>(&self, platform: &P) {
        crate::log_debug!("Resetting root port for {}ms", self.port_reset_ms);
        self.write_port(HostPort::RESET, HostPort::empty());
        platform.delay_ms(self.port_reset_ms);
        self.write_port(HostPort::empty(), HostPort::RESET);
        platform.delay_ms(self.reset_recovery_ms);
        self.reset_changed.store(true, Ordering::Release);
    }

    fn clear_port_feature(&self, feature: PortFeature) -> Result<(), UsbError> {
        match feature {
            // ENABLED에 1을 쓰면 포트가 꺼짐
            PortFeature::Enable => self.write_port(HostPort::ENABLED, HostPort::empty()),
            PortFeature::Power => self.write_port(HostPort::empty(), HostPort::POWER),
            PortFeature::Suspend => self.write_port(HostPort::RESUME, HostPort::SUSPEND),
            PortFeature::ConnectionChange => self.events.clear_latched(HostPort::CONNECT_DETECTED),
            PortFeature::EnableChange => self.events.clear_latched(HostPort::ENABLE_CHANGED),
            PortFeature::OverCurrentChange => self.events.clear_latched(HostPort::OVERCURRENT_CHANGED),
            PortFeature::ResetChange => self.reset_changed.store(false, Ordering::Release),
            PortFeature::SuspendChange => {}
            _ => return Err(UsbError::UnsupportedRequest),
        }
        Ok(())
    }
}
