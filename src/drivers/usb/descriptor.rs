//! USB 디스크립터 구조
//!
//! USB 디바이스는 다양한 디스크립터를 통해 자신의 정보를 제공합니다.
//! 이 모듈은 디스크립터 바이트열을 파싱하고, 루트 허브가 응답할
//! 디스크립터를 직렬화합니다. 모든 다중 바이트 필드는 리틀 엔디언입니다.

use alloc::string::String;
use alloc::vec::Vec;

use crate::drivers::usb::error::UsbError;

/// USB 디스크립터 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 0x01,
    Configuration = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    OtherSpeedConfiguration = 0x07,
    InterfacePower = 0x08,
    Hub = 0x29,
}

impl DescriptorType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(DescriptorType::Device),
            0x02 => Some(DescriptorType::Configuration),
            0x03 => Some(DescriptorType::String),
            0x04 => Some(DescriptorType::Interface),
            0x05 => Some(DescriptorType::Endpoint),
            0x06 => Some(DescriptorType::DeviceQualifier),
            0x07 => Some(DescriptorType::OtherSpeedConfiguration),
            0x08 => Some(DescriptorType::InterfacePower),
            0x29 => Some(DescriptorType::Hub),
            _ => None,
        }
    }
}

fn le16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// 모든 디스크립터 공통 헤더 검사
fn check_header(bytes: &[u8], expected: DescriptorType, min_len: usize) -> Result<(), UsbError> {
    if bytes.len() < min_len || (bytes[0] as usize) < 2 || (bytes[0] as usize) < min_len {
        return Err(UsbError::InvalidDescriptor);
    }
    if bytes[1] != expected as u8 {
        return Err(UsbError::InvalidDescriptor);
    }
    Ok(())
}

/// USB 디바이스 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    /// 디스크립터 길이 (18바이트)
    pub length: u8,
    /// 디스크립터 타입 (Device = 0x01)
    pub descriptor_type: u8,
    /// USB 버전 (BCD 형식, 예: 0x0200 = USB 2.0)
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// 최대 패킷 크기 (Endpoint 0)
    pub max_packet_size: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// 디바이스 버전 (BCD)
    pub device_version: u16,
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_string: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LENGTH: usize = 18;
    /// 기본 파이프 최대 패킷 크기를 알아내기 위한 첫 읽기 길이
    pub const PROBE_LENGTH: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, DescriptorType::Device, Self::LENGTH)?;
        let descriptor = Self {
            length: bytes[0],
            descriptor_type: bytes[1],
            usb_version: le16(bytes, 2),
            device_class: bytes[4],
            device_subclass: bytes[5],
            device_protocol: bytes[6],
            max_packet_size: bytes[7],
            vendor_id: le16(bytes, 8),
            product_id: le16(bytes, 10),
            device_version: le16(bytes, 12),
            manufacturer_string: bytes[14],
            product_string: bytes[15],
            serial_string: bytes[16],
            num_configurations: bytes[17],
        };
        validate_max_packet_size(descriptor.max_packet_size)?;
        Ok(descriptor)
    }

    /// 8바이트 앞부분에서 bMaxPacketSize0 추출
    pub fn probe_max_packet_size(bytes: &[u8]) -> Result<u8, UsbError> {
        check_header(bytes, DescriptorType::Device, Self::PROBE_LENGTH)?;
        validate_max_packet_size(bytes[7])?;
        Ok(bytes[7])
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let usb = self.usb_version.to_le_bytes();
        let vid = self.vendor_id.to_le_bytes();
        let pid = self.product_id.to_le_bytes();
        let ver = self.device_version.to_le_bytes();
        [
            self.length,
            self.descriptor_type,
            usb[0],
            usb[1],
            self.device_class,
            self.device_subclass,
            self.device_protocol,
            self.max_packet_size,
            vid[0],
            vid[1],
            pid[0],
            pid[1],
            ver[0],
            ver[1],
            self.manufacturer_string,
            self.product_string,
            self.serial_string,
            self.num_configurations,
        ]
    }
}

fn validate_max_packet_size(size: u8) -> Result<(), UsbError> {
    match size {
        8 | 16 | 32 | 64 => Ok(()),
        _ => Err(UsbError::InvalidDescriptor),
    }
}

/// USB 구성 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// 인터페이스/엔드포인트 디스크립터를 포함한 전체 길이
    pub total_length: u16,
    pub num_interfaces: u8,
    /// SET_CONFIGURATION에 쓰는 값
    pub configuration_value: u8,
    pub configuration_string: u8,
    /// 속성 (Self-powered, Remote wakeup 등)
    pub attributes: u8,
    /// 최대 전력 (2mA 단위)
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub const LENGTH: usize = 9;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, DescriptorType::Configuration, Self::LENGTH)?;
        let descriptor = Self {
            length: bytes[0],
            descriptor_type: bytes[1],
            total_length: le16(bytes, 2),
            num_interfaces: bytes[4],
            configuration_value: bytes[5],
            configuration_string: bytes[6],
            attributes: bytes[7],
            max_power: bytes[8],
        };
        if (descriptor.total_length as usize) < Self::LENGTH {
            return Err(UsbError::InvalidDescriptor);
        }
        Ok(descriptor)
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let total = self.total_length.to_le_bytes();
        [
            self.length,
            self.descriptor_type,
            total[0],
            total[1],
            self.num_interfaces,
            self.configuration_value,
            self.configuration_string,
            self.attributes,
            self.max_power,
        ]
    }
}

/// USB 인터페이스 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_string: u8,
}

impl InterfaceDescriptor {
    pub const LENGTH: usize = 9;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, DescriptorType::Interface, Self::LENGTH)?;
        Ok(Self {
            length: bytes[0],
            descriptor_type: bytes[1],
            interface_number: bytes[2],
            alternate_setting: bytes[3],
            num_endpoints: bytes[4],
            interface_class: bytes[5],
            interface_subclass: bytes[6],
            interface_protocol: bytes[7],
            interface_string: bytes[8],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        [
            self.length,
            self.descriptor_type,
            self.interface_number,
            self.alternate_setting,
            self.num_endpoints,
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
            self.interface_string,
        ]
    }
}

/// USB 엔드포인트 디스크립터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// 엔드포인트 주소 (비트 7: 방향, 비트 3-0: 엔드포인트 번호)
    pub endpoint_address: u8,
    /// 속성 (비트 1-0: 전송 타입)
    pub attributes: u8,
    pub max_packet_size: u16,
    /// 폴링 간격
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const LENGTH: usize = 7;

    pub fn parse(bytes: &[u8]) -> Result<Self, UsbError> {
        check_header(bytes, DescriptorType::Endpoint, Self::LENGTH)?;
        Ok(Self {
            length: bytes[0],
            descriptor_type: bytes[1],
            endpoint_address: bytes[2],
            attributes: bytes[3],
            max_packet_size: le16(bytes, 4),
            interval: bytes[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mps = self.max_packet_size.to_le_bytes();
        [
            self.length,
            self.descriptor_type,
            self.endpoint_address,
            self.attributes,
            mps[0],
            mps[1],
            self.interval,
        ]
    }

    /// 엔드포인트 번호 추출
    pub fn endpoint_number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    /// 엔드포인트 방향 (true = IN, false = OUT)
    pub fn is_in(&self) -> bool {
        (self.endpoint_address & 0x80) != 0
    }

    /// 전송 타입 추출
    pub fn transfer_type(&self) -> EndpointTransferType {
        EndpointTransferType::from_bits(self.attributes)
    }
}

/// 엔드포인트 전송 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl EndpointTransferType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => EndpointTransferType::Control,
            1 => EndpointTransferType::Isochronous,
            2 => EndpointTransferType::Bulk,
            _ => EndpointTransferType::Interrupt,
        }
    }
}

/// 허브 디스크립터 (USB 2.0 11.23.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubDescriptor {
    pub num_ports: u8,
    pub characteristics: u16,
    /// 포트 전원 인가 후 안정까지 (2ms 단위)
    pub power_on_to_power_good: u8,
    pub control_current: u8,
    pub device_removable: u8,
}

impl HubDescriptor {
    pub const LENGTH: usize = 9;

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let chars = self.characteristics.to_le_bytes();
        [
            Self::LENGTH as u8,
            DescriptorType::Hub as u8,
            self.num_ports,
            chars[0],
            chars[1],
            self.power_on_to_power_good,
            self.control_current,
            self.device_removable,
            0xFF,
        ]
    }
}

/// 인터페이스 하나의 파싱 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// 구성 디스크립터 블록 전체의 파싱 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationInfo {
    pub descriptor: ConfigurationDescriptor,
    pub interfaces: Vec<InterfaceInfo>,
}

pub const MAX_INTERFACES: usize = 8;
pub const MAX_ENDPOINTS_PER_INTERFACE: usize = 16;

/// 구성 디스크립터 블록 파싱
///
/// 대체 설정(alternate setting)은 건너뛰고, 클래스 전용 디스크립터는 무시합니다.
/// 찾은 인터페이스 수가 bNumInterfaces와 다르면 잘못된 디스크립터입니다.
pub fn parse_configuration(bytes: &[u8]) -> Result<ConfigurationInfo, UsbError> {
    let descriptor = ConfigurationDescriptor::parse(bytes)?;
    let total = (descriptor.total_length as usize).min(bytes.len());
    let mut interfaces: Vec<InterfaceInfo> = Vec::new();
    let mut in_alternate = false;
    let mut offset = descriptor.length as usize;

    while offset + 2 <= total {
        let len = bytes[offset] as usize;
        if len < 2 || offset + len > total {
            return Err(UsbError::InvalidDescriptor);
        }
        let chunk = &bytes[offset..offset + len];

        match DescriptorType::from_u8(chunk[1]) {
            Some(DescriptorType::Interface) => {
                let interface = InterfaceDescriptor::parse(chunk)?;
                in_alternate = interface.alternate_setting != 0;
                if !in_alternate {
                    if interfaces.len() >= MAX_INTERFACES {
                        crate::log_warn!("Too many interfaces; ignoring the rest");
                        break;
                    }
                    interfaces.push(InterfaceInfo {
                        descriptor: interface,
                        endpoints: Vec::new(),
                    });
                }
            }
            Some(DescriptorType::Endpoint) if !in_alternate => {
                let endpoint = EndpointDescriptor::parse(chunk)?;
                let current = interfaces.last_mut().ok_or(UsbError::InvalidDescriptor)?;
                if current.endpoints.len() >= MAX_ENDPOINTS_PER_INTERFACE {
                    return Err(UsbError::InvalidDescriptor);
                }
                current.endpoints.push(endpoint);
            }
            _ => {}
        }
        offset += len;
    }

    if interfaces.len() != descriptor.num_interfaces as usize {
        crate::log_warn!(
            "Configuration declares {} interfaces but {} were found",
            descriptor.num_interfaces,
            interfaces.len()
        );
        return Err(UsbError::InvalidDescriptor);
    }

    Ok(ConfigurationInfo {
        descriptor,
        interfaces,
    })
}

/// 문자열 디스크립터 직렬화 (UTF-16LE). 쓴 바이트 수를 반환합니다.
pub fn write_string_descriptor(text: &str, out: &mut [u8]) -> usize {
    let mut buf = [0u8; 64];
    let mut len = 2;
    for unit in text.encode_utf16() {
        if len + 2 > buf.len() {
            break;
        }
        buf[len..len + 2].copy_from_slice(&unit.to_le_bytes());
        len += 2;
    }
    buf[0] = len as u8;
    buf[1] = DescriptorType::String as u8;

    let n = len.min(out.len());
    out[..n].copy_from_slice(&buf[..n]);
    n
}

/// 문자열 디스크립터에서 읽을 최대 문자 수
pub const MAX_STRING_CHARS: usize = 64;

/// 문자열 디스크립터(UTF-16LE)를 ASCII로 변환
///
/// 출력할 수 없는 문자는 `?`로 바꾸고 [`MAX_STRING_CHARS`]자에서 자릅니다.
pub fn parse_string_descriptor(bytes: &[u8]) -> Result<String, UsbError> {
    if bytes.len() < 2 || bytes[1] != DescriptorType::String as u8 {
        return Err(UsbError::InvalidDescriptor);
    }
    let len = (bytes[0] as usize).clamp(2, bytes.len());
    Ok(bytes[2..len]
        .chunks_exact(2)
        .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
        .take(MAX_STRING_CHARS)
        .map(|unit| match u8::try_from(unit) {
            Ok(byte) if (0x20..0x7F).contains(&byte) => char::from(byte),
            _ => '?',
        })
        .collect())
}
