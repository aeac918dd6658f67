//! USB 제어 요청
//!
//! 이 모듈은 USB 표준 요청과 허브 클래스 요청의 SETUP 패킷을 다룹니다.

use crate::drivers::usb::descriptor::DescriptorType;

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 호스트 → 디바이스
    Out,
    /// 디바이스 → 호스트
    In,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
        }
    }
}

/// USB 요청 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbRequestType {
    Standard = 0x00,
    Class = 0x20,
    Vendor = 0x40,
    Reserved = 0x60,
}

/// USB 요청 수신자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbRequestRecipient {
    Device = 0x00,
    Interface = 0x01,
    Endpoint = 0x02,
    Other = 0x03,
}

/// USB 표준 요청 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbStandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

impl UsbStandardRequest {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(UsbStandardRequest::GetStatus),
            0x01 => Some(UsbStandardRequest::ClearFeature),
            0x03 => Some(UsbStandardRequest::SetFeature),
            0x05 => Some(UsbStandardRequest::SetAddress),
            0x06 => Some(UsbStandardRequest::GetDescriptor),
            0x07 => Some(UsbStandardRequest::SetDescriptor),
            0x08 => Some(UsbStandardRequest::GetConfiguration),
            0x09 => Some(UsbStandardRequest::SetConfiguration),
            0x0A => Some(UsbStandardRequest::GetInterface),
            0x0B => Some(UsbStandardRequest::SetInterface),
            0x0C => Some(UsbStandardRequest::SynchFrame),
            _ => None,
        }
    }
}

/// 허브 포트 기능 선택자 (USB 2.0 표 11-17)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortFeature {
    Connection = 0,
    Enable = 1,
    Suspend = 2,
    OverCurrent = 3,
    Reset = 4,
    Power = 8,
    LowSpeed = 9,
    ConnectionChange = 16,
    EnableChange = 17,
    SuspendChange = 18,
    OverCurrentChange = 19,
    ResetChange = 20,
}

impl PortFeature {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(PortFeature::Connection),
            1 => Some(PortFeature::Enable),
            2 => Some(PortFeature::Suspend),
            3 => Some(PortFeature::OverCurrent),
            4 => Some(PortFeature::Reset),
            8 => Some(PortFeature::Power),
            9 => Some(PortFeature::LowSpeed),
            16 => Some(PortFeature::ConnectionChange),
            17 => Some(PortFeature::EnableChange),
            18 => Some(PortFeature::SuspendChange),
            19 => Some(PortFeature::OverCurrentChange),
            20 => Some(PortFeature::ResetChange),
            _ => None,
        }
    }
}

const DIRECTION_IN: u8 = 0x80;

/// USB 제어 요청 구조 (SETUP 패킷, 8바이트)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbControlRequest {
    /// 요청 타입 (bmRequestType)
    pub request_type: u8,
    /// 요청 코드 (bRequest)
    pub request: u8,
    /// 값 (wValue)
    pub value: u16,
    /// 인덱스 (wIndex)
    pub index: u16,
    /// 길이 (wLength)
    pub length: u16,
}

impl UsbControlRequest {
    pub const LENGTH: usize = 8;

    pub const fn new(
        direction: Direction,
        kind: UsbRequestType,
        recipient: UsbRequestRecipient,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        let dir = match direction {
            Direction::In => DIRECTION_IN,
            Direction::Out => 0,
        };
        Self {
            request_type: dir | kind as u8 | recipient as u8,
            request,
            value,
            index,
            length,
        }
    }

    /// 표준 Get Descriptor 요청 생성
    pub fn new_get_descriptor(
        descriptor_type: DescriptorType,
        descriptor_index: u8,
        language_id: u16,
        length: u16,
    ) -> Self {
        Self::new(
            Direction::In,
            UsbRequestType::Standard,
            UsbRequestRecipient::Device,
            UsbStandardRequest::GetDescriptor as u8,
            ((descriptor_type as u16) << 8) | (descriptor_index as u16),
            language_id,
            length,
        )
    }

    /// Set Address 요청 생성
    pub fn new_set_address(address: u8) -> Self {
        Self::new(
            Direction::Out,
            UsbRequestType::Standard,
            UsbRequestRecipient::Device,
            UsbStandardRequest::SetAddress as u8,
            address as u16,
            0,
            0,
        )
    }

    /// Set Configuration 요청 생성
    pub fn new_set_configuration(configuration_value: u8) -> Self {
        Self::new(
            Direction::Out,
            UsbRequestType::Standard,
            UsbRequestRecipient::Device,
            UsbStandardRequest::SetConfiguration as u8,
            configuration_value as u16,
            0,
            0,
        )
    }

    /// 허브 디스크립터 요청
    pub fn new_get_hub_descriptor(length: u16) -> Self {
        Self::new(
            Direction::In,
            UsbRequestType::Class,
            UsbRequestRecipient::Device,
            UsbStandardRequest::GetDescriptor as u8,
            (DescriptorType::Hub as u16) << 8,
            0,
            length,
        )
    }

    /// 포트 상태 요청 (wPortStatus + wPortChange)
    pub fn new_get_port_status(port: u8) -> Self {
        Self::new(
            Direction::In,
            UsbRequestType::Class,
            UsbRequestRecipient::Other,
            UsbStandardRequest::GetStatus as u8,
            0,
            port as u16,
            4,
        )
    }

    pub fn new_set_port_feature(port: u8, feature: PortFeature) -> Self {
        Self::new(
            Direction::Out,
            UsbRequestType::Class,
            UsbRequestRecipient::Other,
            UsbStandardRequest::SetFeature as u8,
            feature as u16,
            port as u16,
            0,
        )
    }

    pub fn new_clear_port_feature(port: u8, feature: PortFeature) -> Self {
        Self::new(
            Direction::Out,
            UsbRequestType::Class,
            UsbRequestRecipient::Other,
            UsbStandardRequest::ClearFeature as u8,
            feature as u16,
            port as u16,
            0,
        )
    }

    /// 데이터 단계 방향
    pub fn direction(&self) -> Direction {
        if self.request_type & DIRECTION_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn request_kind(&self) -> UsbRequestType {
        match self.request_type & 0x60 {
            0x00 => UsbRequestType::Standard,
            0x20 => UsbRequestType::Class,
            0x40 => UsbRequestType::Vendor,
            _ => UsbRequestType::Reserved,
        }
    }

    pub fn recipient(&self) -> UsbRequestRecipient {
        match self.request_type & 0x1F {
            0x00 => UsbRequestRecipient::Device,
            0x01 => UsbRequestRecipient::Interface,
            0x02 => UsbRequestRecipient::Endpoint,
            _ => UsbRequestRecipient::Other,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    pub fn from_bytes(bytes: &[u8; Self::LENGTH]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
}
