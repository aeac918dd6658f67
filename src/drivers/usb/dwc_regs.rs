//! Synopsys DesignWare USB 2.0 OTG(DWC2) 레지스터 맵
//!
//! 오프셋은 코어 베이스로부터의 바이트 단위입니다.

use bitflags::bitflags;

use crate::drivers::usb::descriptor::EndpointTransferType;
use crate::drivers::usb::device::UsbSpeed;
use crate::drivers::usb::request::Direction;

// Core global registers
pub const GOTGCTL: usize = 0x000;
pub const GAHBCFG: usize = 0x008;
pub const GUSBCFG: usize = 0x00C;
pub const GRSTCTL: usize = 0x010;
pub const GINTSTS: usize = 0x014;
pub const GINTMSK: usize = 0x018;
pub const GRXFSIZ: usize = 0x024;
pub const GNPTXFSIZ: usize = 0x028;
pub const GSNPSID: usize = 0x040;
pub const HPTXFSIZ: usize = 0x100;

// Host mode registers
pub const HCFG: usize = 0x400;
pub const HFIR: usize = 0x404;
pub const HAINT: usize = 0x414;
pub const HAINTMSK: usize = 0x418;
pub const HPRT: usize = 0x440;

const HC_BASE: usize = 0x500;
const HC_STRIDE: usize = 0x20;

/// 하드웨어가 제공하는 최대 호스트 채널 수
pub const MAX_CHANNELS: usize = 8;

pub const fn hcchar(channel: usize) -> usize {
    HC_BASE + channel * HC_STRIDE
}
pub const fn hcsplt(channel: usize) -> usize {
    HC_BASE + channel * HC_STRIDE + 0x04
}
pub const fn hcint(channel: usize) -> usize {
    HC_BASE + channel * HC_STRIDE + 0x08
}
pub const fn hcintmsk(channel: usize) -> usize {
    HC_BASE + channel * HC_STRIDE + 0x0C
}
pub const fn hctsiz(channel: usize) -> usize {
    HC_BASE + channel * HC_STRIDE + 0x10
}
pub const fn hcdma(channel: usize) -> usize {
    HC_BASE + channel * HC_STRIDE + 0x14
}

/// HCINT 전체 클리어 값
pub const HCINT_CLEAR_ALL: u32 = 0x3fff;

bitflags! {
    /// GAHBCFG
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AhbConfig: u32 {
        const GLOBAL_INTERRUPT_ENABLE = 1 << 0;
        /// BCM283x 전용: AXI 버스 대기
        const BCM_AXI_WAIT = 1 << 4;
        const DMA_ENABLE = 1 << 5;
    }
}

bitflags! {
    /// GRSTCTL
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CoreReset: u32 {
        const CORE_SOFT_RESET = 1 << 0;
        const RX_FIFO_FLUSH = 1 << 4;
        const TX_FIFO_FLUSH = 1 << 5;
        const AHB_IDLE = 1 << 31;
    }
}

bitflags! {
    /// GINTSTS / GINTMSK
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CoreInterrupts: u32 {
        const CURRENT_MODE_HOST = 1 << 0;
        const MODE_MISMATCH = 1 << 1;
        const START_OF_FRAME = 1 << 3;
        const RX_FIFO_LEVEL = 1 << 4;
        const PORT = 1 << 24;
        const HOST_CHANNEL = 1 << 25;
        const DISCONNECT = 1 << 29;
    }
}

bitflags! {
    /// HPRT
    ///
    /// 비트마다 접근 방식이 다릅니다.
    /// - 읽기 전용: CONNECTED, OVERCURRENT_ACTIVE, SPEED
    /// - 1을 써서 클리어: CONNECT_DETECTED, ENABLE_CHANGED, OVERCURRENT_CHANGED
    /// - ENABLED: 1을 쓰면 포트가 비활성화됨
    /// - 값 쓰기: RESUME, SUSPEND, RESET, POWER
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostPort: u32 {
        const CONNECTED = 1 << 0;
        const CONNECT_DETECTED = 1 << 1;
        const ENABLED = 1 << 2;
        const ENABLE_CHANGED = 1 << 3;
        const OVERCURRENT_ACTIVE = 1 << 4;
        const OVERCURRENT_CHANGED = 1 << 5;
        const RESUME = 1 << 6;
        const SUSPEND = 1 << 7;
        const RESET = 1 << 8;
        const POWER = 1 << 12;
        const SPEED = 0b11 << 17;
    }
}

impl HostPort {
    /// 1을 쓰면 상태가 바뀌는 비트 (ENABLED 포함)
    pub const WRITE_CLEAR: HostPort = HostPort::CONNECT_DETECTED
        .union(HostPort::ENABLED)
        .union(HostPort::ENABLE_CHANGED)
        .union(HostPort::OVERCURRENT_CHANGED);

    /// 변경 알림 비트
    pub const CHANGES: HostPort = HostPort::CONNECT_DETECTED
        .union(HostPort::ENABLE_CHANGED)
        .union(HostPort::OVERCURRENT_CHANGED);

    /// 현재 값 `raw`를 바탕으로 `clear`에 있는 변경 비트만 지우는 쓰기 값
    ///
    /// 다른 1-클리어 비트는 0으로 써서 건드리지 않고, 값 비트(POWER 등)는 그대로 둡니다.
    pub const fn write_value(raw: u32, clear: HostPort) -> u32 {
        (raw & !Self::WRITE_CLEAR.bits()) | (raw & clear.bits() & Self::CHANGES.bits())
    }

    /// 포트에 연결된 디바이스 속도
    pub fn speed(self) -> UsbSpeed {
        match (self.bits() & Self::SPEED.bits()) >> 17 {
            0 => UsbSpeed::High,
            1 => UsbSpeed::Full,
            _ => UsbSpeed::Low,
        }
    }
}

bitflags! {
    /// HCINT / HCINTMSK
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelInterrupts: u32 {
        const TRANSFER_COMPLETED = 1 << 0;
        const HALTED = 1 << 1;
        const AHB_ERROR = 1 << 2;
        const STALL = 1 << 3;
        const NAK = 1 << 4;
        const ACK = 1 << 5;
        const NYET = 1 << 6;
        const TRANSACTION_ERROR = 1 << 7;
        const BABBLE = 1 << 8;
        const FRAME_OVERRUN = 1 << 9;
        const DATA_TOGGLE_ERROR = 1 << 10;
    }
}

/// HCTSIZ의 PID 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketId {
    Data0 = 0,
    Data2 = 1,
    Data1 = 2,
    Setup = 3,
}

impl PacketId {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => PacketId::Data0,
            1 => PacketId::Data2,
            2 => PacketId::Data1,
            _ => PacketId::Setup,
        }
    }
}

/// HCCHAR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCharacteristics {
    pub max_packet_size: u16,
    pub endpoint: u8,
    pub direction: Direction,
    pub low_speed: bool,
    pub endpoint_type: EndpointTransferType,
    pub packets_per_frame: u8,
    pub device_address: u8,
    pub odd_frame: bool,
    pub disable: bool,
    pub enable: bool,
}

const HCCHAR_MPS_MASK: u32 = 0x7FF;
const HCCHAR_EP_SHIFT: u32 = 11;
const HCCHAR_EP_IN: u32 = 1 << 15;
const HCCHAR_LOW_SPEED: u32 = 1 << 17;
const HCCHAR_TYPE_SHIFT: u32 = 18;
const HCCHAR_MC_SHIFT: u32 = 20;
const HCCHAR_ADDR_SHIFT: u32 = 22;
const HCCHAR_ODD_FRAME: u32 = 1 << 29;
pub const HCCHAR_DISABLE: u32 = 1 << 30;
pub const HCCHAR_ENABLE: u32 = 1 << 31;

impl ChannelCharacteristics {
    pub fn to_bits(&self) -> u32 {
        let mut bits = u32::from(self.max_packet_size) & HCCHAR_MPS_MASK;
        bits |= u32::from(self.endpoint & 0xF) << HCCHAR_EP_SHIFT;
        if self.direction == Direction::In {
            bits |= HCCHAR_EP_IN;
        }
        if self.low_speed {
            bits |= HCCHAR_LOW_SPEED;
        }
        bits |= (self.endpoint_type as u32) << HCCHAR_TYPE_SHIFT;
        bits |= u32::from(self.packets_per_frame & 0x3) << HCCHAR_MC_SHIFT;
        bits |= u32::from(self.device_address & 0x7F) << HCCHAR_ADDR_SHIFT;
        if self.odd_frame {
            bits |= HCCHAR_ODD_FRAME;
        }
        if self.disable {
            bits |= HCCHAR_DISABLE;
        }
        if self.enable {
            bits |= HCCHAR_ENABLE;
        }
        bits
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            max_packet_size: (bits & HCCHAR_MPS_MASK) as u16,
            endpoint: ((bits >> HCCHAR_EP_SHIFT) & 0xF) as u8,
            direction: if bits & HCCHAR_EP_IN != 0 {
                Direction::In
            } else {
                Direction::Out
            },
            low_speed: bits & HCCHAR_LOW_SPEED != 0,
            endpoint_type: EndpointTransferType::from_bits(((bits >> HCCHAR_TYPE_SHIFT) & 0x3) as u8),
            packets_per_frame: ((bits >> HCCHAR_MC_SHIFT) & 0x3) as u8,
            device_address: ((bits >> HCCHAR_ADDR_SHIFT) & 0x7F) as u8,
            odd_frame: bits & HCCHAR_ODD_FRAME != 0,
            disable: bits & HCCHAR_DISABLE != 0,
            enable: bits & HCCHAR_ENABLE != 0,
        }
    }
}

/// HCTSIZ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTransferSize {
    pub size: u32,
    pub packet_count: u32,
    pub pid: PacketId,
}

pub const HCTSIZ_SIZE_MASK: u32 = 0x7FFFF;
const HCTSIZ_PKT_SHIFT: u32 = 19;
const HCTSIZ_PKT_MASK: u32 = 0x3FF;
const HCTSIZ_PID_SHIFT: u32 = 29;

impl ChannelTransferSize {
    /// 길이와 최대 패킷 크기로 계산 (패킷 수는 최소 1)
    pub fn new(size: u32, max_packet_size: u16, pid: PacketId) -> Self {
        let mps = u32::from(max_packet_size.max(1));
        Self {
            size,
            packet_count: size.div_ceil(mps).max(1),
            pid,
        }
    }

    pub fn to_bits(&self) -> u32 {
        (self.size & HCTSIZ_SIZE_MASK)
            | ((self.packet_count & HCTSIZ_PKT_MASK) << HCTSIZ_PKT_SHIFT)
            | ((self.pid as u32) << HCTSIZ_PID_SHIFT)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            size: bits & HCTSIZ_SIZE_MASK,
            packet_count: (bits >> HCTSIZ_PKT_SHIFT) & HCTSIZ_PKT_MASK,
            pid: PacketId::from_bits(bits >> HCTSIZ_PID_SHIFT),
        }
    }
}

/// 속도에 맞는 HCCHAR low-speed 비트
pub fn is_low_speed(speed: UsbSpeed) -> bool {
    speed == UsbSpeed::Low
}
