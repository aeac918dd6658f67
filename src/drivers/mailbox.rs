//! VideoCore 펌웨어 메일박스
//!
//! ARM과 VideoCore 사이의 동기식 요청/응답 통로입니다. 이 드라이버는
//! 부팅 시 USB 전원 도메인을 켜는 데에만 사용합니다.
//!
//! 32비트 워드 하나가 메시지 하나이며, 하위 4비트는 채널 번호,
//! 상위 28비트는 페이로드입니다.

use crate::config::UsbHostConfig;
use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::Platform;
use crate::drivers::usb::error::UsbError;
use crate::kernel::wait::{wait_until, WaitPolicy};

const MAILBOX_READ: usize = 0x00;
const MAILBOX_STATUS: usize = 0x18;
const MAILBOX_WRITE: usize = 0x20;

/// 송신 FIFO가 가득 참
pub const MAILBOX_FULL: u32 = 0x8000_0000;
/// 수신 FIFO가 비어 있음
pub const MAILBOX_EMPTY: u32 = 0x4000_0000;
/// 채널 번호 마스크
pub const CHANNEL_MASK: u32 = 0xF;

/// 전원 관리 채널
pub const POWER_CHANNEL: u8 = 0;
/// 전원 관리 요청에서 USB 도메인 비트
pub const USB_POWER: u32 = 1 << 3;

/// 메일박스 메시지 (4비트 채널 + 28비트 페이로드)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxMessage {
    pub channel: u8,
    pub payload: u32,
}

impl MailboxMessage {
    pub const fn new(channel: u8, payload: u32) -> Self {
        Self { channel, payload }
    }

    pub const fn to_word(self) -> u32 {
        (self.payload << 4) | (self.channel as u32 & CHANNEL_MASK)
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            channel: (word & CHANNEL_MASK) as u8,
            payload: word >> 4,
        }
    }
}

/// 메일박스 0
pub struct Mailbox<R> {
    regs: R,
    policy: WaitPolicy,
}

impl<R: RegisterBlock> Mailbox<R> {
    pub fn new(regs: R, policy: WaitPolicy) -> Self {
        Self { regs, policy }
    }

    /// `config.mailbox_wait`를 응답 대기 정책으로 사용
    pub fn with_config(regs: R, config: &UsbHostConfig) -> Self {
        Self::new(regs, config.mailbox_wait)
    }

    /// `(value & !CHANNEL_MASK) | channel` 쓰기
    pub fn write<P: Platform + ?Sized>(&self, platform: &P, channel: u8, value: u32) -> Result<(), UsbError> {
        wait_until(platform, self.policy, || self.regs.read(MAILBOX_STATUS) & MAILBOX_FULL == 0)
            .map_err(|_| {
                crate::log_error!("Mailbox stayed full (channel {})", channel);
                UsbError::MailboxTimeout
            })?;

        self.regs
            .write(MAILBOX_WRITE, (value & !CHANNEL_MASK) | (u32::from(channel) & CHANNEL_MASK));
        Ok(())
    }

    /// `channel`로 온 워드를 기다려 채널 비트를 지운 값을 반환
    ///
    /// 다른 채널의 워드는 버립니다. 마감은 호출 전체에 걸립니다.
    pub fn read<P: Platform + ?Sized>(&self, platform: &P, channel: u8) -> Result<u32, UsbError> {
        let mut matched = None;
        wait_until(platform, self.policy, || {
            while self.regs.read(MAILBOX_STATUS) & MAILBOX_EMPTY == 0 {
                let word = self.regs.read(MAILBOX_READ);
                if word & CHANNEL_MASK == u32::from(channel) {
                    matched = Some(word & !CHANNEL_MASK);
                    return true;
                }
                crate::log_trace!("Mailbox: dropping word {:#010x} for channel {}", word, word & CHANNEL_MASK);
            }
            false
        })
        .map_err(|_| {
            crate::log_error!("No mailbox reply on channel {}", channel);
            UsbError::MailboxTimeout
        })?;

        matched.ok_or(UsbError::MailboxTimeout)
    }

    /// USB 전원 도메인 켜기
    ///
    /// 펌웨어가 돌려준 응답에 USB 비트가 켜져 있어야 성공입니다.
    pub fn power_on_usb<P: Platform + ?Sized>(&self, platform: &P) -> Result<(), UsbError> {
        self.write(platform, POWER_CHANNEL, USB_POWER << 4)?;
        let reply = self.read(platform, POWER_CHANNEL)? >> 4;

        if reply & USB_POWER == 0 {
            crate::log_error!("Firmware refused USB power (reply {:#x})", reply);
            return Err(UsbError::PowerOnFailed);
        }

        crate::log_info!("USB power domain on");
        Ok(())
    }
}
