//! Board profile selection

/// 지원 보드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Board {
    /// BCM2835 (Raspberry Pi 1, Zero)
    Rpi1,
    /// BCM2836 (Raspberry Pi 2)
    Rpi2,
    /// BCM2837 (Raspberry Pi 3)
    Rpi3,
}

/// VideoCore 인터럽트 컨트롤러의 USB 라인
pub const VC_USB_IRQ: u32 = 9;

const USB_CORE_OFFSET: usize = 0x0098_0000;
const MAILBOX_OFFSET: usize = 0x0000_B880;

#[inline]
pub const fn current_board() -> Board {
    // Order of checks ensures exactly one wins based on enabled feature
    if cfg!(feature = "board_rpi1") {
        Board::Rpi1
    } else if cfg!(feature = "board_rpi2") {
        Board::Rpi2
    } else {
        Board::Rpi3
    }
}

impl Board {
    /// 주변장치 물리 베이스 주소
    pub const fn peripheral_base(self) -> usize {
        match self {
            Board::Rpi1 => 0x2000_0000,
            Board::Rpi2 | Board::Rpi3 => 0x3F00_0000,
        }
    }

    /// DWC2 코어 레지스터 베이스
    pub const fn usb_base(self) -> usize {
        self.peripheral_base() + USB_CORE_OFFSET
    }

    /// ARM <-> VideoCore 메일박스 0 베이스
    pub const fn mailbox_base(self) -> usize {
        self.peripheral_base() + MAILBOX_OFFSET
    }

    /// 컨트롤러가 연결된 IRQ 라인
    pub const fn usb_irq_lines(self) -> &'static [u32] {
        &[VC_USB_IRQ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_windows_follow_peripheral_base() {
        assert_eq!(Board::Rpi1.usb_base(), 0x2098_0000);
        assert_eq!(Board::Rpi3.usb_base(), 0x3F98_0000);
        assert_eq!(Board::Rpi3.mailbox_base(), 0x3F00_B880);
    }
}
