//! DWC2 호스트 컨트롤러 초기화
//!
//! 순서가 정해진 fail-fast 절차입니다. 단계마다 다른 에러 종류를 돌려주며,
//! 실패하면 이미 켠 인터럽트를 모두 되돌려 부분적으로 동작하는 상태를 남기지 않습니다.
//!
//! 1. 메일박스로 USB 전원 도메인 켜기
//! 2. 코어 소프트 리셋
//! 3. FIFO 크기 설정
//! 4. DMA 모드 + AXI 대기 비트
//! 5. 코어 인터럽트 정리 후 포트/채널 인터럽트만 허용
//! 6. 커널에 핸들러 등록, IRQ 라인 unmask
//! 7. 전역 인터럽트 허용

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::UsbHostConfig;
use crate::drivers::mailbox::Mailbox;
use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::{InterruptHandler, Platform};
use crate::drivers::usb::dwc_regs::{
    AhbConfig, CoreInterrupts, CoreReset, GAHBCFG, GINTMSK, GINTSTS, GNPTXFSIZ, GRSTCTL, GRXFSIZ,
    GSNPSID, HAINTMSK, HPTXFSIZ, MAX_CHANNELS,
};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::host_controller::{UsbHostController, UsbHostControllerType};
use crate::kernel::wait::wait_until;

/// 코어가 허용하는 인터럽트
pub const ENABLED_CORE_INTERRUPTS: CoreInterrupts =
    CoreInterrupts::PORT.union(CoreInterrupts::HOST_CHANNEL);

pub struct DwcController<R, P> {
    regs: Arc<R>,
    platform: Arc<P>,
    config: UsbHostConfig,
    running: AtomicBool,
}

impl<R: RegisterBlock, P: Platform> DwcController<R, P> {
    pub fn new(regs: Arc<R>, platform: Arc<P>, config: UsbHostConfig) -> Self {
        Self {
            regs,
            platform,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// 전체 초기화 절차
    pub fn bring_up<M: RegisterBlock>(
        &self,
        mailbox: &Mailbox<M>,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<(), UsbError> {
        crate::log_info!("Bringing up USB host controller...");

        mailbox.power_on_usb(&*self.platform)?;

        let id = self.regs.read(GSNPSID);
        crate::log_info!(
            "DWC2 core id {:#010x} (release {:x}.{:03x})",
            id,
            (id >> 12) & 0xF,
            id & 0xFFF
        );

        if let Err(e) = self.configure_core(handler) {
            crate::log_error!("USB host controller bring-up failed: {}", e);
            self.stop();
            return Err(e);
        }

        self.running.store(true, Ordering::Release);
        crate::log_info!("USB host controller running");
        Ok(())
    }

    fn configure_core(&self, handler: Arc<dyn InterruptHandler>) -> Result<(), UsbError> {
        self.reset()?;
        self.configure_fifos();
        self.enable_dma();
        self.arm_core_interrupts();
        self.register_interrupts(handler)?;
        self.enable_global_interrupts();
        Ok(())
    }

    fn configure_fifos(&self) {
        let rx = self.config.rx_fifo_words;
        let nptx = self.config.nonperiodic_tx_fifo_words;
        let ptx = self.config.periodic_tx_fifo_words;

        // 각 송신 FIFO의 시작 주소는 앞 FIFO 바로 뒤
        self.regs.write(GRXFSIZ, rx);
        self.regs.write(GNPTXFSIZ, (nptx << 16) | rx);
        self.regs.write(HPTXFSIZ, (ptx << 16) | (rx + nptx));
        crate::log_debug!("FIFO sizes: rx={} nptx={} ptx={} (words)", rx, nptx, ptx);
    }

    fn enable_dma(&self) {
        self.regs.modify(GAHBCFG, |value| {
            value | (AhbConfig::DMA_ENABLE | AhbConfig::BCM_AXI_WAIT).bits()
        });
    }

    /// 모두 막고, 대기 중인 것을 지우고, 두 가지만 허용
    fn arm_core_interrupts(&self) {
        self.regs.write(GINTMSK, 0);
        self.regs.write(GINTSTS, 0xFFFF_FFFF);
        let channels = self.config.channel_count.clamp(1, MAX_CHANNELS);
        self.regs.write(HAINTMSK, (1u32 << channels) - 1);
        self.regs.write(GINTMSK, ENABLED_CORE_INTERRUPTS.bits());
    }

    fn register_interrupts(&self, handler: Arc<dyn InterruptHandler>) -> Result<(), UsbError> {
        for &irq in self.config.irq_lines {
            self.platform
                .register_interrupt_handler(irq, handler.clone())
                .map_err(|e| {
                    crate::log_error!("Failed to register USB IRQ {}: {}", irq, e);
                    UsbError::InterruptRegistrationFailed
                })?;
            self.platform.unmask_interrupt(irq);
            crate::log_debug!("USB IRQ {} registered", irq);
        }
        Ok(())
    }

    fn enable_global_interrupts(&self) {
        self.regs.modify(GAHBCFG, |value| {
            value | AhbConfig::GLOBAL_INTERRUPT_ENABLE.bits()
        });
    }
}

impl<R: RegisterBlock, P: Platform> UsbHostController for DwcController<R, P> {
    /// 소프트 리셋을 걸고 하드웨어가 풀 때까지 대기
    fn reset(&self) -> Result<(), UsbError> {
        self.regs.write(GRSTCTL, CoreReset::CORE_SOFT_RESET.bits());
        wait_until(&*self.platform, self.config.reset_wait, || {
            self.regs.read(GRSTCTL) & CoreReset::CORE_SOFT_RESET.bits() == 0
        })
        .map_err(|_| {
            crate::log_error!("Core soft reset did not complete");
            UsbError::ResetTimeout
        })?;
        crate::log_debug!("Core soft reset done");
        Ok(())
    }

    fn stop(&self) {
        self.regs.modify(GAHBCFG, |value| {
            value & !AhbConfig::GLOBAL_INTERRUPT_ENABLE.bits()
        });
        self.regs.write(GINTMSK, 0);
        self.regs.write(HAINTMSK, 0);
        for &irq in self.config.irq_lines {
            self.platform.mask_interrupt(irq);
        }
        if self.running.swap(false, Ordering::AcqRel) {
            crate::log_info!("USB host controller stopped");
        }
    }

    fn controller_type(&self) -> UsbHostControllerType {
        UsbHostControllerType::Dwc2
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
