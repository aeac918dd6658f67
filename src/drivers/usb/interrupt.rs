//! USB 인터럽트 디스패처
//!
//! 코어 인터럽트 하나를 받아 원인을 확인(acknowledge)하고, 채널 완료는 그 자리에서
//! 대기 중인 요청에 알리며, 포트 변경은 [`PortEvents`]에 기록해 작업자 태스크로
//! 넘깁니다. 인터럽트 컨텍스트에서는 대기하거나 잠금에서 돌지 않습니다.
//! 신호를 남긴 뒤에는 해당 이벤트에서 잠든 태스크를 플랫폼을 통해 깨웁니다.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::{InterruptHandler, IrqReturn, Platform};
use crate::drivers::usb::channel::ChannelPool;
use crate::drivers::usb::dwc_regs::{
    hcint, hctsiz, ChannelInterrupts, CoreInterrupts, HostPort, GINTMSK, GINTSTS, HAINT,
    HCTSIZ_SIZE_MASK, HPRT, MAX_CHANNELS,
};
use crate::kernel::event::Event;

/// 루트 포트 변경 기록
///
/// 인터럽트 쪽에서 변경 비트를 누적하고, 루트 허브 에뮬레이션이 CLEAR_PORT_FEATURE로
/// 지울 때까지 wPortChange로 보고합니다.
pub struct PortEvents {
    latched: AtomicU32,
    last_status: AtomicU32,
    pending: AtomicBool,
    event: Event,
}

impl PortEvents {
    pub const fn new() -> Self {
        Self {
            latched: AtomicU32::new(0),
            last_status: AtomicU32::new(0),
            pending: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    /// 작업자가 잠드는 이벤트
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// 인터럽트에서 읽은 HPRT 값 기록 후 작업자에게 신호
    pub fn record(&self, raw: HostPort) {
        self.last_status.store(raw.bits(), Ordering::Relaxed);
        self.latched
            .fetch_or((raw & HostPort::CHANGES).bits(), Ordering::AcqRel);
        self.pending.store(true, Ordering::Release);
        self.event.raise();
    }

    pub fn latched(&self) -> HostPort {
        HostPort::from_bits_retain(self.latched.load(Ordering::Acquire))
    }

    pub fn clear_latched(&self, bits: HostPort) {
        self.latched.fetch_and(!bits.bits(), Ordering::AcqRel);
    }

    pub fn last_status(&self) -> HostPort {
        HostPort::from_bits_retain(self.last_status.load(Ordering::Relaxed))
    }

    /// 처리할 변경이 있으면 신호를 소비하고 `true`
    pub fn take_signal(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// 인터럽트 없이 작업자를 깨움 (초기 포트 검사)
    pub fn signal<P: Platform + ?Sized>(&self, platform: &P) {
        self.pending.store(true, Ordering::Release);
        self.event.signal(platform);
    }
}

impl Default for PortEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// 채널 하나의 완료 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEvent {
    pub interrupts: ChannelInterrupts,
    pub remaining: u32,
}

/// 인터럽트 한 번에서 확인한 내용
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptEvent {
    pub core: CoreInterrupts,
    pub port: Option<HostPort>,
    pub channels: [Option<ChannelEvent>; MAX_CHANNELS],
}

impl InterruptEvent {
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }
}

/// USB 코어 인터럽트 처리기
pub struct Dispatcher<R, P> {
    regs: Arc<R>,
    platform: Arc<P>,
    channels: Arc<ChannelPool>,
    port_events: Arc<PortEvents>,
    irq_count: AtomicU64,
    spurious_completions: AtomicU64,
}

impl<R: RegisterBlock, P: Platform> Dispatcher<R, P> {
    pub fn new(regs: Arc<R>, platform: Arc<P>, channels: Arc<ChannelPool>, port_events: Arc<PortEvents>) -> Self {
        Self {
            regs,
            platform,
            channels,
            port_events,
            irq_count: AtomicU64::new(0),
            spurious_completions: AtomicU64::new(0),
        }
    }

    /// 원인 확인 및 하드웨어 상태 클리어
    ///
    /// 포트 변경 비트와 채널 인터럽트를 모두 지운 뒤 읽어둔 값을 돌려줍니다.
    pub fn acknowledge(&self) -> InterruptEvent {
        let status = self.regs.read(GINTSTS);
        let mask = self.regs.read(GINTMSK);
        let core = CoreInterrupts::from_bits_retain(status & mask);

        let mut event = InterruptEvent {
            core,
            port: None,
            channels: [None; MAX_CHANNELS],
        };
        if core.is_empty() {
            return event;
        }

        if core.contains(CoreInterrupts::PORT) {
            let raw = self.regs.read(HPRT);
            // 변경 비트만 지우고 ENABLED는 0으로 써서 포트를 유지
            self.regs.write(HPRT, HostPort::write_value(raw, HostPort::CHANGES));
            event.port = Some(HostPort::from_bits_retain(raw));
        }

        if core.contains(CoreInterrupts::HOST_CHANNEL) {
            let pending = self.regs.read(HAINT);
            for channel in 0..self.channels.count() {
                if pending & (1 << channel) == 0 {
                    continue;
                }
                let interrupts = self.regs.read(hcint(channel));
                self.regs.write(hcint(channel), interrupts);
                let remaining = self.regs.read(hctsiz(channel)) & HCTSIZ_SIZE_MASK;
                event.channels[channel] = Some(ChannelEvent {
                    interrupts: ChannelInterrupts::from_bits_retain(interrupts),
                    remaining,
                });
            }
        }

        self.regs.write(GINTSTS, core.bits());
        event
    }

    /// 확인한 이벤트를 대기자에게 전달하고 잠든 태스크를 깨움
    pub fn signal(&self, event: &InterruptEvent) {
        let mut completed = false;
        for (channel, completion) in event.channels.iter().enumerate() {
            let Some(completion) = completion else {
                continue;
            };
            if self
                .channels
                .complete(channel, completion.interrupts, completion.remaining)
            {
                completed = true;
            } else {
                self.spurious_completions.fetch_add(1, Ordering::Relaxed);
            }
        }
        if completed {
            self.platform.wake_event(self.channels.event());
        }
        if let Some(port) = event.port {
            self.port_events.record(port);
            self.platform.wake_event(self.port_events.event());
        }
    }

    pub fn irq_count(&self) -> u64 {
        self.irq_count.load(Ordering::Relaxed)
    }

    /// 묶인 요청 없이 도착한 채널 완료 수 (타임아웃 후 늦게 온 인터럽트)
    pub fn spurious_completions(&self) -> u64 {
        self.spurious_completions.load(Ordering::Relaxed)
    }
}

impl<R: RegisterBlock, P: Platform> InterruptHandler for Dispatcher<R, P> {
    fn handle_irq(&self, _irq: u32) -> IrqReturn {
        let event = self.acknowledge();
        if event.is_empty() {
            return IrqReturn::NotHandled;
        }
        self.irq_count.fetch_add(1, Ordering::Relaxed);
        self.signal(&event);

        if event.port.is_some() || event.channels.iter().any(Option::is_some) {
            IrqReturn::Reschedule
        } else {
            IrqReturn::Handled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::channel::TransferCompletion;
    use crate::drivers::usb::dwc_regs::{GINTMSK, HPRT};
    use crate::testing::{FakeDwc, FakePlatform};

    type TestDispatcher = Dispatcher<FakeDwc, FakePlatform>;

    fn dispatcher(dwc: &Arc<FakeDwc>) -> (TestDispatcher, Arc<ChannelPool>, Arc<PortEvents>) {
        let (dispatcher, channels, events, _) = dispatcher_with_platform(dwc);
        (dispatcher, channels, events)
    }

    fn dispatcher_with_platform(
        dwc: &Arc<FakeDwc>,
    ) -> (TestDispatcher, Arc<ChannelPool>, Arc<PortEvents>, Arc<FakePlatform>) {
        let platform = Arc::new(FakePlatform::new());
        let channels = Arc::new(ChannelPool::new(MAX_CHANNELS));
        let events = Arc::new(PortEvents::new());
        (
            Dispatcher::new(dwc.clone(), platform.clone(), channels.clone(), events.clone()),
            channels,
            events,
            platform,
        )
    }

    #[test]
    fn nothing_pending_is_not_handled() {
        let dwc = Arc::new(FakeDwc::new());
        dwc.write(GINTMSK, (CoreInterrupts::PORT | CoreInterrupts::HOST_CHANNEL).bits());
        let (dispatcher, _, events) = dispatcher(&dwc);
        assert_eq!(dispatcher.handle_irq(9), IrqReturn::NotHandled);
        assert!(!events.is_pending());
    }

    #[test]
    fn enable_change_is_acknowledged_without_dropping_power() {
        let dwc = Arc::new(FakeDwc::new());
        dwc.write(GINTMSK, (CoreInterrupts::PORT | CoreInterrupts::HOST_CHANNEL).bits());
        dwc.set_port(
            HostPort::CONNECTED | HostPort::ENABLED | HostPort::ENABLE_CHANGED | HostPort::POWER,
        );
        let (dispatcher, _, events) = dispatcher(&dwc);

        assert_eq!(dispatcher.handle_irq(9), IrqReturn::Reschedule);

        let port = HostPort::from_bits_retain(dwc.read(HPRT));
        assert!(!port.contains(HostPort::ENABLE_CHANGED));
        assert!(port.contains(HostPort::POWER));
        assert!(port.contains(HostPort::ENABLED));
        assert!(events.take_signal());
        assert!(events.latched().contains(HostPort::ENABLE_CHANGED));
    }

    #[test]
    fn channel_halt_completes_the_bound_request() {
        let dwc = Arc::new(FakeDwc::new());
        dwc.write(GINTMSK, (CoreInterrupts::PORT | CoreInterrupts::HOST_CHANNEL).bits());
        let (dispatcher, channels, _) = dispatcher(&dwc);

        let channel = channels.try_acquire().unwrap();
        let completion = Arc::new(TransferCompletion::new(8));
        channels.bind(channel, completion.clone()).unwrap();

        dwc.raise_channel_interrupt(
            channel.index(),
            ChannelInterrupts::HALTED | ChannelInterrupts::TRANSFER_COMPLETED,
        );
        assert_eq!(dispatcher.handle_irq(9), IrqReturn::Reschedule);

        let outcome = completion.outcome().unwrap();
        assert!(outcome.interrupts.contains(ChannelInterrupts::TRANSFER_COMPLETED));
        assert_eq!(channels.free_count(), MAX_CHANNELS);
        assert_eq!(dwc.read(hcint(channel.index())), 0);
    }

    #[test]
    fn completion_and_port_change_wake_their_waiters() {
        let dwc = Arc::new(FakeDwc::new());
        dwc.write(GINTMSK, (CoreInterrupts::PORT | CoreInterrupts::HOST_CHANNEL).bits());
        let (dispatcher, channels, events, platform) = dispatcher_with_platform(&dwc);

        let channel = channels.try_acquire().unwrap();
        channels.bind(channel, Arc::new(TransferCompletion::new(0))).unwrap();
        let channel_generation = channels.event().generation();
        let port_generation = events.event().generation();

        dwc.raise_channel_interrupt(channel.index(), ChannelInterrupts::HALTED | ChannelInterrupts::TRANSFER_COMPLETED);
        dispatcher.handle_irq(9);
        assert_ne!(channels.event().generation(), channel_generation);
        assert_eq!(events.event().generation(), port_generation);
        assert_eq!(platform.wakeups(), 1);

        dwc.set_port(HostPort::CONNECTED | HostPort::CONNECT_DETECTED | HostPort::POWER);
        dispatcher.handle_irq(9);
        assert_ne!(events.event().generation(), port_generation);
        assert_eq!(platform.wakeups(), 2);
    }

    #[test]
    fn late_completion_is_counted_as_spurious() {
        let dwc = Arc::new(FakeDwc::new());
        dwc.write(GINTMSK, (CoreInterrupts::PORT | CoreInterrupts::HOST_CHANNEL).bits());
        let (dispatcher, channels, _) = dispatcher(&dwc);

        dwc.raise_channel_interrupt(2, ChannelInterrupts::HALTED);
        dispatcher.handle_irq(9);
        assert_eq!(dispatcher.spurious_completions(), 1);
        assert_eq!(channels.free_count(), MAX_CHANNELS);
        assert_eq!(channels.double_releases(), 0);
    }
}
