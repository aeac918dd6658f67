//! 테스트용 가짜 하드웨어
//!
//! - [`FakeDwc`]: DWC2 레지스터 파일. 비트별 하드웨어 의미(자동 해제되는 소프트 리셋,
//!   1-쓰기 클리어, GINTSTS/HAINT 파생)를 흉내 내고, 채널이 시작되면 연결된
//!   [`SimDevice`]와 DMA 버퍼를 통해 트랜잭션을 즉시 실행합니다.
//! - [`FakeMailbox`]: 응답 방식을 고를 수 있는 메일박스
//! - [`FakePlatform`]: 실제 시계와, 대기 지점(`relax`, `wait_event`)에서의 인터럽트
//!   전달. `wait_event`는 조건 변수에서 잠깐씩 잠듭니다.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use std::vec::Vec;

use crate::drivers::mailbox::{MailboxMessage, CHANNEL_MASK, MAILBOX_EMPTY, MAILBOX_FULL};
use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::{InterruptHandler, Platform};
use crate::drivers::usb::descriptor::{write_string_descriptor, DescriptorType};
use crate::drivers::usb::device::UsbSpeed;
use crate::drivers::usb::dwc_regs::{
    hcchar, hcdma, hcint, hctsiz, AhbConfig, ChannelCharacteristics, ChannelInterrupts,
    ChannelTransferSize, CoreInterrupts, CoreReset, HostPort, PacketId, GAHBCFG, GINTMSK, GINTSTS,
    GRSTCTL, GSNPSID, HAINT, HCCHAR_DISABLE, HCCHAR_ENABLE, HPRT, MAX_CHANNELS,
};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::request::{Direction, UsbControlRequest, UsbStandardRequest};
use crate::kernel::event::Event;

/// VID 0x1234, PID 0x5678, 벤더 클래스, 최대 패킷 64
pub const SAMPLE_DEVICE: [u8; 18] = [
    18, 1, 0x00, 0x02, 0xFF, 0x01, 0x02, 64, 0x34, 0x12, 0x78, 0x56, 0x00, 0x01, 1, 2, 3, 1,
];

/// 인터페이스 하나, 벌크 IN 엔드포인트 하나
pub const SAMPLE_CONFIG: [u8; 25] = [
    9, 2, 25, 0, 1, 1, 0, 0x80, 50, //
    9, 4, 0, 0, 1, 0xFF, 0, 0, 0, //
    7, 5, 0x81, 0x02, 64, 0, 0,
];

const SNPSID: u32 = 0x4F54_294A;

/// `wait_event` 한 번에 잠드는 최대 시간
const WAIT_SLICE: Duration = Duration::from_micros(500);

/// 가짜 DMA 주소 공간
#[derive(Default)]
struct DmaTable {
    map: Mutex<HashMap<u32, usize>>,
    next: AtomicU32,
}

impl DmaTable {
    fn register(&self, ptr: *const u8) -> u32 {
        let handle = 0x1000_0000 + self.next.fetch_add(0x100, Ordering::Relaxed);
        self.map.lock().unwrap().insert(handle, ptr as usize);
        handle
    }

    fn resolve(&self, handle: u32) -> Option<*mut u8> {
        self.map.lock().unwrap().get(&handle).map(|&p| p as *mut u8)
    }

    fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }
}

/// 시뮬레이션 디바이스의 고장 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFailure {
    None,
    /// 이 요청의 데이터/상태 단계에서 STALL
    StallOn(UsbStandardRequest),
    /// 처음 n번의 데이터/상태 트랜잭션에 NAK
    NakTimes(u32),
    AlwaysNak,
    /// 아무 응답도 없음 (채널이 멈추지 않음)
    Silent,
}

enum SimResponse {
    Ack(usize),
    Stall,
    Nak,
    NoResponse,
    Silent,
}

/// 루트 포트에 연결된 가상 디바이스
#[derive(Clone)]
pub struct SimDevice {
    descriptor: [u8; 18],
    configuration: Vec<u8>,
    strings: Option<(String, String)>,
    speed: UsbSpeed,
    failure: SimFailure,
    address: u8,
    configuration_value: u8,
    current: Option<UsbControlRequest>,
    data_done: bool,
    naks_left: u32,
    setups: Vec<UsbControlRequest>,
    present: bool,
}

impl SimDevice {
    pub fn new(descriptor: [u8; 18]) -> Self {
        Self {
            descriptor,
            configuration: Vec::new(),
            strings: None,
            speed: UsbSpeed::Full,
            failure: SimFailure::None,
            address: 0,
            configuration_value: 0,
            current: None,
            data_done: false,
            naks_left: 0,
            setups: Vec::new(),
            present: true,
        }
    }

    pub fn failing(mut self, failure: SimFailure) -> Self {
        if let SimFailure::NakTimes(n) = failure {
            self.naks_left = n;
        }
        self.failure = failure;
        self
    }

    pub fn with_configuration(mut self, bytes: &[u8]) -> Self {
        self.configuration = bytes.to_vec();
        self
    }

    /// 문자열 디스크립터 1번(제조사)과 2번(제품)을 답하게 함
    pub fn with_strings(mut self, manufacturer: &str, product: &str) -> Self {
        self.strings = Some((manufacturer.into(), product.into()));
        self
    }

    fn string(&self, index: u8) -> Option<Vec<u8>> {
        let (manufacturer, product) = self.strings.as_ref()?;
        let text = match index {
            0 => return Some(vec![4, DescriptorType::String as u8, 0x09, 0x04]),
            1 => manufacturer,
            2 => product,
            _ => return None,
        };
        let mut buf = [0u8; 64];
        let len = write_string_descriptor(text, &mut buf);
        Some(buf[..len].to_vec())
    }

    fn reply_for(&self, setup: &UsbControlRequest) -> Option<Vec<u8>> {
        match UsbStandardRequest::from_u8(setup.request)? {
            UsbStandardRequest::GetDescriptor => match DescriptorType::from_u8((setup.value >> 8) as u8)? {
                DescriptorType::Device => Some(self.descriptor.to_vec()),
                DescriptorType::Configuration if !self.configuration.is_empty() => {
                    Some(self.configuration.clone())
                }
                DescriptorType::String => self.string(setup.value as u8),
                _ => None,
            },
            UsbStandardRequest::GetStatus => Some(vec![0, 0]),
            UsbStandardRequest::GetConfiguration => Some(vec![self.configuration_value]),
            _ => None,
        }
    }

    fn finish(&mut self, setup: &UsbControlRequest) {
        match UsbStandardRequest::from_u8(setup.request) {
            Some(UsbStandardRequest::SetAddress) => self.address = setup.value as u8,
            Some(UsbStandardRequest::SetConfiguration) => self.configuration_value = setup.value as u8,
            _ => {}
        }
    }

    fn transact(&mut self, direction: Direction, pid: PacketId, buffer: *mut u8, size: usize) -> SimResponse {
        if self.failure == SimFailure::Silent {
            return SimResponse::Silent;
        }

        if pid == PacketId::Setup {
            if size != UsbControlRequest::LENGTH {
                return SimResponse::NoResponse;
            }
            let mut bytes = [0u8; UsbControlRequest::LENGTH];
            // SAFETY: 엔진이 채널에 묶은 DMA 버퍼 (최소 8바이트)
            unsafe { std::ptr::copy_nonoverlapping(buffer, bytes.as_mut_ptr(), bytes.len()) };
            let setup = UsbControlRequest::from_bytes(&bytes);
            self.setups.push(setup);
            self.current = Some(setup);
            self.data_done = false;
            return SimResponse::Ack(UsbControlRequest::LENGTH);
        }

        let Some(setup) = self.current else {
            return SimResponse::Stall;
        };

        match self.failure {
            SimFailure::AlwaysNak => return SimResponse::Nak,
            SimFailure::NakTimes(_) if self.naks_left > 0 => {
                self.naks_left -= 1;
                return SimResponse::Nak;
            }
            SimFailure::StallOn(request) if request as u8 == setup.request => {
                return SimResponse::Stall;
            }
            _ => {}
        }

        let data_stage = setup.length > 0 && !self.data_done && direction == setup.direction();
        if data_stage {
            self.data_done = true;
            return match direction {
                Direction::In => {
                    let Some(reply) = self.reply_for(&setup) else {
                        return SimResponse::Stall;
                    };
                    let n = reply.len().min(size).min(setup.length as usize);
                    // SAFETY: 버퍼 길이는 HCTSIZ의 size 이상
                    unsafe { std::ptr::copy_nonoverlapping(reply.as_ptr(), buffer, n) };
                    SimResponse::Ack(n)
                }
                Direction::Out => SimResponse::Ack(size),
            };
        }

        // status stage
        if setup.length == 0 && self.reply_for(&setup).is_none() && !is_no_data_request(&setup) {
            return SimResponse::Stall;
        }
        self.finish(&setup);
        self.current = None;
        SimResponse::Ack(0)
    }
}

fn is_no_data_request(setup: &UsbControlRequest) -> bool {
    matches!(
        UsbStandardRequest::from_u8(setup.request),
        Some(
            UsbStandardRequest::SetAddress
                | UsbStandardRequest::SetConfiguration
                | UsbStandardRequest::SetFeature
                | UsbStandardRequest::ClearFeature
                | UsbStandardRequest::SetInterface
        )
    )
}

pub type SimId = usize;

struct DwcState {
    regs: HashMap<usize, u32>,
    write_log: Vec<(usize, u32)>,
    reset_stuck: bool,
    halt_stuck: bool,
    sims: Vec<SimDevice>,
}

impl DwcState {
    fn get(&self, offset: usize) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn set(&mut self, offset: usize, value: u32) {
        self.regs.insert(offset, value);
    }

    fn channel_pending(&self) -> u32 {
        (0..MAX_CHANNELS)
            .filter(|&ch| self.get(hcint(ch)) != 0)
            .fold(0, |acc, ch| acc | (1 << ch))
    }

    fn route(&self, address: u8) -> Option<usize> {
        self.sims
            .iter()
            .position(|sim| sim.present && sim.address == address)
    }

    fn write_port(&mut self, value: u32) {
        let old = HostPort::from_bits_retain(self.get(HPRT));
        let written = HostPort::from_bits_retain(value);
        let mut new = old;

        new.remove(written & HostPort::CHANGES);
        if written.contains(HostPort::ENABLED) && old.contains(HostPort::ENABLED) {
            new.remove(HostPort::ENABLED);
            new.insert(HostPort::ENABLE_CHANGED);
        }
        let value_bits = HostPort::RESUME | HostPort::SUSPEND | HostPort::RESET | HostPort::POWER;
        new = (new - value_bits) | (written & value_bits);

        if old.contains(HostPort::RESET) && !new.contains(HostPort::RESET) && new.contains(HostPort::CONNECTED) {
            new.insert(HostPort::ENABLED | HostPort::ENABLE_CHANGED);
        }
        self.set(HPRT, new.bits());
    }

    fn run_channel(&mut self, dma: &DmaTable, ch: usize, hcchar_value: u32) {
        let characteristics = ChannelCharacteristics::from_bits(hcchar_value);
        let tsize = ChannelTransferSize::from_bits(self.get(hctsiz(ch)));
        let size = tsize.size as usize;

        let response = match (self.route(characteristics.device_address), dma.resolve(self.get(hcdma(ch)))) {
            (Some(index), Some(buffer)) => {
                self.sims[index].transact(characteristics.direction, tsize.pid, buffer, size)
            }
            _ => SimResponse::NoResponse,
        };

        let (interrupts, remaining) = match response {
            SimResponse::Ack(n) => (
                ChannelInterrupts::TRANSFER_COMPLETED | ChannelInterrupts::HALTED | ChannelInterrupts::ACK,
                size - n.min(size),
            ),
            SimResponse::Stall => (ChannelInterrupts::STALL | ChannelInterrupts::HALTED, size),
            SimResponse::Nak => (ChannelInterrupts::NAK | ChannelInterrupts::HALTED, size),
            SimResponse::NoResponse => (
                ChannelInterrupts::TRANSACTION_ERROR | ChannelInterrupts::HALTED,
                size,
            ),
            SimResponse::Silent => return,
        };

        self.set(
            hctsiz(ch),
            ChannelTransferSize {
                size: remaining as u32,
                ..tsize
            }
            .to_bits(),
        );
        self.set(hcint(ch), self.get(hcint(ch)) | interrupts.bits());
        self.set(hcchar(ch), hcchar_value & !HCCHAR_ENABLE);
    }
}

/// 가짜 DWC2 레지스터 파일
pub struct FakeDwc {
    state: Mutex<DwcState>,
    dma: Arc<DmaTable>,
}

impl FakeDwc {
    pub fn new() -> Self {
        let mut regs = HashMap::new();
        regs.insert(GSNPSID, SNPSID);
        regs.insert(GRSTCTL, CoreReset::AHB_IDLE.bits());
        Self {
            state: Mutex::new(DwcState {
                regs,
                write_log: Vec::new(),
                reset_stuck: false,
                halt_stuck: false,
                sims: Vec::new(),
            }),
            dma: Arc::new(DmaTable::default()),
        }
    }

    fn dma_table(&self) -> Arc<DmaTable> {
        self.dma.clone()
    }

    /// 소프트 리셋 비트가 풀리지 않게 함
    pub fn set_reset_stuck(&self, stuck: bool) {
        self.state.lock().unwrap().reset_stuck = stuck;
    }

    /// 채널 정지 요청이 받아들여지지 않게 함 (CHEN이 켜진 채로 남음)
    pub fn set_halt_stuck(&self, stuck: bool) {
        self.state.lock().unwrap().halt_stuck = stuck;
    }

    /// 멈춰 있던 채널이 뒤늦게 정지를 마침: CHEN을 내리고 HALTED를 올림
    pub fn complete_halt(&self, channel: usize) {
        let mut state = self.state.lock().unwrap();
        let value = state.get(hcchar(channel));
        state.set(hcchar(channel), value & !(HCCHAR_ENABLE | HCCHAR_DISABLE));
        let pending = state.get(hcint(channel));
        state.set(hcint(channel), pending | ChannelInterrupts::HALTED.bits());
    }

    /// HPRT 값을 직접 설정 (하드웨어 쪽 변화)
    pub fn set_port(&self, port: HostPort) {
        self.state.lock().unwrap().set(HPRT, port.bits());
    }

    /// 채널 인터럽트를 직접 발생
    pub fn raise_channel_interrupt(&self, channel: usize, interrupts: ChannelInterrupts) {
        let mut state = self.state.lock().unwrap();
        let current = state.get(hcint(channel));
        state.set(hcint(channel), current | interrupts.bits());
    }

    pub fn write_log(&self) -> Vec<(usize, u32)> {
        self.state.lock().unwrap().write_log.clone()
    }

    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .write_log
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|&(_, v)| v)
            .collect()
    }

    /// 디바이스 연결: CONNECTED와 CONNECT_DETECTED가 켜짐
    pub fn attach(&self, sim: SimDevice) -> SimId {
        let mut state = self.state.lock().unwrap();
        let speed = match sim.speed {
            UsbSpeed::High => 0,
            UsbSpeed::Full => 1,
            UsbSpeed::Low => 2,
        };
        state.sims.push(sim);
        let port = (state.get(HPRT) & !HostPort::SPEED.bits())
            | (HostPort::CONNECTED | HostPort::CONNECT_DETECTED).bits()
            | (speed << 17);
        state.set(HPRT, port);
        state.sims.len() - 1
    }

    /// 디바이스 분리. 남은 디바이스가 없으면 포트가 끊김
    pub fn detach(&self, id: SimId) {
        let mut state = self.state.lock().unwrap();
        if let Some(sim) = state.sims.get_mut(id) {
            sim.present = false;
        }
        if state.sims.iter().all(|sim| !sim.present) {
            let mut port = HostPort::from_bits_retain(state.get(HPRT));
            if port.contains(HostPort::ENABLED) {
                port.insert(HostPort::ENABLE_CHANGED);
            }
            port.remove(HostPort::CONNECTED | HostPort::ENABLED);
            port.insert(HostPort::CONNECT_DETECTED);
            state.set(HPRT, port.bits());
        }
    }

    pub fn sim_setups(&self, id: SimId) -> Vec<UsbControlRequest> {
        self.state.lock().unwrap().sims[id].setups.clone()
    }

    pub fn sim_address(&self, id: SimId) -> u8 {
        self.state.lock().unwrap().sims[id].address
    }

    pub fn sim_configuration(&self, id: SimId) -> u8 {
        self.state.lock().unwrap().sims[id].configuration_value
    }
}

impl RegisterBlock for FakeDwc {
    fn read(&self, offset: usize) -> u32 {
        let state = self.state.lock().unwrap();
        match offset {
            GINTSTS => {
                let mut status = CoreInterrupts::from_bits_retain(state.get(GINTSTS));
                if HostPort::from_bits_retain(state.get(HPRT)).intersects(HostPort::CHANGES) {
                    status.insert(CoreInterrupts::PORT);
                }
                if state.channel_pending() != 0 {
                    status.insert(CoreInterrupts::HOST_CHANNEL);
                }
                status.bits()
            }
            HAINT => state.channel_pending(),
            _ => state.get(offset),
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = self.state.lock().unwrap();
        state.write_log.push((offset, value));
        match offset {
            GRSTCTL => {
                let mut reset = CoreReset::from_bits_retain(value) | CoreReset::AHB_IDLE;
                if !state.reset_stuck {
                    reset.remove(CoreReset::CORE_SOFT_RESET);
                }
                state.set(GRSTCTL, reset.bits());
            }
            GINTSTS => {
                let pending = state.get(GINTSTS);
                state.set(GINTSTS, pending & !value);
            }
            HPRT => state.write_port(value),
            _ if (0x500..0x500 + MAX_CHANNELS * 0x20).contains(&offset) => {
                let ch = (offset - 0x500) / 0x20;
                if offset == hcint(ch) {
                    let pending = state.get(offset);
                    state.set(offset, pending & !value);
                } else if offset == hcchar(ch) {
                    let running = state.get(offset) & HCCHAR_ENABLE != 0;
                    state.set(offset, value);
                    let start = value & HCCHAR_ENABLE != 0 && value & HCCHAR_DISABLE == 0;
                    if start {
                        state.run_channel(&self.dma, ch, value);
                    } else if value & HCCHAR_DISABLE != 0 && !(running && state.halt_stuck) {
                        // 진행 중이던 채널은 정지를 마치면 HALTED를 올림
                        state.set(offset, value & !(HCCHAR_ENABLE | HCCHAR_DISABLE));
                        if running {
                            let pending = state.get(hcint(ch));
                            state.set(hcint(ch), pending | ChannelInterrupts::HALTED.bits());
                        }
                    }
                } else {
                    state.set(offset, value);
                }
            }
            _ => state.set(offset, value),
        }
    }
}

enum MailboxMode {
    Echo,
    Replying(u32),
    Silent,
}

struct MailboxState {
    mode: MailboxMode,
    queue: VecDeque<u32>,
    full: bool,
}

/// 가짜 메일박스
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
}

impl FakeMailbox {
    fn with_mode(mode: MailboxMode) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                mode,
                queue: VecDeque::new(),
                full: false,
            }),
        }
    }

    /// 쓴 워드를 그대로 돌려줌
    pub fn echo() -> Self {
        Self::with_mode(MailboxMode::Echo)
    }

    /// 같은 채널로 고정된 페이로드를 돌려줌
    pub fn replying(payload: u32) -> Self {
        Self::with_mode(MailboxMode::Replying(payload))
    }

    pub fn silent() -> Self {
        Self::with_mode(MailboxMode::Silent)
    }

    /// 수신 큐에 워드 추가
    pub fn inject(&self, word: u32) {
        self.state.lock().unwrap().queue.push_back(word);
    }

    pub fn set_full(&self, full: bool) {
        self.state.lock().unwrap().full = full;
    }
}

impl RegisterBlock for FakeMailbox {
    fn read(&self, offset: usize) -> u32 {
        let mut state = self.state.lock().unwrap();
        match offset {
            0x00 => state.queue.pop_front().unwrap_or(0),
            0x18 => {
                let mut status = 0;
                if state.full {
                    status |= MAILBOX_FULL;
                }
                if state.queue.is_empty() {
                    status |= MAILBOX_EMPTY;
                }
                status
            }
            _ => 0,
        }
    }

    fn write(&self, offset: usize, value: u32) {
        if offset != 0x20 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let reply = match state.mode {
            MailboxMode::Echo => Some(value),
            MailboxMode::Replying(payload) => {
                Some(MailboxMessage::new((value & CHANNEL_MASK) as u8, payload).to_word())
            }
            MailboxMode::Silent => None,
        };
        if let Some(word) = reply {
            state.queue.push_back(word);
        }
    }
}

/// 가짜 플랫폼
pub struct FakePlatform {
    start: Instant,
    dwc: Option<Arc<FakeDwc>>,
    dma: Arc<DmaTable>,
    handlers: Mutex<Vec<(u32, Arc<dyn InterruptHandler>)>>,
    unmasked: Mutex<HashSet<u32>>,
    refuse: AtomicBool,
    delivering: Mutex<()>,
    wakeups: Mutex<u64>,
    woken: Condvar,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::build(None, Arc::new(DmaTable::default()))
    }

    /// 인터럽트를 `dwc`에서 가져와 전달하는 플랫폼
    pub fn with_dwc(dwc: Arc<FakeDwc>) -> Self {
        let dma = dwc.dma_table();
        Self::build(Some(dwc), dma)
    }

    fn build(dwc: Option<Arc<FakeDwc>>, dma: Arc<DmaTable>) -> Self {
        Self {
            start: Instant::now(),
            dwc,
            dma,
            handlers: Mutex::new(Vec::new()),
            unmasked: Mutex::new(HashSet::new()),
            refuse: AtomicBool::new(false),
            delivering: Mutex::new(()),
            wakeups: Mutex::new(0),
            woken: Condvar::new(),
        }
    }

    pub fn refuse_registration(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn is_unmasked(&self, irq: u32) -> bool {
        self.unmasked.lock().unwrap().contains(&irq)
    }

    pub fn registered_irqs(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn dma_mappings(&self) -> usize {
        self.dma.len()
    }

    /// `wake_event` 호출 횟수
    pub fn wakeups(&self) -> u64 {
        *self.wakeups.lock().unwrap()
    }

    /// 컨트롤러가 인터럽트를 올리고 있으면 등록된 핸들러 호출
    ///
    /// 한 번에 한 스레드만 전달합니다 (단일 인터럽트 컨텍스트).
    pub fn deliver_interrupts(&self) {
        let Some(dwc) = &self.dwc else {
            return;
        };
        let Ok(_guard) = self.delivering.try_lock() else {
            return;
        };
        if dwc.read(GAHBCFG) & AhbConfig::GLOBAL_INTERRUPT_ENABLE.bits() == 0 {
            return;
        }
        if dwc.read(GINTSTS) & dwc.read(GINTMSK) == 0 {
            return;
        }
        let handlers = self.handlers.lock().unwrap().clone();
        for (irq, handler) in handlers {
            if self.is_unmasked(irq) {
                handler.handle_irq(irq);
            }
        }
    }
}

impl Platform for FakePlatform {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn delay_us(&self, us: u64) {
        if us > 0 {
            std::thread::sleep(Duration::from_micros(us));
        }
    }

    fn relax(&self) {
        self.deliver_interrupts();
        std::thread::yield_now();
    }

    fn wait_event(&self, event: &Event, seen: u32, deadline_us: u64) {
        self.deliver_interrupts();
        let wakeups = self.wakeups.lock().unwrap();
        if event.generation() != seen {
            return;
        }
        let left = Duration::from_micros(deadline_us.saturating_sub(self.now_us()));
        let _ = self.woken.wait_timeout(wakeups, left.min(WAIT_SLICE));
    }

    fn wake_event(&self, _event: &Event) {
        *self.wakeups.lock().unwrap() += 1;
        self.woken.notify_all();
    }

    fn register_interrupt_handler(&self, irq: u32, handler: Arc<dyn InterruptHandler>) -> Result<(), UsbError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(UsbError::InterruptRegistrationFailed);
        }
        self.handlers.lock().unwrap().push((irq, handler));
        Ok(())
    }

    fn unmask_interrupt(&self, irq: u32) {
        self.unmasked.lock().unwrap().insert(irq);
    }

    fn mask_interrupt(&self, irq: u32) {
        self.unmasked.lock().unwrap().remove(&irq);
    }

    fn dma_address(&self, ptr: *const u8) -> u32 {
        self.dma.register(ptr)
    }
}
