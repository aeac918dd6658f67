//! USB 전송 엔진
//!
//! 전송 요청을 루트 허브 에뮬레이션 또는 실제 호스트 채널로 보냅니다.
//!
//! 제어 전송은 SETUP, DATA(선택), STATUS 세 단계로 나뉘며 단계마다 채널을
//! 하나 얻어 트랜잭션을 실행합니다. 채널을 얻지 못하면 디스패처가 반납할 때까지
//! 기다리고, 트랜잭션을 시작한 뒤에는 완료 통지를 기다립니다.
//!
//! 완료 통지가 제때 오지 않으면 채널을 정지시키고, 하드웨어가 정지를 확인해 줄
//! 때까지 채널을 묶어 둡니다. 정지 전에 채널을 다시 내주면 늦게 도착한 HALTED가
//! 다음 요청을 완료시키기 때문입니다.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::UsbHostConfig;
use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::Platform;
use crate::drivers::usb::channel::{ChannelId, ChannelOutcome, ChannelPool, TransferCompletion};
use crate::drivers::usb::descriptor::EndpointTransferType;
use crate::drivers::usb::device::{DeviceId, UsbSpeed};
use crate::drivers::usb::dwc_regs::{
    hcchar, hcdma, hcint, hcintmsk, hcsplt, hctsiz, is_low_speed, ChannelCharacteristics,
    ChannelInterrupts, ChannelTransferSize, PacketId, HCCHAR_DISABLE, HCCHAR_ENABLE,
    HCINT_CLEAR_ALL,
};
use crate::drivers::usb::error::{TransferError, UsbError};
use crate::drivers::usb::request::{Direction, UsbControlRequest};
use crate::drivers::usb::roothub::RootHub;
use crate::kernel::error_recovery::{driver_retry, RetryConfig};
use crate::kernel::wait::WaitPolicy;

/// 한 단계에서 전송할 수 있는 최대 바이트 수
pub const MAX_TRANSFER_SIZE: usize = 4096;

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// 아직 제출되지 않음
    Pending,
    Completed,
    Failed(UsbError),
}

/// 전송 요청
///
/// 호출자가 만들어 [`UsbSubsystem::submit_transfer`](crate::drivers::usb::UsbSubsystem::submit_transfer)에
/// 넘기면 완료될 때까지 엔진이 소유하고, 끝나면 상태와 함께 돌려받습니다.
#[must_use]
#[derive(Debug)]
pub struct TransferRequest {
    device: DeviceId,
    endpoint: u8,
    direction: Direction,
    setup: Option<UsbControlRequest>,
    buffer: Vec<u8>,
    length: usize,
    actual_length: usize,
    status: TransferStatus,
}

impl TransferRequest {
    /// 엔드포인트 0 제어 전송
    pub fn control(device: DeviceId, setup: UsbControlRequest, buffer: Vec<u8>) -> Self {
        Self {
            device,
            endpoint: 0,
            direction: setup.direction(),
            setup: Some(setup),
            length: setup.length as usize,
            buffer,
            actual_length: 0,
            status: TransferStatus::Pending,
        }
    }

    /// 일반 엔드포인트 전송
    pub fn new(device: DeviceId, endpoint: u8, direction: Direction, buffer: Vec<u8>, length: usize) -> Self {
        Self {
            device,
            endpoint,
            direction,
            setup: None,
            buffer,
            length,
            actual_length: 0,
            status: TransferStatus::Pending,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn setup(&self) -> Option<&UsbControlRequest> {
        self.setup.as_ref()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// 실제 전송된 부분
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length.min(self.buffer.len())]
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// 완료 상태를 `Result`로
    pub fn result(&self) -> Result<usize, UsbError> {
        match self.status {
            TransferStatus::Completed => Ok(self.actual_length),
            TransferStatus::Failed(e) => Err(e),
            TransferStatus::Pending => Err(UsbError::NotInitialized),
        }
    }

    pub(crate) fn finish(&mut self, result: Result<usize, UsbError>) {
        match result {
            Ok(actual) => {
                self.actual_length = actual;
                self.status = TransferStatus::Completed;
            }
            Err(e) => {
                self.actual_length = 0;
                self.status = TransferStatus::Failed(e);
            }
        }
    }
}

/// 전송 대상 파이프 (디바이스 레코드에서 뽑은 값)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipe {
    pub device_address: u8,
    pub endpoint: u8,
    pub max_packet_size: u16,
    pub speed: UsbSpeed,
    pub is_root_hub: bool,
}

enum StageBuffer<'a> {
    Out(&'a [u8]),
    In(&'a mut [u8]),
}

/// 전송 엔진
pub struct TransferEngine<R, P> {
    regs: Arc<R>,
    platform: Arc<P>,
    channels: Arc<ChannelPool>,
    root_hub: RootHub<R>,
    channel_wait: WaitPolicy,
    transfer_wait: WaitPolicy,
    halt_wait: WaitPolicy,
    retry: RetryConfig,
}

impl<R: RegisterBlock, P: Platform> TransferEngine<R, P> {
    pub fn new(
        regs: Arc<R>,
        platform: Arc<P>,
        channels: Arc<ChannelPool>,
        root_hub: RootHub<R>,
        config: &UsbHostConfig,
    ) -> Self {
        Self {
            regs,
            platform,
            channels,
            root_hub,
            channel_wait: config.channel_wait,
            transfer_wait: config.transfer_wait,
            halt_wait: config.halt_wait,
            retry: config.transfer_retry,
        }
    }

    pub fn channels(&self) -> &ChannelPool {
        &self.channels
    }

    pub fn root_hub(&self) -> &RootHub<R> {
        &self.root_hub
    }

    /// 요청을 실행하고 결과를 담아 돌려줌
    pub fn queue_transfer(&self, pipe: &Pipe, mut request: TransferRequest) -> TransferRequest {
        let result = self.execute(pipe, &mut request);
        if let Err(e) = result {
            crate::log_debug!("Transfer to {} ep{} failed: {}", request.device, request.endpoint, e);
        }
        request.finish(result);
        request
    }

    fn execute(&self, pipe: &Pipe, request: &mut TransferRequest) -> Result<usize, UsbError> {
        let Some(setup) = request.setup else {
            // 주기/벌크 스케줄링은 아직 없음
            return Err(UsbError::UnsupportedRequest);
        };
        if request.length > request.buffer.len() {
            return Err(UsbError::InvalidParameter);
        }
        let length = request.length;
        self.control(pipe, &setup, &mut request.buffer[..length])
    }

    /// 제어 전송
    ///
    /// `data` 길이가 데이터 단계 길이입니다. 반환값은 데이터 단계에서 실제로 옮긴 바이트 수입니다.
    pub fn control(&self, pipe: &Pipe, setup: &UsbControlRequest, data: &mut [u8]) -> Result<usize, UsbError> {
        if data.len() > setup.length as usize || data.len() > MAX_TRANSFER_SIZE {
            return Err(UsbError::InvalidParameter);
        }
        if pipe.is_root_hub {
            return self.root_hub.handle(&*self.platform, setup, data);
        }

        let setup_bytes = setup.to_bytes();
        self.run_stage(pipe, PacketId::Setup, StageBuffer::Out(&setup_bytes))?;

        let direction = setup.direction();
        let actual = if data.is_empty() {
            0
        } else {
            match direction {
                Direction::In => self.run_stage(pipe, PacketId::Data1, StageBuffer::In(data))?,
                Direction::Out => self.run_stage(pipe, PacketId::Data1, StageBuffer::Out(data))?,
            }
        };

        // 상태 단계는 데이터 단계의 반대 방향 (데이터가 없으면 IN)
        let status = if data.is_empty() { Direction::In } else { direction.opposite() };
        match status {
            Direction::In => self.run_stage(pipe, PacketId::Data1, StageBuffer::In(&mut [])),
            Direction::Out => self.run_stage(pipe, PacketId::Data1, StageBuffer::Out(&[])),
        }?;

        Ok(actual)
    }

    fn run_stage(&self, pipe: &Pipe, pid: PacketId, mut buffer: StageBuffer<'_>) -> Result<usize, UsbError> {
        driver_retry(&*self.platform, self.retry, |attempt| {
            if attempt > 0 {
                crate::log_trace!("Retrying {:?} stage to addr {} (attempt {})", pid, pipe.device_address, attempt);
            }
            self.transaction(pipe, pid, &mut buffer)
        })
    }

    /// 채널 하나로 트랜잭션 하나 실행
    fn transaction(&self, pipe: &Pipe, pid: PacketId, buffer: &mut StageBuffer<'_>) -> Result<usize, UsbError> {
        let (direction, length) = match buffer {
            StageBuffer::Out(bytes) => (Direction::Out, bytes.len()),
            StageBuffer::In(bytes) => (Direction::In, bytes.len()),
        };

        let completion = Arc::new(TransferCompletion::new(length));
        if let StageBuffer::Out(bytes) = buffer {
            completion.with_buffer(|dma| dma.copy_from_slice(bytes));
        }
        let dma_address = self.platform.dma_address(completion.dma_ptr());

        let channel = self.channels.acquire(&*self.platform, self.channel_wait)?;
        if let Err(e) = self.channels.bind(channel, completion.clone()) {
            self.channels.release(channel);
            return Err(e);
        }

        self.start_channel(channel, pipe, direction, pid, length as u32, dma_address);

        let outcome = match completion.wait(&*self.platform, self.channels.event(), self.transfer_wait) {
            Ok(outcome) => outcome,
            Err(_) => {
                crate::log_warn!(
                    "Channel {} timed out (addr {} ep{})",
                    channel.index(),
                    pipe.device_address,
                    pipe.endpoint
                );
                self.halt_timed_out(channel, &completion)?
            }
        };

        outcome.status()?;

        let remaining = (outcome.remaining as usize).min(length);
        let transferred = length - remaining;
        if let StageBuffer::In(bytes) = buffer {
            completion.with_buffer(|dma| bytes[..transferred].copy_from_slice(&dma[..transferred]));
        }
        Ok(transferred)
    }

    /// 채널 프로그래밍 후 시작
    fn start_channel(
        &self,
        channel: ChannelId,
        pipe: &Pipe,
        direction: Direction,
        pid: PacketId,
        length: u32,
        dma_address: u32,
    ) {
        let ch = channel.index();
        let characteristics = ChannelCharacteristics {
            max_packet_size: pipe.max_packet_size,
            endpoint: pipe.endpoint,
            direction,
            low_speed: is_low_speed(pipe.speed),
            endpoint_type: EndpointTransferType::Control,
            packets_per_frame: 1,
            device_address: pipe.device_address,
            odd_frame: false,
            disable: false,
            enable: false,
        };

        self.regs.write(hcint(ch), HCINT_CLEAR_ALL);
        self.regs.write(hcintmsk(ch), ChannelInterrupts::HALTED.bits());
        self.regs.write(hcchar(ch), characteristics.to_bits());
        // 루트 포트 직결 디바이스뿐이므로 split 없음
        self.regs.write(hcsplt(ch), 0);
        self.regs.write(
            hctsiz(ch),
            ChannelTransferSize::new(length, pipe.max_packet_size, pid).to_bits(),
        );
        self.regs.write(hcdma(ch), dma_address);
        self.regs.write(
            hcchar(ch),
            ChannelCharacteristics {
                enable: true,
                ..characteristics
            }
            .to_bits(),
        );
    }

    fn halt_channel(&self, channel: ChannelId) {
        let ch = channel.index();
        self.regs
            .modify(hcchar(ch), |value| value | HCCHAR_DISABLE | HCCHAR_ENABLE);
    }

    /// 시간 초과된 채널을 정지시키고 정지가 확인되면 반납
    ///
    /// - HALTED가 오면 디스패처가 완료 처리와 반납을 합니다. 그 결과가 성공이면
    ///   마감 직후에 끝난 전송이므로 그대로 씁니다.
    /// - 인터럽트 없이 CHEN만 내려갔으면 HCINT를 지우고 직접 반납합니다.
    /// - CHEN이 계속 켜져 있으면 채널을 묶어 둔 채로 포기합니다. 나중에 오는
    ///   HALTED가 이 요청을 완료하면서 채널을 반납합니다.
    fn halt_timed_out(
        &self,
        channel: ChannelId,
        completion: &Arc<TransferCompletion>,
    ) -> Result<ChannelOutcome, UsbError> {
        let ch = channel.index();
        self.halt_channel(channel);

        let finished = match completion.wait(&*self.platform, self.channels.event(), self.halt_wait) {
            Ok(outcome) => Some(outcome),
            Err(_) if self.regs.read(hcchar(ch)) & HCCHAR_ENABLE == 0 => {
                self.regs.write(hcint(ch), HCINT_CLEAR_ALL);
                if self.channels.cancel(channel, completion) {
                    self.platform.wake_event(self.channels.event());
                    None
                } else {
                    // 정지 직후 디스패처가 먼저 완료함
                    completion.outcome()
                }
            }
            Err(_) => {
                crate::log_error!("Channel {} did not halt, keeping it bound", ch);
                None
            }
        };

        match finished {
            Some(outcome) if outcome.status().is_ok() => Ok(outcome),
            _ => Err(UsbError::Transfer(TransferError::Timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::usb::descriptor::DescriptorType;
    use crate::drivers::usb::dwc_regs::{CoreInterrupts, AhbConfig, GAHBCFG, GINTMSK};
    use crate::drivers::usb::interrupt::{Dispatcher, PortEvents};
    use crate::drivers::usb::request::UsbStandardRequest;
    use crate::testing::{FakeDwc, FakePlatform, SimDevice, SimFailure, SAMPLE_DEVICE};

    struct Rig {
        dwc: Arc<FakeDwc>,
        platform: Arc<FakePlatform>,
        engine: TransferEngine<FakeDwc, FakePlatform>,
    }

    fn rig(retry: RetryConfig) -> Rig {
        rig_with(UsbHostConfig {
            channel_wait: WaitPolicy::new(200_000, u32::MAX),
            transfer_wait: WaitPolicy::new(200_000, u32::MAX),
            halt_wait: WaitPolicy::new(10_000, u32::MAX),
            transfer_retry: retry,
            ..UsbHostConfig::default()
        })
    }

    fn rig_with(config: UsbHostConfig) -> Rig {
        let dwc = Arc::new(FakeDwc::new());
        let platform = Arc::new(FakePlatform::with_dwc(dwc.clone()));
        let channels = Arc::new(ChannelPool::new(8));
        let events = Arc::new(PortEvents::new());
        let dispatcher = Arc::new(Dispatcher::new(
            dwc.clone(),
            platform.clone(),
            channels.clone(),
            events.clone(),
        ));
        platform.register_interrupt_handler(9, dispatcher).unwrap();
        platform.unmask_interrupt(9);
        dwc.write(GINTMSK, (CoreInterrupts::PORT | CoreInterrupts::HOST_CHANNEL).bits());
        dwc.write(GAHBCFG, AhbConfig::GLOBAL_INTERRUPT_ENABLE.bits());

        let engine = TransferEngine::new(
            dwc.clone(),
            platform.clone(),
            channels,
            RootHub::new(dwc.clone(), events, 1, 0),
            &config,
        );
        Rig { dwc, platform, engine }
    }

    fn single_attempt() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            retry_delay_us: 0,
            exponential_backoff: false,
        }
    }

    fn halts_on(dwc: &FakeDwc, ch: usize) -> usize {
        dwc.writes_to(hcchar(ch))
            .into_iter()
            .filter(|v| v & HCCHAR_DISABLE != 0)
            .count()
    }

    fn no_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            retry_delay_us: 0,
            exponential_backoff: false,
        }
    }

    fn pipe(address: u8) -> Pipe {
        Pipe {
            device_address: address,
            endpoint: 0,
            max_packet_size: 8,
            speed: UsbSpeed::Full,
            is_root_hub: false,
        }
    }

    #[test]
    fn descriptor_read_runs_three_stages() {
        let rig = rig(no_retry());
        let sim = rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE));

        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(rig.engine.control(&pipe(0), &setup, &mut buf), Ok(18));
        assert_eq!(buf, SAMPLE_DEVICE);
        assert_eq!(rig.engine.channels().free_count(), 8);
        assert_eq!(rig.dwc.sim_setups(sim), alloc::vec![setup]);
    }

    #[test]
    fn short_read_reports_actual_length() {
        let rig = rig(no_retry());
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE));

        let mut buf = [0u8; 64];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 64);
        assert_eq!(rig.engine.control(&pipe(0), &setup, &mut buf), Ok(18));
    }

    #[test]
    fn stall_is_not_retried() {
        let rig = rig(no_retry());
        let sim = rig.dwc.attach(
            SimDevice::new(SAMPLE_DEVICE).failing(SimFailure::StallOn(UsbStandardRequest::GetDescriptor)),
        );

        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(
            rig.engine.control(&pipe(0), &setup, &mut buf),
            Err(UsbError::Transfer(TransferError::Stall))
        );
        assert_eq!(rig.dwc.sim_setups(sim).len(), 1);
        assert_eq!(rig.engine.channels().free_count(), 8);
    }

    #[test]
    fn persistent_nak_exhausts_retries() {
        let rig = rig(no_retry());
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE).failing(SimFailure::AlwaysNak));

        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(
            rig.engine.control(&pipe(0), &setup, &mut buf),
            Err(UsbError::RetriesExhausted(TransferError::Nak))
        );
    }

    #[test]
    fn brief_nak_is_retried_transparently() {
        let rig = rig(no_retry());
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE).failing(SimFailure::NakTimes(2)));

        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(rig.engine.control(&pipe(0), &setup, &mut buf), Ok(18));
    }

    #[test]
    fn silent_device_times_out_and_frees_the_channel() {
        let rig = rig(single_attempt());
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE).failing(SimFailure::Silent));

        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(
            rig.engine.control(&pipe(0), &setup, &mut buf),
            Err(UsbError::Transfer(TransferError::Timeout))
        );
        assert_eq!(rig.engine.channels().free_count(), 8);
        assert_eq!(halts_on(&rig.dwc, 0), 1);
        // the halt interrupt completed the abandoned request, not a later one
        assert_eq!(rig.engine.channels().double_releases(), 0);
        assert_eq!(rig.dwc.read(hcint(0)), 0);
    }

    #[test]
    fn channel_that_refuses_to_halt_stays_bound_until_it_does() {
        let rig = rig_with(UsbHostConfig {
            transfer_wait: WaitPolicy::new(20_000, u32::MAX),
            halt_wait: WaitPolicy::new(5_000, u32::MAX),
            transfer_retry: single_attempt(),
            ..UsbHostConfig::default()
        });
        rig.dwc.set_halt_stuck(true);
        let silent = rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE).failing(SimFailure::Silent));

        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(
            rig.engine.control(&pipe(0), &setup, &mut buf),
            Err(UsbError::Transfer(TransferError::Timeout))
        );
        let stuck = ChannelId(0);
        assert!(rig.engine.channels().is_bound(stuck));
        assert_eq!(rig.engine.channels().free_count(), 7);
        let stuck_writes = rig.dwc.writes_to(hcchar(0)).len();

        // the next request runs on another channel
        rig.dwc.detach(silent);
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE));
        assert_eq!(rig.engine.control(&pipe(0), &setup, &mut buf), Ok(18));
        assert_eq!(buf, SAMPLE_DEVICE);
        assert_eq!(rig.dwc.writes_to(hcchar(0)).len(), stuck_writes);

        // a late halt releases the stuck channel exactly once
        rig.dwc.complete_halt(0);
        rig.platform.deliver_interrupts();
        assert!(!rig.engine.channels().is_bound(stuck));
        assert_eq!(rig.engine.channels().free_count(), 8);
        assert_eq!(rig.engine.channels().double_releases(), 0);
    }

    #[test]
    fn halted_channel_without_an_interrupt_is_released_by_the_task() {
        let rig = rig_with(UsbHostConfig {
            transfer_wait: WaitPolicy::new(20_000, u32::MAX),
            halt_wait: WaitPolicy::new(5_000, u32::MAX),
            transfer_retry: single_attempt(),
            ..UsbHostConfig::default()
        });
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE).failing(SimFailure::Silent));
        rig.platform.mask_interrupt(9);

        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(
            rig.engine.control(&pipe(0), &setup, &mut buf),
            Err(UsbError::Transfer(TransferError::Timeout))
        );
        assert_eq!(rig.engine.channels().free_count(), 8);
        assert_eq!(rig.dwc.read(hcint(0)), 0);

        // nothing is left for the interrupt handler once it is unmasked
        rig.platform.unmask_interrupt(9);
        rig.platform.deliver_interrupts();
        assert_eq!(rig.engine.channels().double_releases(), 0);
    }

    #[test]
    fn root_hub_requests_never_touch_a_channel() {
        let rig = rig(no_retry());
        let root = Pipe {
            is_root_hub: true,
            ..pipe(1)
        };
        let mut buf = [0u8; 18];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        assert_eq!(rig.engine.control(&root, &setup, &mut buf), Ok(18));
        assert!((0..8).all(|ch| rig.dwc.writes_to(hcchar(ch)).is_empty()));
        assert_eq!(rig.platform.dma_mappings(), 0);
    }

    #[test]
    fn exhausted_channels_block_until_an_interrupt_frees_one() {
        use std::thread;
        use std::time::Duration;

        let rig = rig(no_retry());
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE));
        let engine = Arc::new(rig.engine);

        // hold every channel with an in-flight request
        let held: Vec<_> = (0..8)
            .map(|_| {
                let channel = engine.channels().try_acquire().unwrap();
                let completion = Arc::new(TransferCompletion::new(0));
                engine.channels().bind(channel, completion.clone()).unwrap();
                (channel, completion)
            })
            .collect();
        assert_eq!(engine.channels().free_count(), 0);

        let worker = {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 18];
                let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
                engine.control(&pipe(0), &setup, &mut buf).map(|n| (n, buf))
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!worker.is_finished());

        // simulated completion on channel 3
        rig.dwc.raise_channel_interrupt(
            3,
            ChannelInterrupts::HALTED | ChannelInterrupts::TRANSFER_COMPLETED,
        );
        rig.platform.deliver_interrupts();

        let (n, buf) = worker.join().unwrap().unwrap();
        assert_eq!(n, 18);
        assert_eq!(buf, SAMPLE_DEVICE);
        assert!(held[3].1.outcome().is_some());
        assert!(held[0].1.outcome().is_none());
    }

    #[test]
    fn request_records_status_and_length() {
        let rig = rig(no_retry());
        rig.dwc.attach(SimDevice::new(SAMPLE_DEVICE));
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::Device, 0, 0, 18);
        let request = TransferRequest::control(DeviceId::new(1, 1), setup, alloc::vec![0; 18]);
        assert_eq!(request.status(), TransferStatus::Pending);

        let done = rig.engine.queue_transfer(&pipe(0), request);
        assert_eq!(done.result(), Ok(18));
        assert_eq!(done.data(), &SAMPLE_DEVICE[..]);

        let bulk = TransferRequest::new(DeviceId::new(1, 1), 1, Direction::In, alloc::vec![0; 64], 64);
        let done = rig.engine.queue_transfer(&pipe(1), bulk);
        assert_eq!(done.status(), TransferStatus::Failed(UsbError::UnsupportedRequest));
    }
}
