//! 호스트 채널 풀
//!
//! DWC2 코어는 동시에 진행할 수 있는 트랜잭션 수가 채널 수(최대 8)로 제한됩니다.
//! 빈 채널은 원자적 비트마스크로 관리하므로 인터럽트 컨텍스트에서도 잠금 없이
//! 반납할 수 있습니다. 채널에는 한 번에 하나의 [`TransferCompletion`]만 묶입니다.
//!
//! 채널이 반납될 때마다 풀의 [`Event`]가 올라갑니다. 빈 채널을 기다리는 태스크와
//! 완료를 기다리는 태스크는 모두 이 이벤트에서 잠듭니다.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use crate::drivers::platform::Platform;
use crate::drivers::usb::dwc_regs::{ChannelInterrupts, MAX_CHANNELS};
use crate::drivers::usb::error::{TransferError, UsbError};
use crate::kernel::event::Event;
use crate::kernel::wait::{wait_on_for, TimedOut, WaitPolicy};

/// 호스트 채널 번호
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 완료 인터럽트에서 읽은 채널 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOutcome {
    pub interrupts: ChannelInterrupts,
    /// HCTSIZ에 남은 바이트 수
    pub remaining: u32,
}

impl ChannelOutcome {
    /// 인터럽트 비트 분류
    ///
    /// 여러 오류 비트가 함께 설정된 경우 버스 오류, STALL, NAK 순으로 우선합니다.
    pub fn status(&self) -> Result<(), TransferError> {
        let ints = self.interrupts;
        if ints.contains(ChannelInterrupts::AHB_ERROR) {
            Err(TransferError::AhbError)
        } else if ints.contains(ChannelInterrupts::STALL) {
            Err(TransferError::Stall)
        } else if ints.contains(ChannelInterrupts::NAK) {
            Err(TransferError::Nak)
        } else if ints.contains(ChannelInterrupts::TRANSACTION_ERROR) {
            Err(TransferError::TransactionError)
        } else if ints.contains(ChannelInterrupts::BABBLE) {
            Err(TransferError::Babble)
        } else if ints.contains(ChannelInterrupts::FRAME_OVERRUN) {
            Err(TransferError::FrameOverrun)
        } else if ints.contains(ChannelInterrupts::DATA_TOGGLE_ERROR) {
            Err(TransferError::DataToggle)
        } else if ints.contains(ChannelInterrupts::TRANSFER_COMPLETED) {
            Ok(())
        } else {
            // halted without completing
            Err(TransferError::TransactionError)
        }
    }
}

/// DMA 버퍼 (4바이트 정렬)
pub struct DmaBuffer {
    words: Vec<u32>,
    len: usize,
}

impl DmaBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            words: alloc::vec![0u32; len.div_ceil(4).max(1)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: u32 배열을 같은 길이 이하의 바이트로 보는 것은 항상 유효
        unsafe { core::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 위와 같음, 가변 차용은 self를 통해 독점
        unsafe { core::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }
}

/// 트랜잭션 하나의 완료 통지
///
/// 전송 엔진이 만들어 채널에 묶고, 디스패처가 결과를 기록합니다.
/// 하드웨어가 DMA로 접근하는 버퍼도 함께 소유하므로, 채널이 묶여 있는 동안에는
/// 대기하던 태스크가 먼저 포기해도 버퍼가 해제되지 않습니다.
pub struct TransferCompletion {
    done: AtomicBool,
    interrupts: AtomicU32,
    remaining: AtomicU32,
    buffer: Mutex<DmaBuffer>,
    dma_ptr: *const u8,
}

// SAFETY: dma_ptr은 buffer가 소유한 힙 메모리를 가리키며 주소 계산에만 쓰입니다.
unsafe impl Send for TransferCompletion {}
unsafe impl Sync for TransferCompletion {}

impl TransferCompletion {
    pub fn new(buffer_len: usize) -> Self {
        let buffer = DmaBuffer::new(buffer_len);
        let dma_ptr = buffer.as_ptr();
        Self {
            done: AtomicBool::new(false),
            interrupts: AtomicU32::new(0),
            remaining: AtomicU32::new(0),
            buffer: Mutex::new(buffer),
            dma_ptr,
        }
    }

    /// 하드웨어에 넘길 버퍼 시작 주소 (CPU 주소)
    pub fn dma_ptr(&self) -> *const u8 {
        self.dma_ptr
    }

    pub fn with_buffer<T>(&self, f: impl FnOnce(&mut [u8]) -> T) -> T {
        f(self.buffer.lock().as_bytes_mut())
    }

    /// 인터럽트 컨텍스트에서 결과 기록
    pub fn complete(&self, interrupts: ChannelInterrupts, remaining: u32) {
        self.interrupts.store(interrupts.bits(), Ordering::Relaxed);
        self.remaining.store(remaining, Ordering::Relaxed);
        self.done.store(true, Ordering::Release);
    }

    pub fn outcome(&self) -> Option<ChannelOutcome> {
        if !self.done.load(Ordering::Acquire) {
            return None;
        }
        Some(ChannelOutcome {
            interrupts: ChannelInterrupts::from_bits_retain(self.interrupts.load(Ordering::Relaxed)),
            remaining: self.remaining.load(Ordering::Relaxed),
        })
    }

    /// 완료될 때까지 `event`에서 잠들며 대기
    pub fn wait<P: Platform + ?Sized>(
        &self,
        platform: &P,
        event: &Event,
        policy: WaitPolicy,
    ) -> Result<ChannelOutcome, TimedOut> {
        wait_on_for(platform, event, policy, || self.outcome())
    }
}

struct ChannelSlot {
    binding: Mutex<Option<Arc<TransferCompletion>>>,
}

/// 호스트 채널 풀
pub struct ChannelPool {
    free: AtomicU32,
    slots: Vec<ChannelSlot>,
    event: Event,
    double_releases: AtomicU32,
}

impl ChannelPool {
    pub fn new(count: usize) -> Self {
        let count = count.clamp(1, MAX_CHANNELS);
        Self {
            free: AtomicU32::new((1u32 << count) - 1),
            slots: (0..count)
                .map(|_| ChannelSlot {
                    binding: Mutex::new(None),
                })
                .collect(),
            event: Event::new(),
            double_releases: AtomicU32::new(0),
        }
    }

    /// 채널 반납마다 올라가는 이벤트
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// 이미 비어 있던 채널을 다시 반납한 횟수
    pub fn double_releases(&self) -> u32 {
        self.double_releases.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.load(Ordering::Acquire).count_ones() as usize
    }

    /// 빈 채널 하나를 즉시 얻기
    pub fn try_acquire(&self) -> Option<ChannelId> {
        let mut free = self.free.load(Ordering::Acquire);
        loop {
            if free == 0 {
                return None;
            }
            let index = free.trailing_zeros();
            match self.free.compare_exchange_weak(
                free,
                free & !(1 << index),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(ChannelId(index as usize)),
                Err(actual) => free = actual,
            }
        }
    }

    /// 빈 채널이 생길 때까지 대기
    ///
    /// 채널 수가 곧 동시 트랜잭션 수의 상한이므로, 모두 사용 중이면 디스패처가
    /// 하나를 반납할 때까지 호출자가 멈춥니다.
    pub fn acquire<P: Platform + ?Sized>(&self, platform: &P, policy: WaitPolicy) -> Result<ChannelId, UsbError> {
        if let Some(channel) = self.try_acquire() {
            return Ok(channel);
        }
        crate::log_debug!("All {} host channels busy, waiting", self.count());
        wait_on_for(platform, &self.event, policy, || self.try_acquire()).map_err(|_| {
            crate::log_warn!("Timed out waiting for a host channel");
            UsbError::ChannelAllocationFailed
        })
    }

    /// 채널 반납
    ///
    /// 인터럽트 컨텍스트에서도 불리므로 잠금을 잡지 않습니다. 대기자를 깨우는 것은
    /// 호출자 몫입니다 ([`Platform::wake_event`]).
    pub fn release(&self, channel: ChannelId) {
        let bit = 1 << channel.0;
        let previous = self.free.fetch_or(bit, Ordering::Release);
        if previous & bit != 0 {
            self.double_releases.fetch_add(1, Ordering::Relaxed);
        }
        self.event.raise();
    }

    /// 획득한 채널에 완료 통지를 묶음
    pub fn bind(&self, channel: ChannelId, completion: Arc<TransferCompletion>) -> Result<(), UsbError> {
        let slot = self.slots.get(channel.0).ok_or(UsbError::InvalidParameter)?;
        let mut binding = slot.binding.lock();
        if binding.is_some() {
            crate::log_error!("Host channel {} is already bound", channel.0);
            return Err(UsbError::InvalidParameter);
        }
        *binding = Some(completion);
        Ok(())
    }

    pub fn is_bound(&self, channel: ChannelId) -> bool {
        self.slots
            .get(channel.0)
            .map(|slot| slot.binding.lock().is_some())
            .unwrap_or(false)
    }

    /// 인터럽트 컨텍스트: 결과 기록 후 채널 반납
    ///
    /// 묶인 요청이 없으면(이미 취소됨) 아무것도 하지 않고 `false`를 반환합니다.
    pub fn complete(&self, channel: usize, interrupts: ChannelInterrupts, remaining: u32) -> bool {
        let Some(slot) = self.slots.get(channel) else {
            return false;
        };
        // 잠금을 쥔 쪽은 이 채널을 취소하는 태스크뿐이며, 그쪽이 반납을 책임집니다.
        let Some(mut binding) = slot.binding.try_lock() else {
            return false;
        };
        let Some(completion) = binding.take() else {
            return false;
        };
        drop(binding);

        completion.complete(interrupts, remaining);
        self.release(ChannelId(channel));
        true
    }

    /// 태스크 컨텍스트: 대기를 포기한 요청을 풀고 채널 반납
    ///
    /// `completion`이 아직 묶여 있을 때만 반납하며, 그 사이 디스패처가 먼저
    /// 완료했다면 `false`를 반환합니다.
    pub fn cancel(&self, channel: ChannelId, completion: &Arc<TransferCompletion>) -> bool {
        let Some(slot) = self.slots.get(channel.0) else {
            return false;
        };
        let mut binding = slot.binding.lock();
        match binding.as_ref() {
            Some(bound) if Arc::ptr_eq(bound, completion) => {
                *binding = None;
                drop(binding);
                self.release(channel);
                true
            }
            _ => false,
        }
    }
}
