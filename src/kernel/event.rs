//! 대기/깨우기 이벤트
//!
//! 인터럽트 쪽은 [`Event::raise`]로 세대 번호만 올리고, 태스크 쪽은 세대가 바뀔
//! 때까지 [`Platform::wait_event`]에서 잠듭니다. 세대를 먼저 읽고 조건을 확인한 뒤
//! 잠들기 때문에, 그 사이에 온 신호도 놓치지 않습니다.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::drivers::platform::Platform;

#[derive(Debug)]
pub struct Event {
    generation: AtomicU32,
}

impl Event {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// 세대만 올림 (잠금 없음, 인터럽트 컨텍스트 가능)
    pub fn raise(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// 세대를 올리고 잠든 태스크를 깨움
    pub fn signal<P: Platform + ?Sized>(&self, platform: &P) {
        self.raise();
        platform.wake_event(self);
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
