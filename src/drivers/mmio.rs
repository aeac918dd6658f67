//! 메모리 맵 레지스터 접근
//!
//! 모든 레지스터 접근은 volatile로 이루어지며 컴파일러가 생략하거나
//! 순서를 바꾸지 않습니다. 각 접근 자체가 하드웨어 동작을 일으킬 수 있기
//! 때문에 호출한 횟수와 순서 그대로 버스에 나가야 합니다.

use volatile::Volatile;

/// 32비트 레지스터 블록
///
/// 오프셋은 블록 베이스로부터의 바이트 단위입니다.
pub trait RegisterBlock: Send + Sync {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);

    /// 읽기-수정-쓰기 (읽기 한 번, 쓰기 한 번)
    fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32)
    where
        Self: Sized,
    {
        let value = self.read(offset);
        self.write(offset, f(value));
    }
}

/// 물리 주소 창에 매핑된 레지스터 블록
#[derive(Debug)]
pub struct MmioRegion {
    base: usize,
}

impl MmioRegion {
    /// # Safety
    /// `base`는 커널이 장치 메모리로 매핑한, 4바이트 정렬된 레지스터 창이어야 하며
    /// 이 구조체가 살아있는 동안 유효해야 합니다.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

impl RegisterBlock for MmioRegion {
    fn read(&self, offset: usize) -> u32 {
        let ptr = (self.base + offset) as *const u32;
        // SAFETY: new()의 계약에 따라 유효한 장치 메모리
        let reg = unsafe { &*ptr };
        Volatile::new_read_only(reg).read()
    }

    fn write(&self, offset: usize, value: u32) {
        let ptr = (self.base + offset) as *mut u32;
        // SAFETY: new()의 계약에 따라 유효한 장치 메모리
        let reg = unsafe { &mut *ptr };
        Volatile::new_write_only(reg).write(value);
    }
}
